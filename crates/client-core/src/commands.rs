//! Operator command surface
//!
//! A static dispatch table keyed by command name, one usage line per
//! command, plus the single-keystroke shortcuts. The read loop in the
//! binary resolves names against [`COMMANDS`] and calls
//! [`CommandDispatcher::run_command`]; everything here operates purely on
//! the session manager and the engine/console boundaries, so the whole
//! surface is testable without a terminal.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::console::{CTRL_D, KEY_ESCAPE};
use crate::engine::{SipAddress, StreamId, StreamKind, StreamSpec, TraceCategory};
use crate::error::{ClientError, ClientResult};
use crate::manager::SessionManager;
use crate::session::{CallDirection, SessionContext, SessionController, Stream};
use crate::transfer::{sha1_of_file, FileSelector};

/// Ctrl-N: switch to the next session
pub const KEY_NEXT_SESSION: char = '\x0e';
/// Ctrl-Space: open the DTMF numeric pad
pub const KEY_AUDIO_CONTROL: char = '\x00';
/// Ctrl-H: toggle hold on the current session
pub const KEY_TOGGLE_HOLD: char = '\x08';

/// One entry of the command table
pub struct CommandSpec {
    /// Command name as typed after `:`
    pub name: &'static str,
    /// Usage line
    pub usage: &'static str,
    /// One-line description
    pub description: &'static str,
}

/// The command dispatch table
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        usage: ":help",
        description: "Print this help message",
    },
    CommandSpec {
        name: "call",
        usage: ":call user@domain [+]chat",
        description: "Start a session. Chat is proposed unless other streams are listed",
    },
    CommandSpec {
        name: "transfer",
        usage: ":transfer user@domain filename",
        description: "Transfer a file to user@domain",
    },
    CommandSpec {
        name: "dtmf",
        usage: ":dtmf DIGITS",
        description: "Send DTMF digits. Press Ctrl-Space for the numeric pad",
    },
    CommandSpec {
        name: "hold",
        usage: ":hold  (or Ctrl-H)",
        description: "Put the current session on hold",
    },
    CommandSpec {
        name: "unhold",
        usage: ":unhold  (or Ctrl-H)",
        description: "Take the current session out of hold",
    },
    CommandSpec {
        name: "record",
        usage: ":record",
        description: "Toggle audio recording",
    },
    CommandSpec {
        name: "add",
        usage: ":add chat|audio|text",
        description: "Propose adding a stream to the current session",
    },
    CommandSpec {
        name: "remove",
        usage: ":remove chat|audio|text",
        description: "Propose removing a stream from the current session",
    },
    CommandSpec {
        name: "switch",
        usage: ":switch  (or Ctrl-N)",
        description: "Switch between active sessions",
    },
    CommandSpec {
        name: "trace",
        usage: ":trace sip|media|events",
        description: "Toggle the debug traces of the given category",
    },
];

/// Stream kinds the operator can name in commands
const STREAM_WORDS: &[&str] = &["chat", "audio", "text"];

/// Trace categories the operator can name
const TRACE_WORDS: &[&str] = &["sip", "media", "events"];

const NUMPAD: &str = "\
+------+-----+------+
|  1   |  2  |  3   |
|      | ABC | DEF  |
+------+-----+------+
|  4   |  5  |  6   |
| GHI  | JKL | MNO  |
+------+-----+------+
|  7   |  8  |  9   |
| PQRS | TUV | WXYZ |
+------+-----+------+
|  *   |  0  |  #   |
+-------------------+";

/// Look up a command by its exact name
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// The single-keystroke shortcut table
pub fn shortcuts() -> &'static [char] {
    &[KEY_NEXT_SESSION, KEY_AUDIO_CONTROL, KEY_TOGGLE_HOLD]
}

/// Executes operator commands against the session manager and the engine
pub struct CommandDispatcher {
    ctx: Arc<SessionContext>,
    manager: Arc<SessionManager>,
}

impl CommandDispatcher {
    /// Create a dispatcher
    pub fn new(ctx: Arc<SessionContext>, manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self { ctx, manager })
    }

    /// Run one named command with its arguments
    pub async fn run_command(&self, name: &str, args: &[&str]) -> ClientResult<()> {
        match name {
            "help" => self.cmd_help(),
            "call" => self.cmd_call(args).await,
            "transfer" => self.cmd_transfer(args).await,
            "dtmf" => self.cmd_dtmf(args).await,
            "hold" => self.manager.require_current()?.hold().await,
            "unhold" => self.manager.require_current()?.unhold().await,
            "record" => self.manager.require_current()?.toggle_recording().await,
            "add" => self.cmd_add(args).await,
            "remove" => self.cmd_remove(args).await,
            "switch" => {
                self.manager.switch_next();
                Ok(())
            }
            "trace" => self.cmd_trace(args),
            other => Err(ClientError::command(format!("Unknown command: {}", other))),
        }
    }

    /// Run the action bound to a shortcut key
    pub async fn run_shortcut(&self, key: char) -> ClientResult<()> {
        match key {
            KEY_NEXT_SESSION => {
                self.manager.switch_next();
                Ok(())
            }
            KEY_TOGGLE_HOLD => self.manager.require_current()?.toggle_hold().await,
            KEY_AUDIO_CONTROL => self.dtmf_numpad().await,
            other => Err(ClientError::command(format!(
                "Unknown shortcut: {:?}",
                other
            ))),
        }
    }

    /// Send a plain input line as a chat message on the current session
    pub async fn send_message_line(&self, text: &str) -> ClientResult<()> {
        self.manager.require_current()?.send_message(text).await
    }

    fn cmd_help(&self) -> ClientResult<()> {
        let width = COMMANDS
            .iter()
            .map(|spec| spec.usage.len())
            .max()
            .unwrap_or(0)
            + 3;
        for spec in COMMANDS {
            self.ctx.console.print(&format!(
                "{:width$}{}",
                spec.usage,
                spec.description,
                width = width
            ));
        }
        Ok(())
    }

    async fn cmd_call(&self, args: &[&str]) -> ClientResult<()> {
        let Some((target, stream_args)) = args.split_first() else {
            return Err(ClientError::command(
                "Please provide a target address\n:call user@domain [+]chat",
            ));
        };
        let target = parse_target(target, &self.ctx.local.host)?;
        let specs = parse_stream_specs(stream_args)?;
        self.start_outgoing(target, specs).await
    }

    async fn cmd_transfer(&self, args: &[&str]) -> ClientResult<()> {
        let [target, filename] = args else {
            return Err(ClientError::command(
                "Please provide a target address and a file name\n:transfer user@domain filename",
            ));
        };
        let target = parse_target(target, &self.ctx.local.host)?;
        let offer = file_offer(Path::new(filename))?;
        self.start_outgoing(target, vec![offer]).await
    }

    async fn cmd_dtmf(&self, args: &[&str]) -> ClientResult<()> {
        let session = self.manager.require_current()?;
        let digits: String = args.concat().to_uppercase();
        if digits.is_empty() {
            return Err(ClientError::command(
                "Please provide digits to send\n:dtmf DIGITS",
            ));
        }
        for digit in digits.chars() {
            if !"0123456789*#ABCD".contains(digit) {
                return Err(ClientError::command(format!(
                    "Invalid DTMF digit: {:?}",
                    digit
                )));
            }
        }
        for digit in digits.chars() {
            self.ctx.engine.send_dtmf(session.id(), digit).await?;
        }
        Ok(())
    }

    /// Interactive numeric pad bound to Ctrl-Space
    async fn dtmf_numpad(&self) -> ClientResult<()> {
        let session = self.manager.require_current()?;
        if !session.has_stream(StreamKind::Audio) {
            return Err(ClientError::command(
                "The session does not have an audio stream to send DTMF over",
            ));
        }
        self.ctx.console.print(NUMPAD);

        let mut accepted: Vec<char> = "1234567890*#".chars().collect();
        accepted.extend('a'..='z');
        accepted.extend('A'..='Z');
        accepted.extend([KEY_AUDIO_CONTROL, KEY_ESCAPE, CTRL_D, '\n']);

        loop {
            let key = match self.ctx.console.ask_question("> ", &accepted).await {
                Ok(key) => key,
                Err(_) => return Ok(()),
            };
            if matches!(key, KEY_AUDIO_CONTROL | KEY_ESCAPE | CTRL_D | '\n') {
                return Ok(());
            }
            match char_to_digit(key.to_ascii_uppercase()) {
                Some(digit) => self.ctx.engine.send_dtmf(session.id(), digit).await?,
                None => self.ctx.console.print(&format!("Invalid digit: {:?}", key)),
            }
        }
    }

    async fn cmd_add(&self, args: &[&str]) -> ClientResult<()> {
        let session = self.manager.require_current()?;
        let [word] = args else {
            return Err(ClientError::command(
                "Invalid number of arguments\n:add chat|audio|text",
            ));
        };
        let spec = stream_spec_from_word(word)?;
        self.ctx.engine.add_stream(session.id(), spec).await
    }

    async fn cmd_remove(&self, args: &[&str]) -> ClientResult<()> {
        let session = self.manager.require_current()?;
        let [word] = args else {
            return Err(ClientError::command(
                "Invalid number of arguments\n:remove chat|audio|text",
            ));
        };
        let kind = stream_kind_from_word(word)?;
        self.ctx.engine.remove_stream(session.id(), kind).await
    }

    fn cmd_trace(&self, args: &[&str]) -> ClientResult<()> {
        if args.is_empty() {
            return Err(ClientError::command(
                "Please provide a category\n:trace sip|media|events",
            ));
        }
        for arg in args {
            let category = match complete_word(&arg.to_lowercase(), TRACE_WORDS)? {
                "sip" => TraceCategory::Sip,
                "media" => TraceCategory::Media,
                _ => TraceCategory::Events,
            };
            let enabled = self.ctx.engine.toggle_trace(category);
            self.ctx.console.print(&format!(
                "{} tracing is now {}",
                category,
                if enabled { "activated" } else { "deactivated" }
            ));
        }
        Ok(())
    }

    /// Start an outgoing session and register it as current
    async fn start_outgoing(
        &self,
        target: SipAddress,
        specs: Vec<StreamSpec>,
    ) -> ClientResult<()> {
        // Provisional stream identities; the engine's streams-update event
        // replaces them with the negotiated set.
        let streams: Vec<Stream> = specs
            .iter()
            .map(|spec| Stream {
                id: StreamId::new(),
                kind: spec.kind(),
                selector: spec.selector().cloned(),
            })
            .collect();
        let session = self.ctx.engine.start_session(target.clone(), specs).await?;
        let controller = SessionController::new(
            self.ctx.clone(),
            session,
            target,
            CallDirection::Outgoing,
            streams,
        );
        self.manager.add(controller, true);
        Ok(())
    }
}

/// Build a file-offer spec from a local path
fn file_offer(path: &Path) -> ClientResult<StreamSpec> {
    let metadata = fs::metadata(path).map_err(|error| ClientError::command(error.to_string()))?;
    if !metadata.is_file() {
        return Err(ClientError::command(format!(
            "Not a regular file: {}",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ClientError::command(format!("Invalid file name {:?}", path)))?;
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let hash = sha1_of_file(path).map_err(|error| ClientError::command(error.to_string()))?;
    let selector = FileSelector::new(name, content_type)
        .with_size(metadata.len())
        .with_hash(hash);
    Ok(StreamSpec::FileOffer {
        selector,
        source: path.to_path_buf(),
    })
}

/// Resolve a possibly abbreviated word against a word list
///
/// Exact matches win; otherwise a unique prefix match resolves and anything
/// ambiguous or unknown is a user command error listing the candidates.
pub fn complete_word<'a>(input: &str, words: &[&'a str]) -> ClientResult<&'a str> {
    if let Some(word) = words.iter().find(|word| **word == input) {
        return Ok(word);
    }
    let matches: Vec<&str> = words
        .iter()
        .copied()
        .filter(|word| word.starts_with(input))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only),
        _ => Err(ClientError::command(format!(
            "Please provide {}. Cannot understand {:?}",
            words.join("|"),
            input
        ))),
    }
}

fn stream_kind_from_word(word: &str) -> ClientResult<StreamKind> {
    let word = word.trim_start_matches('+').to_lowercase();
    Ok(match complete_word(&word, STREAM_WORDS)? {
        "chat" => StreamKind::Chat,
        "audio" => StreamKind::Audio,
        _ => StreamKind::Text,
    })
}

fn stream_spec_from_word(word: &str) -> ClientResult<StreamSpec> {
    Ok(match stream_kind_from_word(word)? {
        StreamKind::Chat => StreamSpec::Chat,
        StreamKind::Audio => StreamSpec::Audio,
        _ => StreamSpec::Text,
    })
}

/// Build the stream list for `:call`
///
/// No arguments proposes chat. A leading `+` keeps the chat default and
/// adds the listed kinds; otherwise the listed kinds replace it.
fn parse_stream_specs(args: &[&str]) -> ClientResult<Vec<StreamSpec>> {
    if args.is_empty() {
        return Ok(vec![StreamSpec::Chat]);
    }
    let mut specs = Vec::new();
    if args[0].starts_with('+') {
        specs.push(StreamSpec::Chat);
    }
    for arg in args {
        specs.push(stream_spec_from_word(arg)?);
    }
    Ok(specs)
}

/// Parse an operator-supplied target address
///
/// `user@host[:port]`, with a bare `user` completed against the local
/// account's domain. A `sip:` scheme prefix is tolerated.
pub fn parse_target(text: &str, default_host: &str) -> ClientResult<SipAddress> {
    let text = text.trim().trim_start_matches("sip:");
    if text.is_empty() {
        return Err(ClientError::command("Please provide a target address"));
    }
    let (user, host) = match text.split_once('@') {
        Some((user, host)) => (user, host),
        None => (text, default_host),
    };
    let (host, port) = match host.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                ClientError::command(format!("Cannot understand port in {:?}", text))
            })?;
            (host, Some(port))
        }
        None => (host, None),
    };
    if user.is_empty() || host.is_empty() {
        return Err(ClientError::command(format!(
            "Cannot understand address {:?}",
            text
        )));
    }
    Ok(SipAddress {
        user: user.to_string(),
        host: host.to_string(),
        port,
        display: None,
    })
}

/// Map a keypad letter to its DTMF digit
fn char_to_digit(key: char) -> Option<char> {
    match key {
        '0'..='9' | '*' | '#' => Some(key),
        'A'..='C' => Some('2'),
        'D'..='F' => Some('3'),
        'G'..='I' => Some('4'),
        'J'..='L' => Some('5'),
        'M'..='O' => Some('6'),
        'P'..='S' => Some('7'),
        'T'..='V' => Some('8'),
        'W'..='Z' => Some('9'),
        _ => None,
    }
}
