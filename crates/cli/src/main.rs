//! sipterm: interactive console client
//!
//! Composition root: parses options, loads settings, wires the console and
//! the loopback engine into the orchestration layer, and runs the read
//! loop until the operator leaves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use sipterm_client_core::{
    commands, Client, ClientResult, Console, EventBus, Settings, SignalingEngine, TraceCategory,
    CTRL_D,
};

mod console;
mod loopback;

use console::{AnswerOutcome, InputEvent, ReadlineConsole};
use loopback::LoopbackEngine;

/// Interactive console client for sessions, chat and file transfer
///
/// Sits idle waiting for incoming session requests, or starts a session
/// towards the given target address. Ctrl-D ends the current session, or
/// quits when none is active.
#[derive(Debug, Parser)]
#[command(name = "sipterm", version)]
struct Options {
    /// Account to use, as user@domain
    #[arg(short = 'a', long, value_name = "ACCOUNT")]
    account_name: Option<String>,

    /// Path to a configuration file overriding the default location
    #[arg(short = 'c', long, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Do not register the account on startup
    #[arg(long)]
    no_register: bool,

    /// Dump signaling traffic
    #[arg(short = 's', long)]
    trace_sip: bool,

    /// Dump media/data channel traffic
    #[arg(short = 'm', long)]
    trace_media: bool,

    /// Print engine event notifications
    #[arg(long)]
    trace_events: bool,

    /// Target address, optionally followed by stream kinds or a file name
    #[arg(value_name = "TARGET")]
    args: Vec<String>,
}

fn load_settings(options: &Options) -> anyhow::Result<Settings> {
    let config_path = options
        .config_file
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("sipterm/config.toml")));

    let mut settings = match &config_path {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))?
        }
        _ => {
            // No config file: fall back to platform directories.
            let downloads = dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"));
            let history = dirs::data_dir()
                .map(|dir| dir.join("sipterm/history"))
                .unwrap_or_else(|| PathBuf::from("history"));
            Settings::new()
                .with_download_directory(downloads)
                .with_history_directory(history)
        }
    };

    if let Some(account) = &options.account_name {
        let (user, host) = account
            .split_once('@')
            .with_context(|| format!("account must be user@domain, got {:?}", account))?;
        settings.account.user = user.to_string();
        settings.account.host = host.to_string();
    }
    if options.no_register {
        settings.account.register = false;
    }
    settings.trace.sip |= options.trace_sip;
    settings.trace.media |= options.trace_media;
    settings.trace.events |= options.trace_events;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sipterm=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    let settings = load_settings(&options)?;

    let bus = EventBus::default();
    let console = ReadlineConsole::new();
    let engine = LoopbackEngine::new(bus.clone(), settings.account.id());
    let client = Client::new(
        settings.clone(),
        engine.clone(),
        console.clone(),
        bus.clone(),
    );
    let dispatch = client.start();

    println!("Using account {}", settings.account.id());
    if settings.trace.sip {
        engine.toggle_trace(TraceCategory::Sip);
    }
    if settings.trace.media {
        engine.toggle_trace(TraceCategory::Media);
    }
    if settings.trace.events {
        engine.toggle_trace(TraceCategory::Events);
    }
    if settings.account.register {
        engine.register();
    }

    println!("Type :help to get information about commands and shortcuts");
    if options.args.is_empty() {
        println!("Waiting for incoming session requests...");
    } else {
        run_initial_command(&client, &options.args).await;
    }

    run_loop(&client, &console).await;

    println!("Disconnecting...");
    client.shutdown().await;
    dispatch.abort();
    Ok(())
}

/// Interpret command-line target arguments the way the read loop would
///
/// `sipterm bob@example.com notes.txt` transfers the file; anything else
/// is an outgoing call with optional stream kinds.
async fn run_initial_command(client: &Arc<Client>, args: &[String]) {
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    let result = if words.len() == 2 && std::path::Path::new(words[1]).is_file() {
        client.commands().run_command("transfer", &words).await
    } else {
        client.commands().run_command("call", &words).await
    };
    report(result);
}

async fn run_loop(client: &Arc<Client>, console: &Arc<ReadlineConsole>) {
    let (tx, mut rx) = mpsc::channel(8);
    let _input = console::spawn_input_thread(console.clone(), tx);

    while let Some(event) = rx.recv().await {
        match event {
            InputEvent::Line(line) => handle_line(client, console, &line).await,
            InputEvent::Eof => {
                if console.try_answer_key(CTRL_D) == AnswerOutcome::Answered {
                    continue;
                }
                // Ctrl-D ends the current session, or quits with none left.
                let Some(session) = client.manager().current_session() else {
                    break;
                };
                if let Err(error) = session.end().await {
                    report::<()>(Err(error));
                }
                client.manager().remove(session.id());
            }
            InputEvent::Interrupted => break,
            InputEvent::Error(message) => {
                eprintln!("{}", format!("console error: {}", message).red());
                break;
            }
        }
    }
}

async fn handle_line(client: &Arc<Client>, console: &Arc<ReadlineConsole>, line: &str) {
    match console.try_answer(line) {
        AnswerOutcome::Answered => return,
        AnswerOutcome::NotAccepted => {
            console.print("That is not one of the accepted answers.");
            return;
        }
        AnswerOutcome::NoQuestion => {}
    }

    // Single-keystroke shortcuts arrive as one-character lines.
    let mut chars = line.chars();
    if let (Some(key), None) = (chars.next(), chars.next()) {
        if commands::shortcuts().contains(&key) {
            report(client.commands().run_shortcut(key).await);
            return;
        }
    }

    if let Some(rest) = line.strip_prefix(':') {
        let mut words = rest.split_whitespace();
        if let Some(name) = words.next() {
            if commands::find_command(name).is_some() {
                let args: Vec<&str> = words.collect();
                report(client.commands().run_command(name, &args).await);
                return;
            }
        }
    }

    if !line.trim().is_empty() {
        report(client.commands().send_message_line(line).await);
    }
}

fn report<T>(result: ClientResult<T>) {
    if let Err(error) = result {
        if error.is_user_error() {
            println!("{}", error);
        } else {
            println!("{}", error.to_string().red());
        }
    }
}
