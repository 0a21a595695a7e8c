//! Per-session state
//!
//! A [`SessionController`] owns everything the client tracks for one
//! signaling dialogue: the attached streams, hold and recording flags, and
//! the chat history log. It derives the operator-facing descriptor used in
//! the prompt and performs the chat-send path.
//!
//! Stream membership never changes piecemeal; the engine replaces the
//! stream set wholesale through
//! [`SessionGotStreamsUpdate`](crate::events::EngineEvent::SessionGotStreamsUpdate).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Local, Utc};

use crate::console::Console;
use crate::engine::{SessionId, SignalingEngine, SipAddress, StreamId, StreamInfo, StreamKind};
use crate::error::{ClientError, ClientResult};
use crate::events::SessionState;
use crate::renderer::format_outgoing_message;
use crate::transfer::{format_file_size, FileSelector, TransferProgress};

/// Whether the local or the remote party initiated the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    /// The remote party called us
    Incoming,
    /// We called the remote party
    Outgoing,
}

impl CallDirection {
    /// Lowercase label used in history file names
    pub fn label(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "incoming",
            CallDirection::Outgoing => "outgoing",
        }
    }
}

/// One media/data channel attached to a session
#[derive(Debug, Clone)]
pub struct Stream {
    /// Stream identifier
    pub id: StreamId,
    /// Channel kind
    pub kind: StreamKind,
    /// Declared file metadata on file-transfer streams
    pub selector: Option<FileSelector>,
}

impl From<StreamInfo> for Stream {
    fn from(info: StreamInfo) -> Self {
        Self {
            id: info.id,
            kind: info.kind,
            selector: info.selector,
        }
    }
}

/// Shared dependencies handed to every session-level component
///
/// Built once by the composition root and passed explicitly; nothing in the
/// crate reaches for process-wide state.
pub struct SessionContext {
    /// Command boundary to the engine
    pub engine: Arc<dyn SignalingEngine>,
    /// Operator-facing surface
    pub console: Arc<dyn Console>,
    /// Transfer progress counters shared with the reassembler
    pub progress: TransferProgress,
    /// Root directory for history logs
    pub history_root: PathBuf,
    /// Local account address
    pub local: SipAddress,
}

/// Chat history log for one session, one file per session
struct HistoryLog {
    file: File,
}

impl HistoryLog {
    /// Open the log under `<root>/<local>/<stamp>-<remote>-<direction>.txt`
    fn open(
        root: &Path,
        local: &str,
        remote: &str,
        direction: CallDirection,
    ) -> std::io::Result<Self> {
        let dir = root.join(local);
        fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{}-{}-{}.txt", stamp, remote, direction.label()));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn append(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.file, "{}", line)?;
        self.file.flush()
    }
}

enum HistorySlot {
    Unopened,
    Open(HistoryLog),
    Closed,
}

/// Live state of one session
pub struct SessionController {
    ctx: Arc<SessionContext>,
    id: SessionId,
    remote_party: SipAddress,
    direction: CallDirection,
    state: RwLock<SessionState>,
    established_at: RwLock<Option<DateTime<Utc>>>,
    streams: RwLock<Vec<Stream>>,
    on_hold: AtomicBool,
    recording: AtomicBool,
    history: Mutex<HistorySlot>,
}

impl SessionController {
    /// Create a controller for a session known to the engine
    pub fn new(
        ctx: Arc<SessionContext>,
        id: SessionId,
        remote_party: SipAddress,
        direction: CallDirection,
        streams: Vec<Stream>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            id,
            remote_party,
            direction,
            state: RwLock::new(SessionState::Inviting),
            established_at: RwLock::new(None),
            streams: RwLock::new(streams),
            on_hold: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            history: Mutex::new(HistorySlot::Unopened),
        })
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote party address
    pub fn remote_party(&self) -> &SipAddress {
        &self.remote_party
    }

    /// Call direction
    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn mark_established(&self) {
        self.set_state(SessionState::Established);
        let mut established = self
            .established_at
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if established.is_none() {
            *established = Some(Utc::now());
        }
    }

    /// How long the session has been established, if it is
    pub fn established_duration(&self) -> Option<chrono::Duration> {
        self.established_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| Utc::now() - at)
    }

    /// Snapshot of the attached streams
    pub fn streams(&self) -> Vec<Stream> {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the stream set wholesale
    pub fn set_streams(&self, streams: Vec<Stream>) {
        *self.streams.write().unwrap_or_else(|e| e.into_inner()) = streams;
    }

    /// Look up one attached stream by identity
    pub fn stream(&self, id: StreamId) -> Option<Stream> {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|stream| stream.id == id)
            .cloned()
    }

    /// Whether a stream of the given kind is attached
    pub fn has_stream(&self, kind: StreamKind) -> bool {
        self.streams
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|stream| stream.kind == kind)
    }

    /// Send a chat message on this session
    ///
    /// Fails with [`ClientError::NoChatStream`] when no chat stream is
    /// attached. On success the formatted line is echoed to the console and
    /// appended to the history log.
    pub async fn send_message(&self, text: &str) -> ClientResult<()> {
        if !self.has_stream(StreamKind::Chat) {
            return Err(ClientError::NoChatStream);
        }
        let now = Utc::now();
        self.ctx.engine.send_message(self.id, text, now).await?;
        let line = format_outgoing_message(&self.ctx.local, text, now);
        self.ctx.console.print(&line);
        self.append_history(&line);
        Ok(())
    }

    /// Put the session on hold
    pub async fn hold(&self) -> ClientResult<()> {
        self.ctx.engine.hold(self.id).await?;
        self.on_hold.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Take the session out of hold
    pub async fn unhold(&self) -> ClientResult<()> {
        self.ctx.engine.unhold(self.id).await?;
        self.on_hold.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Hold or unhold depending on the locally tracked flag
    pub async fn toggle_hold(&self) -> ClientResult<()> {
        if self.on_hold.load(Ordering::SeqCst) {
            self.unhold().await
        } else {
            self.hold().await
        }
    }

    /// Start or stop audio recording depending on the tracked flag
    pub async fn toggle_recording(&self) -> ClientResult<()> {
        if self.recording.load(Ordering::SeqCst) {
            self.ctx.engine.stop_recording(self.id).await?;
            self.recording.store(false, Ordering::SeqCst);
        } else {
            self.ctx.engine.start_recording(self.id).await?;
            self.recording.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Request termination and close the history log
    pub async fn end(&self) -> ClientResult<()> {
        let result = self.ctx.engine.end_session(self.id).await;
        self.close_history();
        result
    }

    /// Append one line to the history log, opening it on first use
    ///
    /// History failures are diagnostics, never fatal; the message itself was
    /// already delivered or displayed.
    pub fn append_history(&self, line: &str) {
        let mut slot = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if let HistorySlot::Unopened = *slot {
            match HistoryLog::open(
                &self.ctx.history_root,
                &self.ctx.local.identity(),
                &self.remote_party.identity(),
                self.direction,
            ) {
                Ok(log) => *slot = HistorySlot::Open(log),
                Err(error) => {
                    tracing::warn!(%error, "failed to open history log");
                    *slot = HistorySlot::Closed;
                }
            }
        }
        if let HistorySlot::Open(log) = &mut *slot {
            if let Err(error) = log.append(line) {
                tracing::warn!(%error, "failed to append to history log");
            }
        }
    }

    /// Close the history log; later appends are dropped
    pub fn close_history(&self) {
        let mut slot = self.history.lock().unwrap_or_else(|e| e.into_inner());
        *slot = HistorySlot::Closed;
    }

    /// Operator-facing summary of the attached streams
    pub fn descriptor(&self) -> String {
        let streams = self.streams();
        if streams.is_empty() {
            return "Session with no streams".to_string();
        }
        streams
            .iter()
            .map(|stream| self.describe_stream(stream))
            .collect::<Vec<_>>()
            .join("/")
    }

    fn describe_stream(&self, stream: &Stream) -> String {
        match stream.kind {
            StreamKind::Chat | StreamKind::Audio | StreamKind::Text => {
                stream.kind.title().to_string()
            }
            StreamKind::FileIncoming | StreamKind::FileOutgoing => {
                let Some(selector) = &stream.selector else {
                    return stream.kind.title().to_string();
                };
                let counter = match stream.kind {
                    StreamKind::FileIncoming => self.ctx.progress.received(stream.id),
                    _ => self.ctx.progress.sent(stream.id),
                };
                match (counter, selector.size) {
                    (Some(done), Some(size)) if size > 0 => {
                        let verb = match stream.kind {
                            StreamKind::FileIncoming => "Receiving",
                            _ => "Sending",
                        };
                        format!(
                            "{} {} {}% of {}",
                            verb,
                            selector.name,
                            done * 100 / size,
                            format_file_size(size)
                        )
                    }
                    _ => selector.to_string(),
                }
            }
        }
    }

    /// The prompt fragment for this session
    ///
    /// `<descriptor> to <remote>` plus a `[STATE]` annotation while the
    /// session is not established.
    pub fn prompt_fragment(&self) -> String {
        let mut text = format!("{} to {}", self.descriptor(), self.remote_party);
        let state = self.state();
        if state != SessionState::Established {
            text.push_str(&format!(" [{}]", state));
        }
        text.push_str(": ");
        text
    }
}
