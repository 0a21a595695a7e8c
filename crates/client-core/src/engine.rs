//! Boundary to the external signaling/media engine
//!
//! The orchestration layer never touches the wire protocol. It reacts to
//! already-parsed [`EngineEvent`](crate::events::EngineEvent)s and issues
//! already-defined commands through the [`SignalingEngine`] trait. Anything
//! behind that trait (dialog establishment, codec negotiation, transports)
//! is somebody else's problem.
//!
//! Identifiers are opaque UUIDs handed out by the engine; the client only
//! ever compares and forwards them.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClientResult;
use crate::transfer::FileSelector;

/// Identifies one signaling dialogue with a remote party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh session identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one media/data channel within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Generate a fresh stream identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account identity in `user@host` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a party: `user@host` plus optional display name and port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipAddress {
    /// User part
    pub user: String,
    /// Host part
    pub host: String,
    /// Port, when not the protocol default
    pub port: Option<u16>,
    /// Display name, when known
    pub display: Option<String>,
}

impl SipAddress {
    /// Create an address for `user@host`
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: None,
            display: None,
        }
    }

    /// Set the display name
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// The bare `user@host` identity, without display name or port
    pub fn identity(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for SipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(display) => write!(f, "{} ({}@{})", display, self.user, self.host),
            None => write!(f, "{}@{}", self.user, self.host),
        }
    }
}

/// Kinds of media/data channels carried within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    /// Instant messaging channel
    Chat,
    /// Audio channel
    Audio,
    /// Inbound file transfer
    FileIncoming,
    /// Outbound file transfer
    FileOutgoing,
    /// Real-time text channel
    Text,
}

impl StreamKind {
    /// Lowercase label used in commands and messages
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Chat => "chat",
            StreamKind::Audio => "audio",
            StreamKind::FileIncoming => "file-incoming",
            StreamKind::FileOutgoing => "file-outgoing",
            StreamKind::Text => "text",
        }
    }

    /// Capitalized label for operator-facing text
    pub fn title(&self) -> &'static str {
        match self {
            StreamKind::Chat => "Chat",
            StreamKind::Audio => "Audio",
            StreamKind::FileIncoming => "File",
            StreamKind::FileOutgoing => "File",
            StreamKind::Text => "Text",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One stream as reported by the engine
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Stream identifier assigned by the engine
    pub id: StreamId,
    /// Channel kind
    pub kind: StreamKind,
    /// Declared file metadata, present on file-transfer streams
    pub selector: Option<FileSelector>,
}

impl StreamInfo {
    /// Create stream info without a file selector
    pub fn new(id: StreamId, kind: StreamKind) -> Self {
        Self {
            id,
            kind,
            selector: None,
        }
    }

    /// Create stream info carrying a file selector
    pub fn with_selector(id: StreamId, kind: StreamKind, selector: FileSelector) -> Self {
        Self {
            id,
            kind,
            selector: Some(selector),
        }
    }
}

/// A stream requested from the engine when starting or extending a session
#[derive(Debug, Clone)]
pub enum StreamSpec {
    /// Instant messaging channel
    Chat,
    /// Audio channel
    Audio,
    /// Real-time text channel
    Text,
    /// Offer a local file to the remote party
    FileOffer {
        /// Declared metadata for the offered file
        selector: FileSelector,
        /// Local path the engine reads the content from
        source: PathBuf,
    },
}

impl StreamSpec {
    /// The channel kind this spec resolves to
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamSpec::Chat => StreamKind::Chat,
            StreamSpec::Audio => StreamKind::Audio,
            StreamSpec::Text => StreamKind::Text,
            StreamSpec::FileOffer { .. } => StreamKind::FileOutgoing,
        }
    }

    /// The file selector carried by this spec, if any
    pub fn selector(&self) -> Option<&FileSelector> {
        match self {
            StreamSpec::FileOffer { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

/// Protocol trace categories togglable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    /// Raw signaling traffic
    Sip,
    /// Media/data channel traffic
    Media,
    /// Engine event notifications
    Events,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Sip => write!(f, "SIP"),
            TraceCategory::Media => write!(f, "media"),
            TraceCategory::Events => write!(f, "event"),
        }
    }
}

/// Commands the orchestration layer issues to the engine
///
/// Implementations confirm commands asynchronously by emitting events on
/// the bus; a returned `Ok(())` only means the command was taken, not that
/// the remote party agreed to anything.
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    /// Start an outgoing session towards `target` with the given streams
    async fn start_session(
        &self,
        target: SipAddress,
        streams: Vec<StreamSpec>,
    ) -> ClientResult<SessionId>;

    /// Accept an incoming session, keeping only the listed stream kinds
    async fn accept_session(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()>;

    /// Request termination of a session
    async fn end_session(&self, session: SessionId) -> ClientResult<()>;

    /// Accept a mid-session stream-add proposal with the chosen subset
    async fn accept_proposal(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()>;

    /// Reject a mid-session stream-add proposal, giving the remote a reason
    async fn reject_proposal(&self, session: SessionId, reason: &str) -> ClientResult<()>;

    /// Put a session on hold
    async fn hold(&self, session: SessionId) -> ClientResult<()>;

    /// Take a session out of hold
    async fn unhold(&self, session: SessionId) -> ClientResult<()>;

    /// Send a chat message on the session's messaging stream
    async fn send_message(
        &self,
        session: SessionId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> ClientResult<()>;

    /// Send one DTMF digit over the session's audio stream
    async fn send_dtmf(&self, session: SessionId, digit: char) -> ClientResult<()>;

    /// Start recording the session's audio
    async fn start_recording(&self, session: SessionId) -> ClientResult<()>;

    /// Stop recording the session's audio
    async fn stop_recording(&self, session: SessionId) -> ClientResult<()>;

    /// Propose adding a stream to an established session
    async fn add_stream(&self, session: SessionId, stream: StreamSpec) -> ClientResult<()>;

    /// Propose removing a stream kind from an established session
    async fn remove_stream(&self, session: SessionId, kind: StreamKind) -> ClientResult<()>;

    /// Toggle a protocol trace category, returning the new state
    fn toggle_trace(&self, category: TraceCategory) -> bool;

    /// Ask the account layer to stop all registrations
    async fn stop_accounts(&self) -> ClientResult<()>;
}
