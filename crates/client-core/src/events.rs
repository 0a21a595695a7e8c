//! Typed engine events and the process-wide event bus
//!
//! Every notification the engine can emit is one variant of
//! [`EngineEvent`]; handlers are plain `match` arms, so the dispatch table
//! is statically checkable and there is no name-based lookup anywhere.
//! [`EventBus`] is a thin wrapper over a tokio broadcast channel: any
//! number of subscribers, each seeing events in emission order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::engine::{AccountId, SessionId, SipAddress, StreamId, StreamInfo, StreamKind};
use crate::transfer::MessageChunk;

/// Lifecycle states of a session as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Invitation sent or received, not yet answered
    Inviting,
    /// Media/data flowing
    Established,
    /// Put on hold by either party
    Hold,
    /// Terminated normally
    Ended,
    /// Terminated by a failure
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Inviting => write!(f, "INVITING"),
            SessionState::Established => write!(f, "ESTABLISHED"),
            SessionState::Hold => write!(f, "HOLD"),
            SessionState::Ended => write!(f, "ENDED"),
            SessionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Which side originated an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    /// This client
    Local,
    /// The remote party
    Remote,
}

/// Events delivered from the engine to the orchestration layer
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A remote party proposes a new session
    SessionNewIncoming {
        /// Session the proposal arrived on
        session: SessionId,
        /// Caller identity
        caller: SipAddress,
        /// Proposed streams
        streams: Vec<StreamInfo>,
    },
    /// A party proposes adding streams to an existing session
    SessionGotStreamProposal {
        /// Session the proposal applies to
        session: SessionId,
        /// Who proposed
        proposer: Originator,
        /// Proposed stream kinds
        streams: Vec<StreamKind>,
    },
    /// A session moved to a new lifecycle state
    SessionChangedState {
        /// Session that changed
        session: SessionId,
        /// New state
        state: SessionState,
    },
    /// A session finished establishing
    SessionDidStart {
        /// Session that started
        session: SessionId,
    },
    /// A session ended normally
    SessionDidEnd {
        /// Session that ended
        session: SessionId,
        /// Who ended it
        originator: Originator,
    },
    /// A session ended with a failure
    SessionDidFail {
        /// Session that failed
        session: SessionId,
        /// Numeric failure code, when the protocol carries one
        code: Option<u32>,
        /// Failure reason
        reason: String,
    },
    /// The engine replaced a session's stream set
    SessionGotStreamsUpdate {
        /// Session whose streams changed
        session: SessionId,
        /// The full new stream set
        streams: Vec<StreamInfo>,
    },
    /// A hold request was processed
    SessionGotHoldRequest {
        /// Session put on hold
        session: SessionId,
        /// Who requested the hold
        originator: Originator,
    },
    /// An unhold request was processed
    SessionGotUnholdRequest {
        /// Session taken out of hold
        session: SessionId,
        /// Who requested the unhold
        originator: Originator,
    },
    /// A chunk arrived on a messaging stream
    ChatGotMessage {
        /// Session the stream belongs to
        session: SessionId,
        /// Stream the chunk arrived on
        stream: StreamId,
        /// The chunk itself
        chunk: MessageChunk,
        /// Sender identity from the enclosing message, when present
        sender: Option<SipAddress>,
        /// Timestamp from the enclosing message, when present
        timestamp: Option<DateTime<Utc>>,
    },
    /// The remote party confirmed receipt of an outbound chunk
    ChatDidDeliverMessage {
        /// Session the stream belongs to
        session: SessionId,
        /// Stream the delivery applies to
        stream: StreamId,
        /// Highest byte position confirmed delivered
        range_end: u64,
    },
    /// An account registration became active
    AccountRegistrationDidSucceed {
        /// Account that registered
        account: AccountId,
        /// Contact the registrar bound
        contact: String,
        /// Registration lifetime in seconds
        expires: u32,
    },
    /// An account registration attempt failed
    AccountRegistrationDidFail {
        /// Account that failed to register
        account: AccountId,
        /// Failure reason
        reason: String,
        /// Delay before the engine retries, when it will
        retry_in: Option<Duration>,
    },
    /// An account registration ended
    AccountRegistrationDidEnd {
        /// Account whose registration ended
        account: AccountId,
        /// Protocol code, when the registrar supplied one
        code: Option<u32>,
        /// Reason, when the registrar supplied one
        reason: Option<String>,
    },
}

impl EngineEvent {
    /// The session this event concerns, if any
    pub fn session(&self) -> Option<SessionId> {
        match self {
            EngineEvent::SessionNewIncoming { session, .. }
            | EngineEvent::SessionGotStreamProposal { session, .. }
            | EngineEvent::SessionChangedState { session, .. }
            | EngineEvent::SessionDidStart { session }
            | EngineEvent::SessionDidEnd { session, .. }
            | EngineEvent::SessionDidFail { session, .. }
            | EngineEvent::SessionGotStreamsUpdate { session, .. }
            | EngineEvent::SessionGotHoldRequest { session, .. }
            | EngineEvent::SessionGotUnholdRequest { session, .. }
            | EngineEvent::ChatGotMessage { session, .. }
            | EngineEvent::ChatDidDeliverMessage { session, .. } => Some(*session),
            EngineEvent::AccountRegistrationDidSucceed { .. }
            | EngineEvent::AccountRegistrationDidFail { .. }
            | EngineEvent::AccountRegistrationDidEnd { .. } => None,
        }
    }
}

/// Process-wide publish/subscribe channel for engine events
///
/// Cloning is cheap; all clones feed the same channel. Subscribers only see
/// events emitted after they subscribe, so race-sensitive watchers must be
/// subscribed before the action they watch is started.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: EngineEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
