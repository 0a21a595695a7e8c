//! Loopback engine
//!
//! A [`SignalingEngine`] that confirms every command by emitting the
//! matching events on the bus, so the binary runs end to end without a
//! protocol stack: outgoing sessions establish against a local echo peer,
//! chat messages come back echoed, and registrations succeed immediately.
//! Useful for demos and for exercising the whole dispatch path by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use sipterm_client_core::{
    AccountId, ClientResult, EngineEvent, EventBus, MessageChunk, Originator, SessionId,
    SessionState, SignalingEngine, SipAddress, StreamId, StreamInfo, StreamKind, StreamSpec,
    TraceCategory,
};

/// How long the fake peer waits before answering
const ECHO_DELAY: Duration = Duration::from_millis(150);

/// Event-echoing engine for local operation
pub struct LoopbackEngine {
    bus: EventBus,
    account: AccountId,
    sessions: Mutex<HashMap<SessionId, Vec<StreamInfo>>>,
    traces: Mutex<Vec<TraceCategory>>,
    message_counter: Mutex<u64>,
}

impl LoopbackEngine {
    /// Create an engine emitting onto `bus`
    pub fn new(bus: EventBus, account: AccountId) -> Arc<Self> {
        Arc::new(Self {
            bus,
            account,
            sessions: Mutex::new(HashMap::new()),
            traces: Mutex::new(Vec::new()),
            message_counter: Mutex::new(0),
        })
    }

    /// Announce the local account as registered
    pub fn register(&self) {
        self.bus.emit(EngineEvent::AccountRegistrationDidSucceed {
            account: self.account.clone(),
            contact: format!("sip:{}", self.account),
            expires: 600,
        });
    }

    fn streams_of(&self, session: SessionId) -> Vec<StreamInfo> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }

    fn next_message_id(&self) -> String {
        let mut counter = self
            .message_counter
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *counter += 1;
        format!("loopback-{}", counter)
    }

    /// Emit the establishment sequence after a short delay, so the caller
    /// has registered the session before the events land.
    fn establish_later(&self, session: SessionId) {
        let bus = self.bus.clone();
        let streams = self.streams_of(session);
        tokio::spawn(async move {
            tokio::time::sleep(ECHO_DELAY).await;
            bus.emit(EngineEvent::SessionGotStreamsUpdate { session, streams });
            bus.emit(EngineEvent::SessionDidStart { session });
            bus.emit(EngineEvent::SessionChangedState {
                session,
                state: SessionState::Established,
            });
        });
    }
}

#[async_trait]
impl SignalingEngine for LoopbackEngine {
    async fn start_session(
        &self,
        target: SipAddress,
        streams: Vec<StreamSpec>,
    ) -> ClientResult<SessionId> {
        let session = SessionId::new();
        let infos: Vec<StreamInfo> = streams
            .iter()
            .map(|spec| match spec.selector() {
                Some(selector) => {
                    StreamInfo::with_selector(StreamId::new(), spec.kind(), selector.clone())
                }
                None => StreamInfo::new(StreamId::new(), spec.kind()),
            })
            .collect();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session, infos);
        tracing::info!(%session, target = %target.identity(), "loopback session started");
        self.establish_later(session);
        Ok(session)
    }

    async fn accept_session(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        let infos: Vec<StreamInfo> = streams
            .iter()
            .map(|kind| StreamInfo::new(StreamId::new(), *kind))
            .collect();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session, infos);
        self.establish_later(session);
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> ClientResult<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session);
        self.bus.emit(EngineEvent::SessionChangedState {
            session,
            state: SessionState::Ended,
        });
        self.bus.emit(EngineEvent::SessionDidEnd {
            session,
            originator: Originator::Local,
        });
        Ok(())
    }

    async fn accept_proposal(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.entry(session).or_default();
        for kind in streams {
            entry.push(StreamInfo::new(StreamId::new(), kind));
        }
        let streams = entry.clone();
        drop(sessions);
        self.bus
            .emit(EngineEvent::SessionGotStreamsUpdate { session, streams });
        Ok(())
    }

    async fn reject_proposal(&self, session: SessionId, reason: &str) -> ClientResult<()> {
        tracing::info!(%session, reason, "proposal rejected");
        Ok(())
    }

    async fn hold(&self, session: SessionId) -> ClientResult<()> {
        self.bus.emit(EngineEvent::SessionGotHoldRequest {
            session,
            originator: Originator::Local,
        });
        Ok(())
    }

    async fn unhold(&self, session: SessionId) -> ClientResult<()> {
        self.bus.emit(EngineEvent::SessionGotUnholdRequest {
            session,
            originator: Originator::Local,
        });
        Ok(())
    }

    async fn send_message(
        &self,
        session: SessionId,
        text: &str,
        _timestamp: DateTime<Utc>,
    ) -> ClientResult<()> {
        let Some(chat) = self
            .streams_of(session)
            .into_iter()
            .find(|info| info.kind == StreamKind::Chat)
        else {
            return Ok(());
        };
        let payload = format!("echo: {}", text);
        let message_id = self.next_message_id();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ECHO_DELAY).await;
            let bytes = Bytes::from(payload.into_bytes());
            bus.emit(EngineEvent::ChatGotMessage {
                session,
                stream: chat.id,
                chunk: MessageChunk {
                    range_start: 1,
                    range_end: bytes.len() as u64,
                    total: Some(bytes.len() as u64),
                    content_type: "text/plain".to_string(),
                    message_id,
                    payload: bytes,
                    terminal: true,
                },
                sender: Some(SipAddress::new("echo", "local")),
                timestamp: Some(Utc::now()),
            });
        });
        Ok(())
    }

    async fn send_dtmf(&self, session: SessionId, digit: char) -> ClientResult<()> {
        tracing::info!(%session, digit = %digit, "dtmf sent");
        Ok(())
    }

    async fn start_recording(&self, session: SessionId) -> ClientResult<()> {
        tracing::info!(%session, "recording started");
        Ok(())
    }

    async fn stop_recording(&self, session: SessionId) -> ClientResult<()> {
        tracing::info!(%session, "recording stopped");
        Ok(())
    }

    async fn add_stream(&self, session: SessionId, stream: StreamSpec) -> ClientResult<()> {
        // The echo peer agrees to everything.
        self.accept_proposal(session, vec![stream.kind()]).await
    }

    async fn remove_stream(&self, session: SessionId, kind: StreamKind) -> ClientResult<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(streams) = sessions.get_mut(&session) {
            streams.retain(|info| info.kind != kind);
            let streams = streams.clone();
            drop(sessions);
            self.bus
                .emit(EngineEvent::SessionGotStreamsUpdate { session, streams });
        }
        Ok(())
    }

    fn toggle_trace(&self, category: TraceCategory) -> bool {
        let mut traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = traces.iter().position(|c| *c == category) {
            traces.remove(index);
            false
        } else {
            traces.push(category);
            true
        }
    }

    async fn stop_accounts(&self) -> ClientResult<()> {
        self.bus.emit(EngineEvent::AccountRegistrationDidEnd {
            account: self.account.clone(),
            code: Some(200),
            reason: Some("shutdown".to_string()),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_messages_come_back_echoed() {
        let bus = EventBus::new(64);
        let engine = LoopbackEngine::new(bus.clone(), AccountId("me@local".into()));
        let mut rx = bus.subscribe();

        let session = engine
            .start_session(SipAddress::new("echo", "local"), vec![StreamSpec::Chat])
            .await
            .unwrap();
        engine.send_message(session, "hi", Utc::now()).await.unwrap();

        let mut saw_echo = false;
        for _ in 0..8 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Ok(EngineEvent::ChatGotMessage { chunk, .. })) => {
                    assert_eq!(&chunk.payload[..], b"echo: hi");
                    saw_echo = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_echo, "echo message never arrived");
    }

    #[tokio::test]
    async fn ending_a_session_emits_the_end_sequence() {
        let bus = EventBus::new(64);
        let engine = LoopbackEngine::new(bus.clone(), AccountId("me@local".into()));
        let mut rx = bus.subscribe();

        let session = engine
            .start_session(SipAddress::new("echo", "local"), vec![StreamSpec::Chat])
            .await
            .unwrap();
        engine.end_session(session).await.unwrap();

        let mut states = Vec::new();
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
        {
            match event {
                EngineEvent::SessionChangedState { state, .. } => states.push(state.to_string()),
                EngineEvent::SessionDidEnd { originator, .. } => {
                    assert_eq!(originator, Originator::Local);
                    break;
                }
                _ => {}
            }
        }
        assert!(states.contains(&"ENDED".to_string()));
    }
}
