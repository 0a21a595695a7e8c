//! End-to-end dispatch tests against scripted engine and console mocks
//!
//! These drive the public surface only: events go in on the bus, commands
//! come out of the engine mock, text and prompts come out of the console
//! mock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use sipterm_client_core::{
    AccountSettings, Client, ClientResult, Console, EngineEvent, EventBus, MessageChunk,
    Originator, SessionId, SessionState, Settings, SignalingEngine, SipAddress, StreamId,
    StreamInfo, StreamKind, StreamSpec, TraceCategory,
};

#[derive(Default)]
struct RecordingEngine {
    commands: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl SignalingEngine for RecordingEngine {
    async fn start_session(
        &self,
        target: SipAddress,
        _streams: Vec<StreamSpec>,
    ) -> ClientResult<SessionId> {
        self.record(format!("start_session {}", target.identity()));
        Ok(SessionId::new())
    }

    async fn accept_session(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        let kinds: Vec<&str> = streams.iter().map(|k| k.label()).collect();
        self.record(format!("accept_session {} {}", session, kinds.join(",")));
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("end_session {}", session));
        Ok(())
    }

    async fn accept_proposal(
        &self,
        session: SessionId,
        _streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        self.record(format!("accept_proposal {}", session));
        Ok(())
    }

    async fn reject_proposal(&self, session: SessionId, reason: &str) -> ClientResult<()> {
        self.record(format!("reject_proposal {} {}", session, reason));
        Ok(())
    }

    async fn hold(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("hold {}", session));
        Ok(())
    }

    async fn unhold(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("unhold {}", session));
        Ok(())
    }

    async fn send_message(
        &self,
        session: SessionId,
        text: &str,
        _timestamp: DateTime<Utc>,
    ) -> ClientResult<()> {
        self.record(format!("send_message {} {}", session, text));
        Ok(())
    }

    async fn send_dtmf(&self, session: SessionId, digit: char) -> ClientResult<()> {
        self.record(format!("send_dtmf {} {}", session, digit));
        Ok(())
    }

    async fn start_recording(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("start_recording {}", session));
        Ok(())
    }

    async fn stop_recording(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("stop_recording {}", session));
        Ok(())
    }

    async fn add_stream(&self, session: SessionId, stream: StreamSpec) -> ClientResult<()> {
        self.record(format!("add_stream {} {}", session, stream.kind().label()));
        Ok(())
    }

    async fn remove_stream(&self, session: SessionId, kind: StreamKind) -> ClientResult<()> {
        self.record(format!("remove_stream {} {}", session, kind.label()));
        Ok(())
    }

    fn toggle_trace(&self, _category: TraceCategory) -> bool {
        true
    }

    async fn stop_accounts(&self) -> ClientResult<()> {
        self.record("stop_accounts".to_string());
        Ok(())
    }
}

struct ScriptedConsole {
    answers: Mutex<VecDeque<char>>,
    printed: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    fn new(answers: &[char]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            printed: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn printed_contains(&self, needle: &str) -> bool {
        self.printed
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(needle))
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn ask_question(&self, _question: &str, _answers: &[char]) -> ClientResult<char> {
        let next = self.answers.lock().unwrap().pop_front();
        match next {
            Some(answer) => Ok(answer),
            None => std::future::pending().await,
        }
    }

    fn set_prompt(&self, prompt: &str) {
        self.prompts.lock().unwrap().push(prompt.to_string());
    }

    fn print(&self, line: &str) {
        self.printed.lock().unwrap().push(line.to_string());
    }
}

struct Harness {
    client: Arc<Client>,
    engine: Arc<RecordingEngine>,
    console: Arc<ScriptedConsole>,
    bus: EventBus,
    _dir: tempfile::TempDir,
}

fn harness(answers: &[char]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new()
        .with_account(AccountSettings::new("operator", "example.com"))
        .with_download_directory(dir.path().join("downloads"))
        .with_history_directory(dir.path().join("history"))
        .with_accept_timeout(5);
    let engine = Arc::new(RecordingEngine::default());
    let console = Arc::new(ScriptedConsole::new(answers));
    let bus = EventBus::new(64);
    let client = Client::new(settings, engine.clone(), console.clone(), bus.clone());
    client.start();
    Harness {
        client,
        engine,
        console,
        bus,
        _dir: dir,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within the deadline");
}

fn incoming(session: SessionId, kinds: &[StreamKind]) -> EngineEvent {
    EngineEvent::SessionNewIncoming {
        session,
        caller: SipAddress::new("alice", "example.com"),
        streams: kinds
            .iter()
            .map(|kind| StreamInfo::new(StreamId::new(), *kind))
            .collect(),
    }
}

#[tokio::test]
async fn accepted_incoming_session_becomes_current() {
    let h = harness(&['y']);
    let session = SessionId::new();

    h.bus.emit(incoming(session, &[StreamKind::Chat]));
    wait_until(|| h.client.manager().len() == 1).await;

    let commands = h.engine.commands();
    assert_eq!(
        commands
            .iter()
            .filter(|cmd| cmd.starts_with("accept_session"))
            .count(),
        1
    );
    let current = h.client.manager().current_session().unwrap();
    assert_eq!(current.id(), session);
    assert_eq!(
        h.console.last_prompt().unwrap(),
        "Chat to alice@example.com [INVITING]: "
    );
}

#[tokio::test]
async fn remote_cancellation_wins_the_race_and_issues_nothing() {
    let h = harness(&[]); // the operator never answers
    let session = SessionId::new();

    h.bus.emit(incoming(session, &[StreamKind::Chat]));
    h.bus.emit(EngineEvent::SessionChangedState {
        session,
        state: SessionState::Ended,
    });

    // Give the arbitration task ample time to settle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.engine.commands().is_empty());
    assert!(h.client.manager().is_empty());
}

#[tokio::test]
async fn chat_lines_render_after_acceptance() {
    let h = harness(&['y']);
    let session = SessionId::new();
    let stream = StreamId::new();

    h.bus.emit(EngineEvent::SessionNewIncoming {
        session,
        caller: SipAddress::new("alice", "example.com"),
        streams: vec![StreamInfo::new(stream, StreamKind::Chat)],
    });
    wait_until(|| h.client.manager().len() == 1).await;

    h.bus.emit(EngineEvent::ChatGotMessage {
        session,
        stream,
        chunk: MessageChunk {
            range_start: 1,
            range_end: 5,
            total: None,
            content_type: "text/plain".to_string(),
            message_id: "m1".to_string(),
            payload: Bytes::from_static(b"hello"),
            terminal: false,
        },
        sender: None,
        timestamp: None,
    });
    wait_until(|| h.console.printed_contains("alice@example.com: hello")).await;
}

#[tokio::test]
async fn session_end_event_removes_and_reports() {
    let h = harness(&['y']);
    let session = SessionId::new();

    h.bus.emit(incoming(session, &[StreamKind::Chat]));
    wait_until(|| h.client.manager().len() == 1).await;

    h.bus.emit(EngineEvent::SessionDidEnd {
        session,
        originator: Originator::Remote,
    });
    wait_until(|| h.client.manager().is_empty()).await;
    assert!(h.console.printed_contains("ended by remote party"));
    // Back to the idle account prompt.
    assert_eq!(h.console.last_prompt().unwrap(), "operator@example.com> ");
}

#[tokio::test]
async fn shutdown_ends_sessions_then_stops_accounts() {
    let h = harness(&['y']);
    let session = SessionId::new();

    h.bus.emit(incoming(session, &[StreamKind::Chat]));
    wait_until(|| h.client.manager().len() == 1).await;

    h.client.shutdown().await;
    let commands = h.engine.commands();
    let end_at = commands
        .iter()
        .position(|cmd| cmd.starts_with("end_session"))
        .expect("session was ended");
    let stop_at = commands
        .iter()
        .position(|cmd| cmd == "stop_accounts")
        .expect("accounts were stopped");
    assert!(end_at < stop_at, "sessions end before accounts stop");
    assert!(h.client.manager().is_empty());
}
