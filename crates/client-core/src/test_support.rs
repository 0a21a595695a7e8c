//! Scripted mock implementations of the engine and console boundaries
//!
//! Compiled only for tests. The engine records every command it receives
//! as a flat string so assertions can grep them; the console replays a
//! scripted list of answers and captures everything printed.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::console::Console;
use crate::engine::{
    SessionId, SignalingEngine, SipAddress, StreamKind, StreamSpec, TraceCategory,
};
use crate::error::ClientResult;
use crate::session::SessionContext;
use crate::transfer::TransferProgress;

pub(crate) struct MockEngine {
    commands: Mutex<Vec<String>>,
    accept_delay: Mutex<Option<Duration>>,
    traces: Mutex<HashSet<TraceCategory>>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            accept_delay: Mutex::new(None),
            traces: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub(crate) fn clear_commands(&self) {
        self.commands.lock().expect("commands lock").clear();
    }

    pub(crate) fn set_accept_delay(&self, delay: Duration) {
        *self.accept_delay.lock().expect("delay lock") = Some(delay);
    }

    fn record(&self, command: String) {
        self.commands.lock().expect("commands lock").push(command);
    }
}

fn kinds_text(kinds: &[StreamKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.label())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl SignalingEngine for MockEngine {
    async fn start_session(
        &self,
        target: SipAddress,
        streams: Vec<StreamSpec>,
    ) -> ClientResult<SessionId> {
        let kinds: Vec<StreamKind> = streams.iter().map(StreamSpec::kind).collect();
        self.record(format!(
            "start_session {} {}",
            target.identity(),
            kinds_text(&kinds)
        ));
        Ok(SessionId::new())
    }

    async fn accept_session(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        let delay = *self.accept_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("accept_session {} {}", session, kinds_text(&streams)));
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> ClientResult<()> {
        self.record(format!("end_session {}", session));
        Ok(())
    }

    async fn accept_proposal(
        &self,
        session: SessionId,
        streams: Vec<StreamKind>,
    ) -> ClientResult<()> {
        self.record(format!(
            "accept_proposal {} {}",
            session,
            kinds_text(&streams)
        ));
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

    fn toggle_trace(&self, category: TraceCategory) -> bool {
        let mut traces = self.traces.lock().expect("traces lock");
        if traces.remove(&category) {
            false
        } else {
            traces.insert(category);
            true
        }
    }

    async fn stop_accounts(&self) -> ClientResult<()> {
        self.record("stop_accounts".to_string());
        Ok(())
    }
}

pub(crate) struct MockConsole {
    answers: Mutex<VecDeque<char>>,
    questions: Mutex<Vec<String>>,
    printed: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockConsole {
    pub(crate) fn new() -> Self {
        Self::with_answers(&[])
    }

    pub(crate) fn with_answers(answers: &[char]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            questions: Mutex::new(Vec::new()),
            printed: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn printed(&self) -> Vec<String> {
        self.printed.lock().expect("printed lock").clone()
    }

    pub(crate) fn printed_contains(&self, needle: &str) -> bool {
        self.printed().iter().any(|line| line.contains(needle))
    }

    pub(crate) fn questions(&self) -> Vec<String> {
        self.questions.lock().expect("questions lock").clone()
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().expect("prompts lock").last().cloned()
    }
}

#[async_trait]
impl Console for MockConsole {
    async fn ask_question(&self, question: &str, _answers: &[char]) -> ClientResult<char> {
        self.questions
            .lock()
            .expect("questions lock")
            .push(question.to_string());
        let next = self.answers.lock().expect("answers lock").pop_front();
        match next {
            Some(answer) => Ok(answer),
            // No scripted answer: behave like an operator who never types.
            None => std::future::pending().await,
        }
    }

    fn set_prompt(&self, prompt: &str) {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
    }

    fn print(&self, line: &str) {
        self.printed
            .lock()
            .expect("printed lock")
            .push(line.to_string());
    }
}

pub(crate) struct MockSetup {
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) engine: Arc<MockEngine>,
    pub(crate) console: Arc<MockConsole>,
    pub(crate) dir: tempfile::TempDir,
}

pub(crate) fn test_context_with(answers: &[char]) -> MockSetup {
    let engine = Arc::new(MockEngine::new());
    let console = Arc::new(MockConsole::with_answers(answers));
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = Arc::new(SessionContext {
        engine: engine.clone(),
        console: console.clone(),
        progress: TransferProgress::new(),
        history_root: dir.path().to_path_buf(),
        local: SipAddress::new("anonymous", "localhost"),
    });
    MockSetup {
        ctx,
        engine,
        console,
        dir,
    }
}

pub(crate) fn test_context() -> (
    Arc<SessionContext>,
    Arc<MockEngine>,
    Arc<MockConsole>,
    tempfile::TempDir,
) {
    let setup = test_context_with(&[]);
    (setup.ctx, setup.engine, setup.console, setup.dir)
}
