//! Readline-backed console
//!
//! The terminal is owned by a dedicated input thread running rustyline; the
//! async side sees it only through [`ReadlineConsole`], which carries the
//! current prompt and at most one pending question. Lines typed while a
//! question is pending are routed to the question instead of the command
//! loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use sipterm_client_core::{ClientError, ClientResult, Console};

/// Input events delivered from the terminal thread
#[derive(Debug)]
pub enum InputEvent {
    /// One edited line, without the trailing newline
    Line(String),
    /// Ctrl-D on an empty line
    Eof,
    /// Ctrl-C
    Interrupted,
    /// The editor failed; the loop should stop
    Error(String),
}

/// Result of routing a line to the pending question
#[derive(Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// No question is pending; handle the line normally
    NoQuestion,
    /// The question consumed the input
    Answered,
    /// A question is pending but the input is not an accepted key
    NotAccepted,
}

struct PendingQuestion {
    answers: Vec<char>,
    tx: oneshot::Sender<char>,
}

/// Console implementation shared between the async client and the terminal
pub struct ReadlineConsole {
    prompt: Mutex<String>,
    pending: Mutex<Option<PendingQuestion>>,
}

impl ReadlineConsole {
    /// Create a console with an empty prompt
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prompt: Mutex::new(String::new()),
            pending: Mutex::new(None),
        })
    }

    /// The prompt the next readline call should display
    pub fn current_prompt(&self) -> String {
        self.prompt.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Route one input line to the pending question, if any
    pub fn try_answer(&self, line: &str) -> AnswerOutcome {
        let key = line.chars().next().unwrap_or('\n');
        self.try_answer_key(key)
    }

    /// Route one key to the pending question, if any
    pub fn try_answer_key(&self, key: char) -> AnswerOutcome {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.as_ref() {
            None => AnswerOutcome::NoQuestion,
            Some(question) if !question.answers.contains(&key) => AnswerOutcome::NotAccepted,
            Some(_) => {
                if let Some(question) = pending.take() {
                    // The asking task may have been cancelled meanwhile;
                    // a dead receiver is fine.
                    let _ = question.tx.send(key);
                }
                AnswerOutcome::Answered
            }
        }
    }
}

/// Clears the pending slot when the asking future goes away, answered or not
struct PendingGuard<'a> {
    console: &'a ReadlineConsole,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .console
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.take();
    }
}

#[async_trait]
impl Console for ReadlineConsole {
    async fn ask_question(&self, question: &str, answers: &[char]) -> ClientResult<char> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.is_some() {
                return Err(ClientError::internal("another question is already pending"));
            }
            *pending = Some(PendingQuestion {
                answers: answers.to_vec(),
                tx,
            });
        }
        self.print(question);
        let _guard = PendingGuard { console: self };
        rx.await
            .map_err(|_| ClientError::internal("console input closed"))
    }

    fn set_prompt(&self, prompt: &str) {
        *self.prompt.lock().unwrap_or_else(|e| e.into_inner()) = prompt.to_string();
    }

    fn print(&self, line: &str) {
        println!("{}", line);
    }
}

/// Spawn the dedicated terminal thread
///
/// The thread blocks in rustyline and forwards everything through the
/// channel; it exits when the receiving side is dropped.
pub fn spawn_input_thread(
    console: Arc<ReadlineConsole>,
    tx: mpsc::Sender<InputEvent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(error) => {
                let _ = tx.blocking_send(InputEvent::Error(error.to_string()));
                return;
            }
        };
        loop {
            let prompt = console.current_prompt();
            let event = match editor.readline(&prompt) {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    InputEvent::Line(line)
                }
                Err(rustyline::error::ReadlineError::Eof) => InputEvent::Eof,
                Err(rustyline::error::ReadlineError::Interrupted) => InputEvent::Interrupted,
                Err(error) => {
                    let _ = tx.blocking_send(InputEvent::Error(error.to_string()));
                    return;
                }
            };
            if tx.blocking_send(event).is_err() {
                return;
            }
        }
    })
}
