//! Session registry and prompt derivation
//!
//! [`SessionManager`] tracks every live session, the current selection, and
//! the status prompt derived from them. All list mutations are synchronous
//! and each one recomputes the prompt before returning, so the operator
//! never observes a half-updated state.

use std::sync::{Arc, RwLock};

use futures::future::join_all;

use crate::engine::{SessionId, SipAddress};
use crate::session::{SessionContext, SessionController};

struct Tracked {
    sessions: Vec<Arc<SessionController>>,
    current: Option<usize>,
}

/// Registry of live sessions and the current selection
pub struct SessionManager {
    ctx: Arc<SessionContext>,
    tracked: RwLock<Tracked>,
}

impl SessionManager {
    /// Create an empty manager and publish the idle prompt
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        let manager = Arc::new(Self {
            ctx,
            tracked: RwLock::new(Tracked {
                sessions: Vec::new(),
                current: None,
            }),
        });
        manager.update_prompt();
        manager
    }

    /// Append a session; optionally make it current
    pub fn add(&self, session: Arc<SessionController>, make_current: bool) {
        {
            let mut tracked = self.tracked.write().unwrap_or_else(|e| e.into_inner());
            tracked.sessions.push(session);
            if make_current || tracked.current.is_none() {
                tracked.current = Some(tracked.sessions.len() - 1);
            }
        }
        self.update_prompt();
    }

    /// Remove a session by identity
    ///
    /// Removing an unknown session is reported and otherwise ignored. When
    /// the removed session was current, the session now occupying the same
    /// index (modulo the new length) becomes current, so removing the last
    /// entry wraps the selection to the first.
    pub fn remove(&self, id: SessionId) {
        {
            let mut tracked = self.tracked.write().unwrap_or_else(|e| e.into_inner());
            let Some(index) = tracked.sessions.iter().position(|s| s.id() == id) else {
                tracing::debug!(session = %id, "remove: session not tracked");
                return;
            };
            tracked.sessions.remove(index);
            if tracked.sessions.is_empty() {
                tracked.current = None;
            } else {
                match tracked.current {
                    Some(current) if current == index => {
                        tracked.current = Some(index % tracked.sessions.len());
                    }
                    Some(current) if current > index => {
                        tracked.current = Some(current - 1);
                    }
                    _ => {}
                }
            }
        }
        self.update_prompt();
    }

    /// Advance the current selection to the next session, wrapping
    pub fn switch_next(&self) {
        {
            let mut tracked = self.tracked.write().unwrap_or_else(|e| e.into_inner());
            if tracked.sessions.len() < 2 {
                self.ctx
                    .console
                    .print("There's no other session to switch to.");
                return;
            }
            let next = match tracked.current {
                Some(current) => (current + 1) % tracked.sessions.len(),
                None => 0,
            };
            tracked.current = Some(next);
        }
        self.update_prompt();
    }

    /// The current session, if any
    pub fn current_session(&self) -> Option<Arc<SessionController>> {
        let tracked = self.tracked.read().unwrap_or_else(|e| e.into_inner());
        tracked
            .current
            .and_then(|index| tracked.sessions.get(index).cloned())
    }

    /// The current session, or a user error when there is none
    pub fn require_current(&self) -> crate::error::ClientResult<Arc<SessionController>> {
        self.current_session()
            .ok_or(crate::error::ClientError::NoActiveSession)
    }

    /// Look up a tracked session by identity
    pub fn find(&self, id: SessionId) -> Option<Arc<SessionController>> {
        self.tracked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sessions
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.tracked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sessions
            .len()
    }

    /// Whether no session is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derive the status prompt
    ///
    /// With a current session: its fragment, prefixed with `i/N ` when more
    /// than one session is tracked. With none: the local account identity,
    /// `user@host>` with the port appended when it is not a default one.
    pub fn prompt_text(&self) -> String {
        let tracked = self.tracked.read().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = tracked
            .current
            .and_then(|index| tracked.sessions.get(index))
        {
            let mut prefix = String::new();
            if tracked.sessions.len() > 1 {
                let position = tracked
                    .current
                    .map(|index| index + 1)
                    .unwrap_or(1);
                prefix = format!("{}/{} ", position, tracked.sessions.len());
            }
            return format!("{}{}", prefix, current.prompt_fragment());
        }
        drop(tracked);
        format!("{}> ", account_prompt(&self.ctx.local))
    }

    /// Push the freshly derived prompt to the console
    pub fn update_prompt(&self) {
        let prompt = self.prompt_text();
        self.ctx.console.set_prompt(&prompt);
    }

    /// Request the end of every tracked session and wait for completion
    ///
    /// End requests run concurrently; the list is cleared and the prompt
    /// recomputed before waiting, so no further command can address a
    /// session that is going away.
    pub async fn close(&self) {
        let sessions: Vec<Arc<SessionController>> = {
            let mut tracked = self.tracked.write().unwrap_or_else(|e| e.into_inner());
            tracked.current = None;
            tracked.sessions.drain(..).collect()
        };
        self.update_prompt();
        let results = join_all(sessions.iter().map(|session| session.end())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(error) = result {
                tracing::warn!(session = %session.id(), %error, "end request failed");
            }
        }
    }
}

fn account_prompt(local: &SipAddress) -> String {
    match local.port {
        Some(port) if port != 0 && port != 5060 => {
            format!("{}@{}:{}", local.user, local.host, port)
        }
        _ => format!("{}@{}", local.user, local.host),
    }
}
