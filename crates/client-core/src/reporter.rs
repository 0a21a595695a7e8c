//! Operator-facing status lines for engine transitions
//!
//! One-line reports for session, hold, and registration transitions.
//! Protocol-level logging stays in the engine; this module only translates
//! events the operator cares about into console text.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::console::Console;
use crate::engine::AccountId;
use crate::events::Originator;

/// Prints status transitions to the console
pub struct Reporter {
    console: Arc<dyn Console>,
    seen_registrations: Mutex<HashSet<String>>,
}

impl Reporter {
    /// Create a reporter
    pub fn new(console: Arc<dyn Console>) -> Arc<Self> {
        Arc::new(Self {
            console,
            seen_registrations: Mutex::new(HashSet::new()),
        })
    }

    /// A session finished establishing
    pub fn session_started(&self, remote: &str) {
        self.console
            .print(&format!("Session with {} established", remote));
    }

    /// A session ended normally
    pub fn session_ended(&self, originator: Originator, duration: Option<chrono::Duration>) {
        let after = duration
            .map(|d| format!(" after {}", format_duration(d)))
            .unwrap_or_default();
        match originator {
            Originator::Local => self
                .console
                .print(&format!("Session ended by local party{}.", after)),
            Originator::Remote => self
                .console
                .print(&format!("Session ended by remote party{}.", after)),
        }
    }

    /// A session ended with a failure
    pub fn session_failed(&self, code: Option<u32>, reason: &str) {
        match code {
            Some(code) => self
                .console
                .print(&format!("Session failed: {} {}", code, reason)),
            None => self.console.print(&format!("Session failed: {}", reason)),
        }
    }

    /// A hold request was processed
    pub fn hold_changed(&self, originator: Originator, on_hold: bool) {
        let line = match (originator, on_hold) {
            (Originator::Local, true) => "Session is put on hold",
            (Originator::Local, false) => "Session is taken out of hold",
            (Originator::Remote, true) => "Remote party has put the session on hold",
            (Originator::Remote, false) => "Remote party has taken the session out of hold",
        };
        self.console.print(line);
    }

    /// A registration became active
    ///
    /// Engines re-confirm registrations on every refresh; identical lines
    /// are printed once until a failure clears the memory.
    pub fn registration_succeeded(&self, account: &AccountId, contact: &str, expires: u32) {
        let line = format!(
            "Registered contact \"{}\" for {} (expires in {} seconds)",
            contact, account, expires
        );
        let mut seen = self
            .seen_registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if seen.insert(line.clone()) {
            self.console.print(&line);
        }
    }

    /// A registration attempt failed
    pub fn registration_failed(
        &self,
        account: &AccountId,
        reason: &str,
        retry_in: Option<Duration>,
    ) {
        self.seen_registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let retry = retry_in
            .map(|d| format!(" Retrying in {:.2} seconds.", d.as_secs_f64()))
            .unwrap_or_default();
        self.console.print(&format!(
            "Failed to register contact for {}: {}.{}",
            account, reason, retry
        ));
    }

    /// A registration ended
    pub fn registration_ended(&self, code: Option<u32>, reason: Option<&str>) {
        match (code, reason) {
            (Some(code), Some(reason)) => self
                .console
                .print(&format!("Registration ended: {} {}.", code, reason)),
            _ => self.console.print("Registration ended."),
        }
    }
}

/// Render a call duration the way operators expect to read it
fn format_duration(duration: chrono::Duration) -> String {
    let days = duration.num_days();
    let total_seconds = duration.num_seconds().max(0);
    let minutes = (total_seconds / 60) % (24 * 60);
    let seconds = total_seconds % 60;
    let mut text = String::new();
    if days > 0 {
        text.push_str(&format!("{} days, ", days));
    }
    if total_seconds > 60 {
        text.push_str(&format!("{} minutes, ", minutes));
    }
    text.push_str(&format!("{} seconds", seconds));
    text
}
