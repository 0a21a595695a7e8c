//! Interactive console boundary
//!
//! The orchestration layer talks to the operator exclusively through this
//! trait: questions during proposal arbitration, prompt updates after state
//! changes, and plain output lines. Line editing and rendering live in the
//! binary; tests script the whole surface.

use async_trait::async_trait;

use crate::error::ClientResult;

/// Ctrl-D, accepted as a negative answer to any question
pub const CTRL_D: char = '\x04';

/// Escape key
pub const KEY_ESCAPE: char = '\x1b';

/// The interactive surface the client drives
#[async_trait]
pub trait Console: Send + Sync {
    /// Present `question` and resolve with the first key among `answers`
    ///
    /// This is a suspension point: the future completes when the operator
    /// presses one of the accepted keys. Implementations must be
    /// cancel-safe; dropping the future releases the prompt exactly once
    /// and leaves no partially consumed input behind.
    async fn ask_question(&self, question: &str, answers: &[char]) -> ClientResult<char>;

    /// Replace the status prompt
    fn set_prompt(&self, prompt: &str);

    /// Print one line of operator-visible output
    fn print(&self, line: &str);
}
