//! State machines that advance jobs and links one tick at a time.
//!
//! A tick starts from a row the caller has already claimed. Every write is
//! conditional on the status the tick started from; losing that race ends
//! the tick with [`Transition::Lost`] and leaves the row to whoever won.

mod job;
mod link;

pub use job::{JobMachine, RetryPolicy};
pub use link::LinkMachine;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    Moved { from: S, to: S },
    /// Another writer changed the row first.
    Lost,
    /// Nothing to do for a row in this state.
    Idle,
}

impl<S: Copy + PartialEq> Transition<S> {
    pub fn moved(from: S, to: S) -> Self {
        Self::Moved { from, to }
    }

    /// The state the row ended in, if this tick moved it.
    pub fn target(&self) -> Option<S> {
        match self {
            Self::Moved { to, .. } => Some(*to),
            _ => None,
        }
    }
}
