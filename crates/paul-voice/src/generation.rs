//! Generation tags for stale-callback suppression.
//!
//! Every restartable subsystem (activation listener, capture session, playback, follow-up
//! timer, pending reasoning request) owns a [`GenerationCounter`]. Asynchronous work is
//! tagged with the counter's value at submission time and the completion is compared
//! against the counter when it arrives back on the control task; a mismatch means the
//! work was superseded and the result is dropped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tag attached to one instantiation of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic counter owned by the control task. Not shared: only its tags leave the task.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: u64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every outstanding tag and return the new current one.
    pub fn advance(&mut self) -> Generation {
        self.current += 1;
        Generation(self.current)
    }

    pub fn current(&self) -> Generation {
        Generation(self.current)
    }

    pub fn is_current(&self, tag: Generation) -> bool {
        tag.0 == self.current
    }
}
