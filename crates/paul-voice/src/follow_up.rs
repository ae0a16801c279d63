//! **FollowUpSupervisor** — single-slot deferred "return to standby" timer.
//!
//! Arming always cancels the previous timer first, so at most one is pending. A fired
//! timer only reaches the control task as `FollowUpElapsed`; the orchestrator applies its
//! veto before acting on it.

use crate::event::ControlEvent;
use crate::generation::{Generation, GenerationCounter};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct FollowUpSupervisor {
    duration: Duration,
    events: mpsc::UnboundedSender<ControlEvent>,
    generations: GenerationCounter,
    pending: Option<(Generation, JoinHandle<()>)>,
}

impl FollowUpSupervisor {
    pub fn new(duration: Duration, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            duration,
            events,
            generations: GenerationCounter::new(),
            pending: None,
        }
    }

    /// (Re)start the timer.
    pub fn arm(&mut self) -> Generation {
        self.cancel();
        let tag = self.generations.advance();
        let events = self.events.clone();
        let duration = self.duration;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = events.send(ControlEvent::FollowUpElapsed { generation: tag });
        });
        debug!(follow_up = %tag, ?duration, "Follow-up timer armed");
        self.pending = Some((tag, handle));
        tag
    }

    /// Invalidate the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some((tag, handle)) = self.pending.take() {
            handle.abort();
            debug!(follow_up = %tag, "Follow-up timer cancelled");
        }
        self.generations.advance();
    }

    /// Claim a fired timer. False for a timer that was cancelled or re-armed meanwhile.
    pub fn accept(&mut self, tag: Generation) -> bool {
        match &self.pending {
            Some((pending, _)) if *pending == tag && self.generations.is_current(tag) => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for FollowUpSupervisor {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}
