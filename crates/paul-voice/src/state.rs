//! Conversation state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the assistant is in a turn. Exactly one value at any instant; initial is `Sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    /// Standby: only the activation listener runs.
    #[default]
    Sleep,
    /// Phrase detected, greeting playing.
    Waking,
    /// Capturing an utterance (first listen or follow-up).
    Listening,
    /// Waiting on the reasoning service.
    Thinking,
    /// Reply playing.
    Speaking,
}

impl ConversationState {
    pub fn description(self) -> &'static str {
        match self {
            ConversationState::Sleep => "sleep",
            ConversationState::Waking => "waking",
            ConversationState::Listening => "listening",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
        }
    }

    /// Any state in which a turn is in progress.
    pub fn is_active(self) -> bool {
        self != ConversationState::Sleep
    }

    /// States during which the follow-up timer must not put the assistant to sleep.
    pub fn is_busy(self) -> bool {
        matches!(self, ConversationState::Thinking | ConversationState::Speaking)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
