//! Transcript and reply filters.
//!
//! Speech-to-text models hallucinate stock phrases ("Untertitel von amara.org") on silence
//! or noise. Such transcripts end the turn without a reply; they are not errors.

use crate::config::VoiceConfig;

/// Outcome of checking a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Trimmed transcript worth sending to the reasoning service.
    Accepted(String),
    Empty,
    TooShort,
    /// Matched the denylist entry carried here.
    Hallucination(String),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptFilter {
    denylist: Vec<String>,
    min_chars: usize,
}

impl TranscriptFilter {
    pub fn new(denylist: Vec<String>, min_chars: usize) -> Self {
        let denylist = denylist
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { denylist, min_chars }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(
            config.hallucination_denylist.clone(),
            config.min_transcript_chars,
        )
    }

    pub fn check(&self, transcript: &str) -> Verdict {
        let cleaned = transcript.trim();
        if cleaned.is_empty() {
            return Verdict::Empty;
        }
        if cleaned.chars().count() < self.min_chars {
            return Verdict::TooShort;
        }
        let lowered = cleaned.to_lowercase();
        if let Some(hit) = self.denylist.iter().find(|d| lowered.contains(d.as_str())) {
            return Verdict::Hallucination(hit.clone());
        }
        Verdict::Accepted(cleaned.to_string())
    }
}

/// Replies that should be replaced by a spoken fallback rather than played as-is.
pub fn is_placeholder_reply(reply: &str) -> bool {
    let r = reply.trim();
    r.is_empty() || r == "..." || r == "…" || r.chars().count() < 3
}
