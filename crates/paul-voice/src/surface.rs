//! Presentation seam: whatever shows the assistant (overlay window, LED ring, or just
//! the log). The conversation drives it from state entry effects.

use tracing::info;

pub trait Surface: Send + Sync {
    /// Full-size presence (wake, first listen, thinking, speaking).
    fn show(&self);
    /// Reduced presence while the follow-up window is open.
    fn show_mini(&self);
    fn hide(&self);
    fn set_subtitle(&self, text: &str);
    /// What the user said.
    fn set_transcript(&self, text: &str);
    /// Clear subtitle and transcript.
    fn clear_content(&self);
    /// Keep the display awake and prevent idle sleep.
    fn acquire_wake_lock(&self);
    fn release_wake_lock(&self);
}

/// Headless surface that narrates to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSurface;

impl Surface for TracingSurface {
    fn show(&self) {
        info!("👁️ Surface: show");
    }

    fn show_mini(&self) {
        info!("👁️ Surface: mini");
    }

    fn hide(&self) {
        info!("👁️ Surface: hide");
    }

    fn set_subtitle(&self, text: &str) {
        if !text.is_empty() {
            info!("💬 {}", text);
        }
    }

    fn set_transcript(&self, text: &str) {
        info!("🗣️ {}", text);
    }

    fn clear_content(&self) {}

    fn acquire_wake_lock(&self) {}

    fn release_wake_lock(&self) {}
}
