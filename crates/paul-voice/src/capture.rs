//! **CaptureSession** — one recorded utterance.
//!
//! Opens a microphone tap, accumulates frames, and runs them through a [`SilenceGate`].
//! The silence edge (or the tap closing underneath) finalizes the session: the worker
//! reports the recorded audio to the control task and goes inert. Dropping or cancelling
//! the session releases the tap; events it already sent are rejected by their generation.

use crate::audio::{AudioChunk, AudioTap, Microphone};
use crate::error::VoiceResult;
use crate::event::ControlEvent;
use crate::generation::Generation;
use crate::silence::SilenceGate;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Audio recorded by one capture session.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Mono f32 PCM.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: DateTime<Utc>,
}

impl CapturedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub struct CaptureSession {
    generation: Generation,
    tap: Option<Box<dyn AudioTap>>,
    worker: JoinHandle<()>,
    recording: bool,
    speech_detected: bool,
}

impl CaptureSession {
    /// Open a tap and start recording. The caller guarantees no other tap is open.
    pub fn start(
        microphone: &dyn Microphone,
        mut gate: SilenceGate,
        generation: Generation,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> VoiceResult<Self> {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let tap = microphone.open_tap(frames_tx)?;
        gate.reset();
        info!(capture = %generation, "🎙️ Capture started");

        let worker = tokio::spawn(async move {
            let mut samples = Vec::new();
            let mut sample_rate = 0;
            let mut announced = false;
            while let Some(chunk) = frames_rx.recv().await {
                sample_rate = chunk.sample_rate;
                samples.extend_from_slice(&chunk.samples);
                if gate.process(&chunk.samples) {
                    debug!(capture = %generation, "Silence edge");
                    break;
                }
                if gate.speech_detected() && !announced {
                    announced = true;
                    let _ = events.send(ControlEvent::SpeechStarted { capture: generation });
                }
            }
            let audio = CapturedAudio {
                samples,
                sample_rate,
                captured_at: Utc::now(),
            };
            let _ = events.send(ControlEvent::CaptureFinalized {
                capture: generation,
                audio,
            });
        });

        Ok(Self {
            generation,
            tap: Some(tap),
            worker,
            recording: true,
            speech_detected: false,
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// True until the session finalized or was cancelled.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }

    pub(crate) fn mark_speech(&mut self) {
        self.speech_detected = true;
    }

    /// Stop capturing after the worker finalized. Releases the tap.
    pub fn finish(&mut self) {
        self.recording = false;
        self.tap.take();
    }

    /// Tear down without reporting a result.
    pub fn cancel(&mut self) {
        if self.recording {
            debug!(capture = %self.generation, "Capture cancelled");
        }
        self.recording = false;
        self.worker.abort();
        self.tap.take();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_audio_duration() {
        let audio = CapturedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 16_000,
            captured_at: Utc::now(),
        };
        assert_eq!(audio.duration(), Duration::from_millis(1500));
        let empty = CapturedAudio {
            samples: vec![],
            sample_rate: 0,
            captured_at: Utc::now(),
        };
        assert_eq!(empty.duration(), Duration::ZERO);
        assert!(empty.is_empty());
    }
}
