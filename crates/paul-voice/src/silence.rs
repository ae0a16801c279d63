//! **SilenceGate** — RMS envelope detector that turns a stream of frames into one
//! "utterance ended" edge.
//!
//! A frame whose RMS is below the threshold starts (or continues) a silence run; any
//! louder frame clears it. When a silence run reaches the configured duration the gate
//! fires once and resets. In `wait_for_speech` mode no silence run can start until the
//! first loud frame has been seen.

use std::time::{Duration, Instant};

/// Root-mean-square amplitude of a frame (0.0 for an empty frame).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[derive(Debug, Clone)]
pub struct SilenceGate {
    threshold: f32,
    duration: Duration,
    wait_for_speech: bool,
    silence_started: Option<Instant>,
    speech_detected: bool,
}

impl SilenceGate {
    pub fn new(threshold: f32, duration: Duration, wait_for_speech: bool) -> Self {
        Self {
            threshold,
            duration,
            wait_for_speech,
            silence_started: None,
            speech_detected: false,
        }
    }

    /// Feed one frame captured now. Returns true exactly on the silence edge.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        self.process_at(samples, Instant::now())
    }

    /// Feed one frame captured at `now`.
    pub fn process_at(&mut self, samples: &[f32], now: Instant) -> bool {
        if rms(samples) >= self.threshold {
            self.speech_detected = true;
            self.silence_started = None;
            return false;
        }
        if self.wait_for_speech && !self.speech_detected {
            return false;
        }
        match self.silence_started {
            None => {
                self.silence_started = Some(now);
                if self.duration.is_zero() {
                    self.silence_started = None;
                    return true;
                }
                false
            }
            Some(started) if now.duration_since(started) >= self.duration => {
                self.silence_started = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Forget the current silence run and any detected speech.
    pub fn reset(&mut self) {
        self.silence_started = None;
        self.speech_detected = false;
    }

    /// Whether any frame has exceeded the threshold since the last reset.
    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> Vec<f32> {
        vec![0.5; 160]
    }

    fn quiet() -> Vec<f32> {
        vec![0.001; 160]
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn fires_once_after_duration_of_silence() {
        let start = Instant::now();
        let mut gate = SilenceGate::new(0.01, Duration::from_secs(4), false);
        assert!(!gate.process_at(&quiet(), start));
        assert!(!gate.process_at(&quiet(), start + Duration::from_secs(2)));
        assert!(gate.process_at(&quiet(), start + Duration::from_secs(4)));
        // Reset after firing: the next quiet frame starts a new run.
        assert!(!gate.process_at(&quiet(), start + Duration::from_secs(5)));
    }

    #[test]
    fn loud_frame_clears_the_silence_run() {
        let start = Instant::now();
        let mut gate = SilenceGate::new(0.01, Duration::from_secs(4), false);
        gate.process_at(&quiet(), start);
        gate.process_at(&loud(), start + Duration::from_secs(3));
        assert!(!gate.process_at(&quiet(), start + Duration::from_secs(5)));
        assert!(gate.process_at(&quiet(), start + Duration::from_secs(9)));
    }

    #[test]
    fn wait_for_speech_suppresses_arming_until_first_speech() {
        let start = Instant::now();
        let mut gate = SilenceGate::new(0.01, Duration::from_secs(1), true);
        for i in 0..10 {
            assert!(!gate.process_at(&quiet(), start + Duration::from_secs(i)));
        }
        assert!(!gate.speech_detected());
        gate.process_at(&loud(), start + Duration::from_secs(10));
        assert!(gate.speech_detected());
        assert!(!gate.process_at(&quiet(), start + Duration::from_secs(11)));
        assert!(gate.process_at(&quiet(), start + Duration::from_secs(12)));
    }

    #[test]
    fn zero_duration_fires_on_first_quiet_frame() {
        let mut gate = SilenceGate::new(0.01, Duration::ZERO, false);
        assert!(gate.process(&quiet()));
        assert!(!gate.process(&loud()));
    }
}
