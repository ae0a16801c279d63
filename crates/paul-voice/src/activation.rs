//! **ActivationListener** — always-on listening for the activation phrase.
//!
//! Owned by the control task. Every (re)start advances the listener epoch; authorization
//! results, recognition results, and scheduled retries carry the epoch they were issued
//! under and are ignored once it is no longer current. Failures tear the physical session
//! down and schedule a retry after a fixed backoff, without a retry ceiling.

use crate::audio::{AudioChunk, AudioTap, Microphone, MicrophoneAccess};
use crate::capture::CapturedAudio;
use crate::config::VoiceConfig;
use crate::error::VoiceResult;
use crate::event::{ActivationEvent, ControlEvent};
use crate::generation::{Generation, GenerationCounter};
use crate::services::Transcription;
use crate::silence::SilenceGate;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output of a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Partial or final text heard.
    Text(String),
    /// Recoverable failure; the session is over.
    Error(String),
}

/// Turns microphone frames into text. The session ends when `frames` closes.
pub trait PhraseRecognizer: Send + Sync {
    fn start_session(
        &self,
        frames: mpsc::UnboundedReceiver<AudioChunk>,
    ) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>>;
}

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Lowercased activation phrase.
    pub phrase: String,
    pub retry_backoff: Duration,
    /// Settle time between authorization and opening the tap.
    pub start_delay: Duration,
}

impl ListenerSettings {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            phrase: config.activation_phrase.trim().to_lowercase(),
            retry_backoff: config.activation_retry_backoff(),
            start_delay: config.activation_start_delay(),
        }
    }
}

struct ListenerSession {
    tap: Box<dyn AudioTap>,
    forwarder: JoinHandle<()>,
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct ActivationListener {
    settings: ListenerSettings,
    microphone: Arc<dyn Microphone>,
    recognizer: Arc<dyn PhraseRecognizer>,
    access: Arc<dyn MicrophoneAccess>,
    events: mpsc::UnboundedSender<ControlEvent>,
    epochs: GenerationCounter,
    should_listen: bool,
    listening: bool,
    session: Option<ListenerSession>,
}

impl ActivationListener {
    pub fn new(
        settings: ListenerSettings,
        microphone: Arc<dyn Microphone>,
        recognizer: Arc<dyn PhraseRecognizer>,
        access: Arc<dyn MicrophoneAccess>,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            settings,
            microphone,
            recognizer,
            access,
            events,
            epochs: GenerationCounter::new(),
            should_listen: false,
            listening: false,
            session: None,
        }
    }

    /// Start listening. Without `force`, a listener that is already up is left alone.
    pub fn start(&mut self, force: bool) {
        if self.listening && !force {
            debug!(epoch = %self.epochs.current(), "Activation listener already running");
            return;
        }
        self.session.take();
        self.should_listen = true;
        self.listening = true;
        let generation = self.epochs.advance();
        info!(epoch = %generation, force, "👂 Activation listener starting");

        let access = Arc::clone(&self.access);
        let events = self.events.clone();
        let delay = self.settings.start_delay;
        tokio::spawn(async move {
            let granted = access.authorize().await;
            if granted && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = events.send(ControlEvent::Activation(ActivationEvent::Authorized {
                generation,
                granted,
            }));
        });
    }

    /// Stop listening on request. The recovery supervisor leaves a stopped listener alone.
    pub fn stop(&mut self) {
        self.should_listen = false;
        self.listening = false;
        let generation = self.epochs.advance();
        if self.session.take().is_some() {
            info!(epoch = %generation, "🛑 Activation listener stopped");
        }
    }

    /// Apply a listener event. Returns true when the activation phrase was heard.
    pub fn handle(&mut self, event: ActivationEvent) -> bool {
        match event {
            ActivationEvent::Authorized { generation, granted } => {
                if !self.accepts(generation) {
                    debug!(epoch = %generation, "Stale authorization ignored");
                    return false;
                }
                if granted {
                    self.open_session(generation);
                } else {
                    warn!("Microphone access denied");
                    self.fail(generation);
                }
                false
            }
            ActivationEvent::Recognized { generation, text } => {
                if !self.accepts(generation) || self.session.is_none() {
                    debug!(epoch = %generation, "Stale recognition ignored");
                    return false;
                }
                if text.to_lowercase().contains(&self.settings.phrase) {
                    info!(epoch = %generation, heard = %text, "✅ Activation phrase detected");
                    self.stop();
                    return true;
                }
                debug!(heard = %text, "No activation phrase");
                false
            }
            ActivationEvent::RecognitionFailed { generation, message } => {
                if !self.accepts(generation) || self.session.is_none() {
                    return false;
                }
                warn!(epoch = %generation, "Recognition failed: {}", message);
                self.fail(generation);
                false
            }
            ActivationEvent::RetryDue { generation } => {
                if !self.accepts(generation) {
                    debug!(epoch = %generation, "Stale retry ignored");
                    return false;
                }
                self.start(false);
                false
            }
        }
    }

    /// Restart when the engine died underneath an active session (device sleep/wake).
    /// Returns true if a restart was issued.
    pub fn check_health(&mut self) -> bool {
        let dead = self
            .session
            .as_ref()
            .map_or(false, |s| !s.tap.is_running());
        if self.should_listen && dead {
            warn!(epoch = %self.epochs.current(), "Audio engine stopped unexpectedly, restarting listener");
            self.start(true);
            return true;
        }
        false
    }

    pub fn generation(&self) -> Generation {
        self.epochs.current()
    }

    /// Started and not stopped or failed since.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// A physical session (tap plus recognizer) is open.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn accepts(&self, generation: Generation) -> bool {
        self.should_listen && self.epochs.is_current(generation)
    }

    fn open_session(&mut self, generation: Generation) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let tap = match self.microphone.open_tap(frames_tx) {
            Ok(tap) => tap,
            Err(e) => {
                warn!("Listener could not open microphone: {}", e);
                self.fail(generation);
                return;
            }
        };
        let mut results = match self.recognizer.start_session(frames_rx) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Recognizer failed to start: {}", e);
                drop(tap);
                self.fail(generation);
                return;
            }
        };

        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                let event = match result {
                    RecognitionEvent::Text(text) => ActivationEvent::Recognized { generation, text },
                    RecognitionEvent::Error(message) => {
                        ActivationEvent::RecognitionFailed { generation, message }
                    }
                };
                if events.send(ControlEvent::Activation(event)).is_err() {
                    return;
                }
            }
            // Recognizer gone without a word: frames closed under it (device lost or never opened).
            let _ = events.send(ControlEvent::Activation(ActivationEvent::RecognitionFailed {
                generation,
                message: "recognition session ended".to_string(),
            }));
        });
        self.session = Some(ListenerSession { tap, forwarder });
        info!(epoch = %generation, "👂 Listening for \"{}\"", self.settings.phrase);
    }

    /// Tear the session down and retry under the same epoch after the backoff.
    fn fail(&mut self, generation: Generation) {
        self.session.take();
        self.listening = false;
        let events = self.events.clone();
        let backoff = self.settings.retry_backoff;
        info!(epoch = %generation, ?backoff, "Activation listener retry scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = events.send(ControlEvent::Activation(ActivationEvent::RetryDue { generation }));
        });
    }
}

/// Phrase recognizer built on the transcription service: segments speech with a short
/// silence gate and transcribes each segment.
pub struct TranscribingRecognizer {
    transcription: Arc<dyn Transcription>,
    threshold: f32,
    pause: Duration,
    max_segment: Duration,
}

impl TranscribingRecognizer {
    pub fn new(transcription: Arc<dyn Transcription>, threshold: f32) -> Self {
        Self {
            transcription,
            threshold,
            pause: Duration::from_millis(800),
            max_segment: Duration::from_secs(6),
        }
    }

    /// Silence that closes a segment.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Segments are cut at this length even without a pause.
    pub fn with_max_segment(mut self, max_segment: Duration) -> Self {
        self.max_segment = max_segment;
        self
    }
}

impl PhraseRecognizer for TranscribingRecognizer {
    fn start_session(
        &self,
        mut frames: mpsc::UnboundedReceiver<AudioChunk>,
    ) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transcription = Arc::clone(&self.transcription);
        let mut gate = SilenceGate::new(self.threshold, self.pause, true);
        let max_segment = self.max_segment;

        tokio::spawn(async move {
            let mut segment: Vec<f32> = Vec::new();
            while let Some(chunk) = frames.recv().await {
                let edge = gate.process(&chunk.samples);
                if !gate.speech_detected() {
                    continue;
                }
                segment.extend_from_slice(&chunk.samples);
                let limit = max_segment.as_secs_f64() * chunk.sample_rate as f64;
                if !edge && (segment.len() as f64) < limit {
                    continue;
                }
                gate.reset();
                let audio = CapturedAudio {
                    samples: std::mem::take(&mut segment),
                    sample_rate: chunk.sample_rate,
                    captured_at: Utc::now(),
                };
                match transcription.transcribe(&audio).await {
                    Ok(text) if text.trim().is_empty() => {}
                    Ok(text) => {
                        if tx.send(RecognitionEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(RecognitionEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}
