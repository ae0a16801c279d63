//! **Conversation** — the orchestrator that drives one turn at a time.
//!
//! ```text
//!  phrase / wake ─► Waking ─(greeting played)─► Listening ─(utterance)─► Thinking
//!        ▲                                          ▲                      │
//!        │                                          │ follow-up            ▼
//!      Sleep ◄──(filtered / timeout / escape)── playback complete ◄── Speaking
//! ```
//!
//! A single control task owns all state. Audio taps, network calls, and timers run
//! elsewhere and report back as [`ControlEvent`]s. Service results carry the request tag
//! they were issued under and are only applied while that request is still pending, so a
//! cancelled turn can never be resumed by a late reply.

use crate::activation::{ActivationListener, ListenerSettings};
use crate::capture::{CaptureSession, CapturedAudio};
use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::event::{ControlEvent, ConversationHandle};
use crate::filter::{is_placeholder_reply, TranscriptFilter, Verdict};
use crate::follow_up::FollowUpSupervisor;
use crate::generation::{Generation, GenerationCounter};
use crate::greeting::GreetingCache;
use crate::playback::PlaybackScheduler;
use crate::services::Services;
use crate::silence::SilenceGate;
use crate::state::ConversationState;
use crate::surface::Surface;
use futures::StreamExt;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Text being spoken in the current Speaking phase.
#[derive(Debug)]
struct Reply {
    text: String,
    apology: bool,
}

pub struct Conversation {
    config: VoiceConfig,
    services: Services,
    surface: Arc<dyn Surface>,
    events: mpsc::UnboundedSender<ControlEvent>,
    state: ConversationState,
    listener: ActivationListener,
    playback: PlaybackScheduler,
    follow_up: FollowUpSupervisor,
    greetings: GreetingCache,
    filter: TranscriptFilter,
    captures: GenerationCounter,
    capture: Option<CaptureSession>,
    requests: GenerationCounter,
    pending: Option<Generation>,
    reply: Option<Reply>,
}

impl Conversation {
    /// Build the orchestrator and the receiving end of its control channel.
    pub fn new(
        config: VoiceConfig,
        services: Services,
        surface: Arc<dyn Surface>,
    ) -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let listener = ActivationListener::new(
            ListenerSettings::from_config(&config),
            Arc::clone(&services.microphone),
            Arc::clone(&services.recognizer),
            Arc::clone(&services.access),
            events.clone(),
        );
        let playback = PlaybackScheduler::new(Arc::clone(&services.output), events.clone());
        let follow_up = FollowUpSupervisor::new(config.follow_up_timeout(), events.clone());
        let filter = TranscriptFilter::from_config(&config);
        let conversation = Self {
            config,
            services,
            surface,
            events,
            state: ConversationState::Sleep,
            listener,
            playback,
            follow_up,
            greetings: GreetingCache::new(),
            filter,
            captures: GenerationCounter::new(),
            capture: None,
            requests: GenerationCounter::new(),
            pending: None,
            reply: None,
        };
        (conversation, rx)
    }

    pub fn handle(&self) -> ConversationHandle {
        ConversationHandle::new(self.events.clone())
    }

    /// Start the activation listener and warm the greeting cache.
    pub fn start(&mut self) {
        info!(phrase = %self.config.activation_phrase, "🚀 Conversation starting");
        self.greetings.preload(
            Arc::clone(&self.services.synthesis),
            self.config.greetings.clone(),
        );
        self.listener.start(false);
    }

    /// Control loop: apply events in arrival order and run the listener recovery check.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
        self.start();
        let mut health = tokio::time::interval(self.config.activation_health_interval());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        health.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ControlEvent::Shutdown) | None => break,
                    Some(event) => self.dispatch(event),
                },
                _ = health.tick() => {
                    self.listener.check_health();
                }
            }
        }
        self.shutdown();
    }

    /// Apply one control event.
    pub fn dispatch(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Wake => self.on_wake(),
            ControlEvent::Escape => self.escape(),
            ControlEvent::Shutdown => self.shutdown(),
            ControlEvent::Activation(event) => {
                if self.listener.handle(event) {
                    self.on_wake();
                }
            }
            ControlEvent::SpeechStarted { capture } => {
                if let Some(session) = self.capture.as_mut() {
                    if session.generation() == capture {
                        debug!(capture = %capture, "Speech started");
                        session.mark_speech();
                    }
                }
            }
            ControlEvent::CaptureFinalized { capture, audio } => self.on_capture_finalized(capture, audio),
            ControlEvent::Transcribed { request, result } => {
                if self.claim(request) {
                    self.on_transcribed(result);
                }
            }
            ControlEvent::Replied { request, result } => {
                if self.claim(request) {
                    self.on_replied(result);
                }
            }
            ControlEvent::GreetingSynthesized { request, result } => {
                if self.claim(request) {
                    self.on_greeting_synthesized(result);
                }
            }
            ControlEvent::Synthesized { request, result } => {
                if self.claim(request) {
                    self.on_synthesized(result);
                }
            }
            ControlEvent::SynthesisChunk { request, pcm } => {
                if self.pending == Some(request) {
                    self.playback.schedule_chunk(pcm);
                } else {
                    debug!(request = %request, "Stale synthesis chunk dropped");
                }
            }
            ControlEvent::SynthesisFinished { request, error } => {
                if self.claim(request) {
                    self.on_synthesis_finished(error);
                }
            }
            ControlEvent::ChunkPlayed { playback } => {
                if self.playback.on_chunk_played(playback) {
                    self.on_playback_complete();
                }
            }
            ControlEvent::FollowUpElapsed { generation } => {
                if self.follow_up.accept(generation) {
                    self.on_follow_up_timeout();
                }
            }
        }
    }

    /// Veto-checked follow-up timeout: defer while the assistant is busy or the user is
    /// mid-utterance, otherwise go back to sleep.
    pub fn on_follow_up_timeout(&mut self) {
        if !self.state.is_active() {
            return;
        }
        if self.state.is_busy() {
            info!(state = %self.state, "Sleep deferred");
            self.follow_up.arm();
            return;
        }
        let mid_utterance = self
            .capture
            .as_ref()
            .map_or(false, |c| c.is_recording() && c.speech_detected());
        if mid_utterance {
            info!("Sleep deferred, user still speaking");
            self.follow_up.arm();
            return;
        }
        self.return_to_sleep();
    }

    /// Cancel the current turn from any non-sleep state.
    pub fn escape(&mut self) {
        if !self.state.is_active() {
            debug!("Escape ignored while asleep");
            return;
        }
        info!(state = %self.state, "⎋ Escape");
        self.playback.stop();
        self.return_to_sleep();
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn capture_active(&self) -> bool {
        self.capture.as_ref().map_or(false, |c| c.is_recording())
    }

    pub fn follow_up_armed(&self) -> bool {
        self.follow_up.is_armed()
    }

    pub fn playback_active(&self) -> bool {
        self.playback.is_active()
    }

    pub fn listener(&self) -> &ActivationListener {
        &self.listener
    }

    pub fn greetings(&self) -> &GreetingCache {
        &self.greetings
    }

    fn transition(&mut self, to: ConversationState) {
        let from = self.state;
        self.state = to;
        info!(from = %from, to = %to, "State transition");
        match to {
            ConversationState::Sleep => {
                self.surface.hide();
                self.surface.clear_content();
                self.follow_up.cancel();
                self.surface.release_wake_lock();
            }
            ConversationState::Waking => {
                self.surface.show();
                self.surface.clear_content();
                self.surface.acquire_wake_lock();
            }
            ConversationState::Listening => {
                // A pending follow-up timer stays armed.
                self.surface.show();
            }
            ConversationState::Thinking => {
                self.follow_up.cancel();
                self.surface.set_subtitle(&self.config.thinking_text);
            }
            ConversationState::Speaking => {}
        }
    }

    fn on_wake(&mut self) {
        if self.state.is_active() {
            debug!(state = %self.state, "Wake ignored mid-turn");
            return;
        }
        info!("🔔 Activated");
        self.listener.stop();
        self.transition(ConversationState::Waking);

        if let Some(audio) = self.greetings.pick() {
            debug!("Greeting from cache");
            self.playback.play_whole(audio);
            return;
        }
        let picked = self.config.greetings.choose(&mut rand::thread_rng()).cloned();
        let text = match picked {
            Some(text) => text,
            None => {
                self.begin_listening(false);
                return;
            }
        };
        debug!(greeting = %text, "Greeting cache miss, synthesizing");
        let request = self.issue();
        let synthesis = Arc::clone(&self.services.synthesis);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = synthesis.synthesize(&text).await;
            let _ = events.send(ControlEvent::GreetingSynthesized { request, result });
        });
    }

    fn on_greeting_synthesized(&mut self, result: VoiceResult<Vec<u8>>) {
        if self.state != ConversationState::Waking {
            return;
        }
        match result {
            Ok(audio) => {
                self.playback.play_whole(audio);
            }
            Err(e) => {
                warn!("Greeting synthesis failed, listening right away: {}", e);
                self.begin_listening(false);
            }
        }
    }

    fn begin_listening(&mut self, follow_up: bool) {
        if follow_up {
            self.surface.set_subtitle("");
        }
        self.transition(ConversationState::Listening);
        if follow_up {
            self.surface.show_mini();
        }
        if let Err(e) = self.start_capture(follow_up) {
            error!("Capture failed to start: {}", e);
            self.return_to_sleep();
            return;
        }
        if follow_up {
            self.follow_up.arm();
        }
    }

    fn start_capture(&mut self, wait_for_speech: bool) -> VoiceResult<()> {
        if self.capture_active() {
            debug!("Capture already running");
            return Ok(());
        }
        if self.listener.is_listening() {
            self.listener.stop();
        }
        let gate = SilenceGate::new(
            self.config.silence_threshold,
            self.config.silence_duration(),
            wait_for_speech,
        );
        let generation = self.captures.advance();
        let session = CaptureSession::start(
            self.services.microphone.as_ref(),
            gate,
            generation,
            self.events.clone(),
        )?;
        self.capture = Some(session);
        Ok(())
    }

    fn on_capture_finalized(&mut self, capture: Generation, audio: CapturedAudio) {
        let current = self
            .capture
            .as_ref()
            .map_or(false, |c| c.generation() == capture && c.is_recording());
        if !current || self.state == ConversationState::Sleep {
            debug!(capture = %capture, "Stale capture result ignored");
            return;
        }
        if let Some(mut session) = self.capture.take() {
            session.finish();
        }
        self.follow_up.cancel();
        info!(duration = ?audio.duration(), "Utterance captured");

        let request = self.issue();
        let transcription = Arc::clone(&self.services.transcription);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = transcription.transcribe(&audio).await;
            let _ = events.send(ControlEvent::Transcribed { request, result });
        });
    }

    fn on_transcribed(&mut self, result: VoiceResult<String>) {
        let transcript = match result {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed: {}", e);
                self.speak_apology();
                return;
            }
        };
        let text = match self.filter.check(&transcript) {
            Verdict::Accepted(text) => text,
            verdict => {
                info!(?verdict, transcript = %transcript, "Transcript filtered, going back to sleep");
                self.return_to_sleep();
                return;
            }
        };

        self.transition(ConversationState::Thinking);
        self.surface.set_transcript(&text);
        info!(transcript = %text, "Asking reasoning service");

        let request = self.issue();
        let reasoning = Arc::clone(&self.services.reasoning);
        let session_key = self.config.session_key.clone();
        let timeout = self.config.reasoning_timeout();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, reasoning.send(&text, &session_key)).await {
                Ok(result) => result,
                Err(_) => Err(VoiceError::Timeout),
            };
            let _ = events.send(ControlEvent::Replied { request, result });
        });
    }

    fn on_replied(&mut self, result: VoiceResult<String>) {
        match result {
            Ok(reply) if is_placeholder_reply(&reply) => {
                let fallback = self
                    .config
                    .no_answer_texts
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .unwrap_or_else(|| self.config.apology_text.clone());
                info!(reply = %reply, "Empty reply, using fallback");
                self.speak(fallback, false);
            }
            Ok(reply) => self.speak(reply, false),
            Err(e) => {
                warn!("Reasoning failed: {}", e);
                self.speak_apology();
            }
        }
    }

    fn speak_apology(&mut self) {
        let text = self.config.apology_text.clone();
        self.speak(text, true);
    }

    fn speak(&mut self, text: String, apology: bool) {
        self.transition(ConversationState::Speaking);
        self.surface.set_subtitle(&text);
        let streaming = self.config.streaming_tts && !apology;
        self.reply = Some(Reply {
            text: text.clone(),
            apology,
        });
        if streaming {
            self.synthesize_streaming(text);
        } else {
            self.synthesize_whole(text);
        }
    }

    fn synthesize_whole(&mut self, text: String) {
        let request = self.issue();
        let synthesis = Arc::clone(&self.services.synthesis);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = synthesis.synthesize(&text).await;
            let _ = events.send(ControlEvent::Synthesized { request, result });
        });
    }

    fn synthesize_streaming(&mut self, text: String) {
        let request = self.issue();
        self.playback.start();
        let synthesis = Arc::clone(&self.services.synthesis);
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut stream = match synthesis.synthesize_streaming(&text).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events.send(ControlEvent::SynthesisFinished { request, error: Some(e) });
                    return;
                }
            };
            let mut error = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(pcm) => {
                        if events.send(ControlEvent::SynthesisChunk { request, pcm }).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
            }
            let _ = events.send(ControlEvent::SynthesisFinished { request, error });
        });
    }

    fn on_synthesis_finished(&mut self, error: Option<VoiceError>) {
        if let Some(e) = error {
            if self.playback.scheduled_count() == 0 {
                warn!("Streaming synthesis failed before audio, retrying whole: {}", e);
                self.playback.stop();
                match self.reply.as_ref().map(|r| r.text.clone()) {
                    Some(text) => self.synthesize_whole(text),
                    None => self.on_playback_complete(),
                }
                return;
            }
            warn!("Streaming synthesis broke mid-reply: {}", e);
        }
        if self.playback.finish_stream() {
            self.on_playback_complete();
        }
    }

    fn on_synthesized(&mut self, result: VoiceResult<Vec<u8>>) {
        match result {
            Ok(audio) => {
                self.playback.play_whole(audio);
            }
            Err(e) => {
                let was_apology = self.reply.as_ref().map_or(true, |r| r.apology);
                warn!(apology = was_apology, "Synthesis failed: {}", e);
                if was_apology {
                    // Nothing left to say; the turn ends as if playback had finished.
                    self.on_playback_complete();
                } else {
                    self.speak_apology();
                }
            }
        }
    }

    fn on_playback_complete(&mut self) {
        match self.state {
            ConversationState::Waking => {
                debug!("Greeting played");
                self.begin_listening(false);
            }
            ConversationState::Speaking => {
                self.reply = None;
                if self.config.follow_up_enabled {
                    info!("Reply played, waiting for follow-up");
                    self.begin_listening(true);
                } else {
                    self.return_to_sleep();
                }
            }
            state => debug!(state = %state, "Playback completion ignored"),
        }
    }

    fn return_to_sleep(&mut self) {
        info!(from = %self.state, "💤 Returning to sleep");
        self.follow_up.cancel();
        // Invalidate the capture before teardown so a session finalizing right now is ignored.
        self.captures.advance();
        if let Some(mut session) = self.capture.take() {
            session.cancel();
        }
        self.pending = None;
        self.reply = None;
        self.transition(ConversationState::Sleep);
        self.listener.start(true);
    }

    fn shutdown(&mut self) {
        info!("Conversation shutting down");
        self.follow_up.cancel();
        self.capture.take();
        self.pending = None;
        self.playback.stop();
        self.listener.stop();
    }

    /// Tag a new outstanding request; it supersedes any previous one.
    fn issue(&mut self) -> Generation {
        let request = self.requests.advance();
        self.pending = Some(request);
        request
    }

    /// Accept a result only for the request still pending.
    fn claim(&mut self, request: Generation) -> bool {
        if self.pending == Some(request) {
            self.pending = None;
            true
        } else {
            debug!(request = %request, "Stale service result discarded");
            false
        }
    }
}
