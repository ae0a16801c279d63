//! In-process fakes for every collaborator of the conversation core.

#![allow(dead_code)]

use async_trait::async_trait;
use paul_voice::{
    AudioByteStream, AudioChunk, AudioOutput, AudioTap, CapturedAudio, ControlEvent,
    Conversation, ConversationState, Microphone, MicrophoneAccess, PhraseRecognizer,
    PlaybackDone, ReasoningService, RecognitionEvent, Services, SpeechSynthesis, Surface,
    Transcription, VoiceConfig, VoiceError, VoiceResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("paul_voice=debug")
        .try_init();
}

/// Fast timings: instant silence edge, no settle delay, short retry backoff.
pub fn test_config() -> VoiceConfig {
    VoiceConfig {
        silence_duration_secs: 0.0,
        follow_up_timeout_secs: 30.0,
        activation_start_delay_ms: 0,
        activation_retry_secs: 0.05,
        reasoning_timeout_secs: 5.0,
        ..VoiceConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

struct TapSlot {
    frames: mpsc::UnboundedSender<AudioChunk>,
    alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct FakeMicrophone {
    taps: Mutex<Vec<TapSlot>>,
    open: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    opened_total: AtomicUsize,
}

impl FakeMicrophone {
    /// Deliver one 20 ms frame at a constant level to every open tap.
    pub fn push(&self, level: f32) {
        let chunk = AudioChunk {
            samples: vec![level; 320],
            sample_rate: 16_000,
            timestamp: Instant::now(),
        };
        for slot in self.taps.lock().unwrap().iter() {
            if slot.alive.load(Ordering::SeqCst) {
                let _ = slot.frames.send(chunk.clone());
            }
        }
    }

    /// Simulate the engine dying underneath every open tap.
    pub fn kill(&self) {
        for slot in self.taps.lock().unwrap().iter() {
            slot.running.store(false, Ordering::SeqCst);
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

struct FakeTap {
    alive: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    open: Arc<AtomicUsize>,
}

impl AudioTap for FakeTap {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for FakeTap {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Microphone for FakeMicrophone {
    fn open_tap(&self, frames: mpsc::UnboundedSender<AudioChunk>) -> VoiceResult<Box<dyn AudioTap>> {
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        self.taps.lock().unwrap().push(TapSlot {
            frames,
            alive: Arc::clone(&alive),
            running: Arc::clone(&running),
        });
        Ok(Box::new(FakeTap {
            alive,
            running,
            open: Arc::clone(&self.open),
        }))
    }
}

// ---------------------------------------------------------------------------
// Recognizer / access
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRecognizer {
    sessions: Mutex<Vec<mpsc::UnboundedSender<RecognitionEvent>>>,
    started: AtomicUsize,
    frames: Mutex<Vec<mpsc::UnboundedReceiver<AudioChunk>>>,
}

impl FakeRecognizer {
    /// Emit a result on the most recent session.
    pub fn emit(&self, event: RecognitionEvent) {
        if let Some(tx) = self.sessions.lock().unwrap().last() {
            let _ = tx.send(event);
        }
    }

    /// Close every session's result stream, as a recognizer does when its frames stop.
    pub fn end_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }

    pub fn session_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl PhraseRecognizer for FakeRecognizer {
    fn start_session(
        &self,
        frames: mpsc::UnboundedReceiver<AudioChunk>,
    ) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.started.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(tx);
        self.frames.lock().unwrap().push(frames);
        Ok(rx)
    }
}

pub struct FakeAccess {
    pub granted: bool,
    calls: AtomicUsize,
}

impl Default for FakeAccess {
    fn default() -> Self {
        Self {
            granted: true,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeAccess {
    /// Authorization always refused.
    pub fn denied() -> Self {
        Self {
            granted: false,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophoneAccess for FakeAccess {
    async fn authorize(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.granted
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Completes buffers immediately unless `hold_pcm` is set.
#[derive(Default)]
pub struct FakeOutput {
    pub hold_pcm: bool,
    encoded: Mutex<Vec<Vec<u8>>>,
    pcm: Mutex<Vec<Vec<u8>>>,
    held: Mutex<Vec<PlaybackDone>>,
    stops: AtomicUsize,
}

impl FakeOutput {
    /// PCM completions wait for `release_all`.
    pub fn holding_pcm() -> Self {
        Self {
            hold_pcm: true,
            ..Self::default()
        }
    }

    pub fn encoded_count(&self) -> usize {
        self.encoded.lock().unwrap().len()
    }

    pub fn pcm_count(&self) -> usize {
        self.pcm.lock().unwrap().len()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Fire every held completion (late callbacks after a stop).
    pub fn release_all(&self) {
        let held: Vec<PlaybackDone> = self.held.lock().unwrap().drain(..).collect();
        for done in held {
            done();
        }
    }
}

impl AudioOutput for FakeOutput {
    fn play_encoded(&self, bytes: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
        self.encoded.lock().unwrap().push(bytes);
        done();
        Ok(())
    }

    fn enqueue_pcm(&self, pcm: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
        self.pcm.lock().unwrap().push(pcm);
        if self.hold_pcm {
            self.held.lock().unwrap().push(done);
        } else {
            done();
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(String),
    /// Replies after the delay.
    After(Duration, String),
    /// Never resolves.
    Hang,
}

pub struct FakeReasoning {
    pub script: Mutex<Scripted>,
    inputs: Mutex<Vec<String>>,
}

impl FakeReasoning {
    pub fn replying(text: &str) -> Self {
        Self {
            script: Mutex::new(Scripted::Reply(text.to_string())),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, script: Scripted) {
        *self.script.lock().unwrap() = script;
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningService for FakeReasoning {
    async fn send(&self, text: &str, _session_key: &str) -> VoiceResult<String> {
        self.inputs.lock().unwrap().push(text.to_string());
        let script = self.script.lock().unwrap().clone();
        match script {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Fail(code) => Err(VoiceError::remote(code, "scripted failure")),
            Scripted::After(delay, reply) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            Scripted::Hang => std::future::pending().await,
        }
    }
}

pub struct FakeTranscription {
    pub script: Mutex<Scripted>,
    calls: AtomicUsize,
}

impl FakeTranscription {
    pub fn hearing(text: &str) -> Self {
        Self {
            script: Mutex::new(Scripted::Reply(text.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, script: Scripted) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcription for FakeTranscription {
    async fn transcribe(&self, _audio: &CapturedAudio) -> VoiceResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        match script {
            Scripted::Reply(text) => Ok(text),
            Scripted::Fail(msg) => Err(VoiceError::Transcription(msg)),
            Scripted::After(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Scripted::Hang => std::future::pending().await,
        }
    }
}

pub struct FakeSynthesis {
    pub chunks: usize,
    pub fail_whole: bool,
    pub fail_stream: bool,
    whole: Mutex<Vec<String>>,
    streamed: Mutex<Vec<String>>,
}

impl Default for FakeSynthesis {
    fn default() -> Self {
        Self {
            chunks: 3,
            fail_whole: false,
            fail_stream: false,
            whole: Mutex::new(Vec::new()),
            streamed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSynthesis {
    pub fn failing_whole() -> Self {
        Self {
            fail_whole: true,
            ..Self::default()
        }
    }

    pub fn failing_stream() -> Self {
        Self {
            fail_stream: true,
            ..Self::default()
        }
    }

    pub fn whole_texts(&self) -> Vec<String> {
        self.whole.lock().unwrap().clone()
    }

    pub fn streamed_texts(&self) -> Vec<String> {
        self.streamed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesis for FakeSynthesis {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        self.whole.lock().unwrap().push(text.to_string());
        if self.fail_whole {
            return Err(VoiceError::Synthesis("scripted".to_string()));
        }
        Ok(vec![0xAA; 16])
    }

    async fn synthesize_streaming(&self, text: &str) -> VoiceResult<AudioByteStream> {
        self.streamed.lock().unwrap().push(text.to_string());
        if self.fail_stream {
            return Err(VoiceError::Synthesis("stream refused".to_string()));
        }
        let chunks: Vec<VoiceResult<Vec<u8>>> = (0..self.chunks).map(|_| Ok(vec![0u8; 4_800])).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<String>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Surface for RecordingSurface {
    fn show(&self) {
        self.record("show".to_string());
    }

    fn show_mini(&self) {
        self.record("mini".to_string());
    }

    fn hide(&self) {
        self.record("hide".to_string());
    }

    fn set_subtitle(&self, text: &str) {
        self.record(format!("subtitle:{}", text));
    }

    fn set_transcript(&self, text: &str) {
        self.record(format!("transcript:{}", text));
    }

    fn clear_content(&self) {
        self.record("clear".to_string());
    }

    fn acquire_wake_lock(&self) {
        self.record("wake_lock".to_string());
    }

    fn release_wake_lock(&self) {
        self.record("release_wake_lock".to_string());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Fakes {
    pub microphone: Arc<FakeMicrophone>,
    pub recognizer: Arc<FakeRecognizer>,
    pub access: Arc<FakeAccess>,
    pub output: Arc<FakeOutput>,
    pub reasoning: Arc<FakeReasoning>,
    pub transcription: Arc<FakeTranscription>,
    pub synthesis: Arc<FakeSynthesis>,
    pub surface: Arc<RecordingSurface>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            microphone: Arc::default(),
            recognizer: Arc::default(),
            access: Arc::default(),
            output: Arc::default(),
            reasoning: Arc::new(FakeReasoning::replying("Es ist drei Uhr")),
            transcription: Arc::new(FakeTranscription::hearing("wie spät ist es")),
            synthesis: Arc::default(),
            surface: Arc::default(),
        }
    }
}

impl Fakes {
    pub fn services(&self) -> Services {
        Services {
            reasoning: self.reasoning.clone(),
            synthesis: self.synthesis.clone(),
            transcription: self.transcription.clone(),
            microphone: self.microphone.clone(),
            access: self.access.clone(),
            recognizer: self.recognizer.clone(),
            output: self.output.clone(),
        }
    }
}

pub struct Harness {
    pub conversation: Conversation,
    pub events: mpsc::UnboundedReceiver<ControlEvent>,
    pub fakes: Fakes,
    greeting_count: usize,
}

const STEP_TIMEOUT: Duration = Duration::from_secs(2);

impl Harness {
    pub fn new(config: VoiceConfig, fakes: Fakes) -> Self {
        init_tracing();
        let greeting_count = if fakes.synthesis.fail_whole {
            0
        } else {
            config.greetings.len()
        };
        let (conversation, events) =
            Conversation::new(config, fakes.services(), fakes.surface.clone());
        Self {
            conversation,
            events,
            fakes,
            greeting_count,
        }
    }

    async fn next_event(&mut self, what: &str) -> ControlEvent {
        match tokio::time::timeout(STEP_TIMEOUT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("control channel closed waiting for {}", what),
            Err(_) => panic!(
                "timed out waiting for {} (state {})",
                what,
                self.conversation.state()
            ),
        }
    }

    /// Dispatch control events until `done` holds.
    pub async fn pump_until(&mut self, what: &str, done: impl Fn(&Conversation) -> bool) {
        while !done(&self.conversation) {
            let event = self.next_event(what).await;
            self.conversation.dispatch(event);
        }
    }

    /// Like `pump_until`, returning every state entered on the way.
    pub async fn record_until(
        &mut self,
        what: &str,
        done: impl Fn(&Conversation) -> bool,
    ) -> Vec<ConversationState> {
        let mut trail = Vec::new();
        let mut last = self.conversation.state();
        while !done(&self.conversation) {
            let event = self.next_event(what).await;
            self.conversation.dispatch(event);
            let now = self.conversation.state();
            if now != last {
                trail.push(now);
                last = now;
            }
        }
        trail
    }

    /// Dispatch whatever arrives within `window`.
    pub async fn drain_for(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            self.conversation.dispatch(event);
        }
    }

    pub async fn wait_for_greetings(&self, count: usize) {
        let cache = self.conversation.greetings().clone();
        tokio::time::timeout(STEP_TIMEOUT, async move {
            while cache.len().await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("greeting cache never filled");
    }

    /// Start, wait for the listener session and the greeting cache, then say the phrase.
    pub async fn activate(&mut self) {
        self.conversation.start();
        self.wait_for_greetings(self.greeting_count).await;
        self.pump_until("listener session", |c| c.listener().has_session())
            .await;
        self.fakes
            .recognizer
            .emit(RecognitionEvent::Text("Hallo Paul".to_string()));
        self.pump_until("first capture", |c| {
            c.state() == ConversationState::Listening && c.capture_active()
        })
        .await;
    }

    /// Loud frame followed by a quiet one: ends the utterance at zero silence duration.
    pub fn speak_utterance(&self) {
        self.fakes.microphone.push(0.5);
        self.fakes.microphone.push(0.0);
    }
}
