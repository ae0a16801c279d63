//! External collaborators consumed by the conversation core.
//!
//! The core only needs "send text, get text", "text to audio", and "audio to text";
//! wire protocols live behind these traits.

use crate::activation::PhraseRecognizer;
use crate::audio::{Microphone, MicrophoneAccess};
use crate::capture::CapturedAudio;
use crate::error::VoiceResult;
use crate::voice_output::AudioOutput;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Finite, non-restartable sequence of PCM chunks.
pub type AudioByteStream = BoxStream<'static, VoiceResult<Vec<u8>>>;

/// Remote reasoning/chat service. One outstanding call per turn.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send a transcript; resolves to the reply text or
    /// `NotConnected` / `Timeout` / `Remote { code, message }`.
    async fn send(&self, text: &str, session_key: &str) -> VoiceResult<String>;
}

#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Whole encoded payload (mp3).
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;

    /// Raw PCM chunks at [`crate::voice_output::PCM_SAMPLE_RATE`] as they arrive.
    async fn synthesize_streaming(&self, text: &str) -> VoiceResult<AudioByteStream>;
}

#[async_trait]
pub trait Transcription: Send + Sync {
    async fn transcribe(&self, audio: &CapturedAudio) -> VoiceResult<String>;
}

/// Shared, stateless-per-call collaborators handed to the conversation at construction.
#[derive(Clone)]
pub struct Services {
    pub reasoning: Arc<dyn ReasoningService>,
    pub synthesis: Arc<dyn SpeechSynthesis>,
    pub transcription: Arc<dyn Transcription>,
    pub microphone: Arc<dyn Microphone>,
    pub access: Arc<dyn MicrophoneAccess>,
    pub recognizer: Arc<dyn PhraseRecognizer>,
    pub output: Arc<dyn AudioOutput>,
}
