//! # Paul Voice - Voice-Activated Assistant Orchestration
//!
//! Listens for an activation phrase, captures one utterance, forwards it to a remote
//! reasoning service, and speaks the reply, then offers a short follow-up window before
//! returning to standby.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Conversation (control task)                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │ Activation   │→ │   Capture    │→ │  Transcription   │     │
//! │  │ Listener     │  │ SilenceGate  │  │  → Reasoning     │     │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘     │
//! │         ↑                  ↑                   ↓               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │  recovery /  │  │  Follow-up   │← │ Playback         │     │
//! │  │  retry epoch │  │  Supervisor  │  │ Scheduler (rodio)│     │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────┘
//!            ▲ every callback arrives as a ControlEvent ▲
//! ```

pub mod activation;
pub mod audio;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod filter;
pub mod follow_up;
pub mod generation;
pub mod greeting;
pub mod playback;
pub mod services;
pub mod silence;
pub mod state;
pub mod stt;
pub mod surface;
pub mod tts;
pub mod voice_output;

pub use activation::{
    ActivationListener, ListenerSettings, PhraseRecognizer, RecognitionEvent,
    TranscribingRecognizer,
};
pub use audio::{AudioChunk, AudioTap, CpalAccess, CpalMicrophone, Microphone, MicrophoneAccess};
pub use capture::{CaptureSession, CapturedAudio};
pub use config::{SpeechConfig, VoiceConfig};
pub use conversation::Conversation;
pub use error::{VoiceError, VoiceResult};
pub use event::{ActivationEvent, ControlEvent, ConversationHandle};
pub use filter::{is_placeholder_reply, TranscriptFilter, Verdict};
pub use follow_up::FollowUpSupervisor;
pub use generation::{Generation, GenerationCounter};
pub use greeting::GreetingCache;
pub use playback::PlaybackScheduler;
pub use services::{AudioByteStream, ReasoningService, Services, SpeechSynthesis, Transcription};
pub use silence::{rms, SilenceGate};
pub use state::ConversationState;
pub use stt::OpenAiTranscription;
pub use surface::{Surface, TracingSurface};
pub use tts::{OpenAiSpeech, PcmRechunker, PCM_CHUNK_BYTES};
pub use voice_output::{AudioOutput, PlaybackDone, RodioOutput, PCM_SAMPLE_RATE};
