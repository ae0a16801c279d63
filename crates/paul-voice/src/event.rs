//! Control-channel messages.
//!
//! Everything that happens outside the control task (audio taps, network replies, timers,
//! recognition results, user triggers) reaches the conversation as a [`ControlEvent`] on a
//! single unbounded channel. Asynchronous results carry the [`Generation`] they were
//! submitted under so the control task can drop superseded ones.

use crate::capture::CapturedAudio;
use crate::error::{VoiceError, VoiceResult};
use crate::generation::Generation;
use tokio::sync::mpsc;

/// Events owned by the activation listener.
#[derive(Debug)]
pub enum ActivationEvent {
    /// Microphone authorization finished (after the settle delay).
    Authorized { generation: Generation, granted: bool },
    /// The recognizer produced text for the session tagged `generation`.
    Recognized { generation: Generation, text: String },
    /// The recognizer session failed.
    RecognitionFailed { generation: Generation, message: String },
    /// Backoff elapsed for a retry scheduled under `generation`.
    RetryDue { generation: Generation },
}

#[derive(Debug)]
pub enum ControlEvent {
    /// Manual activation; behaves like a detected phrase.
    Wake,
    /// User cancel from any non-sleep state.
    Escape,
    /// Stop the control loop.
    Shutdown,
    Activation(ActivationEvent),
    /// First loud frame in the capture session `capture`.
    SpeechStarted { capture: Generation },
    /// Silence edge (or closed tap) ended the capture session `capture`.
    CaptureFinalized { capture: Generation, audio: CapturedAudio },
    Transcribed { request: Generation, result: VoiceResult<String> },
    Replied { request: Generation, result: VoiceResult<String> },
    /// Greeting synthesized on demand (cache miss).
    GreetingSynthesized { request: Generation, result: VoiceResult<Vec<u8>> },
    /// Whole-payload synthesis of a reply.
    Synthesized { request: Generation, result: VoiceResult<Vec<u8>> },
    SynthesisChunk { request: Generation, pcm: Vec<u8> },
    /// Streaming synthesis ended; `error` is set when the stream broke.
    SynthesisFinished { request: Generation, error: Option<VoiceError> },
    /// One scheduled buffer finished playing.
    ChunkPlayed { playback: Generation },
    FollowUpElapsed { generation: Generation },
}

/// Cloneable handle for raising user triggers into a running conversation.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl ConversationHandle {
    pub(crate) fn new(events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self { events }
    }

    pub fn wake(&self) -> VoiceResult<()> {
        self.send(ControlEvent::Wake)
    }

    pub fn escape(&self) -> VoiceResult<()> {
        self.send(ControlEvent::Escape)
    }

    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(ControlEvent::Shutdown)
    }

    fn send(&self, event: ControlEvent) -> VoiceResult<()> {
        self.events
            .send(event)
            .map_err(|_| VoiceError::ChannelSend("conversation stopped".to_string()))
    }
}
