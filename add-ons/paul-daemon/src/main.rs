//! Paul voice daemon
//!
//! Runs the assistant headless: microphone and speaker through cpal/rodio, speech through
//! an OpenAI-compatible API, replies from the reasoning gateway. On stdin, `wake` activates
//! without the phrase and `esc` (or an empty line) cancels the current turn.

use anyhow::Context;
use paul_gateway::{GatewayClient, GatewayConfig};
use paul_voice::{
    Conversation, ConversationHandle, CpalAccess, CpalMicrophone, OpenAiSpeech,
    OpenAiTranscription, RodioOutput, Services, TracingSurface, TranscribingRecognizer,
    Transcription, VoiceConfig,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[paul-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = VoiceConfig::from_env();
    config.validate().context("invalid voice configuration")?;

    match CpalMicrophone::list_input_devices() {
        Ok(devices) => info!(?devices, "Input devices"),
        Err(e) => warn!("Could not enumerate input devices: {}", e),
    }

    let transcription: Arc<dyn Transcription> = Arc::new(
        OpenAiTranscription::new(&config.speech).context("transcription client")?,
    );
    let synthesis = OpenAiSpeech::new(&config.speech).context("speech client")?;
    let gateway = GatewayClient::connect(GatewayConfig::from_env()).context("gateway client")?;
    let output = RodioOutput::new().context("audio output")?;
    let recognizer = TranscribingRecognizer::new(Arc::clone(&transcription), config.silence_threshold);

    let services = Services {
        reasoning: Arc::new(gateway),
        synthesis: Arc::new(synthesis),
        transcription,
        microphone: Arc::new(CpalMicrophone::new()),
        access: Arc::new(CpalAccess),
        recognizer: Arc::new(recognizer),
        output: Arc::new(output),
    };

    info!(
        phrase = %config.activation_phrase,
        follow_up = config.follow_up_enabled,
        streaming_tts = config.streaming_tts,
        "🎙️ Paul daemon started"
    );

    let (conversation, events) = Conversation::new(config, services, Arc::new(TracingSurface));
    let handle = conversation.handle();
    let control = tokio::spawn(conversation.run(events));
    tokio::spawn(read_commands(handle.clone()));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("CTRL-C received; shutting down daemon");
    handle.shutdown()?;
    control.await.context("control task failed")?;
    Ok(())
}

/// Line commands from stdin until it closes or the control task is gone.
async fn read_commands(handle: ConversationHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let sent = match line.trim().to_lowercase().as_str() {
            "wake" | "w" => handle.wake(),
            "" | "esc" | "escape" => handle.escape(),
            other => {
                warn!(command = %other, "Unknown command (wake | esc)");
                Ok(())
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
