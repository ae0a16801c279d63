//! **Text-to-Speech (TTS)** — OpenAI-compatible `/audio/speech`.
//!
//! Whole replies come back as mp3. Streaming replies request raw 24 kHz 16-bit PCM and
//! are re-chunked into 100 ms blocks so playback can start on the first block.

use crate::config::SpeechConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::services::{AudioByteStream, SpeechSynthesis};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// 100 ms of 24 kHz 16-bit mono.
pub const PCM_CHUNK_BYTES: usize = 4_800;

/// Splits an arbitrary byte stream into fixed-size PCM blocks.
#[derive(Debug)]
pub struct PcmRechunker {
    size: usize,
    buffer: Vec<u8>,
}

impl PcmRechunker {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(2),
            buffer: Vec::with_capacity(size),
        }
    }

    /// Append bytes; return every complete block.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut blocks = Vec::new();
        while self.buffer.len() >= self.size {
            blocks.push(self.buffer.drain(..self.size).collect());
        }
        blocks
    }

    /// Remaining partial block, trimmed to whole samples.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        let whole = self.buffer.len() - self.buffer.len() % 2;
        self.buffer.truncate(whole);
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

/// Production TTS backend (OpenAI, OpenRouter, or any compatible endpoint).
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    /// Base URL without trailing slash.
    pub base_url: String,
    api_key: String,
    /// tts-1 (fast) or tts-1-hd.
    pub model: String,
    /// alloy, echo, fable, onyx, nova, shimmer, ...
    pub voice: String,
    pub speed: f32,
    client: reqwest::Client,
}

impl OpenAiSpeech {
    pub fn new(config: &SpeechConfig) -> VoiceResult<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
            speed: config.tts_speed,
            client,
        })
    }

    async fn request(&self, text: &str, format: &str) -> VoiceResult<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": self.speed,
            "response_format": format,
        });
        let res = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        Ok(res)
    }
}

#[async_trait]
impl SpeechSynthesis for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let res = self.request(text, "mp3").await?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        debug!(bytes = bytes.len(), "TTS payload received");
        Ok(bytes.to_vec())
    }

    async fn synthesize_streaming(&self, text: &str) -> VoiceResult<AudioByteStream> {
        let res = self.request(text.trim(), "pcm").await?;
        let mut upstream = Box::pin(res.bytes_stream());
        let (tx, rx) = mpsc::channel::<VoiceResult<Vec<u8>>>(16);

        tokio::spawn(async move {
            let mut rechunker = PcmRechunker::new(PCM_CHUNK_BYTES);
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(bytes) => {
                        for block in rechunker.push(&bytes) {
                            if tx.send(Ok(block)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("TTS stream broke: {}", e);
                        let _ = tx.send(Err(VoiceError::Synthesis(e.to_string()))).await;
                        return;
                    }
                }
            }
            if let Some(rest) = rechunker.finish() {
                let _ = tx.send(Ok(rest)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
