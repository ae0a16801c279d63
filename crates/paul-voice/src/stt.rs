//! **Speech-to-Text (STT)** — OpenAI-compatible transcription of captured utterances.

use crate::capture::CapturedAudio;
use crate::config::SpeechConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::services::Transcription;
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Encode mono f32 PCM as 16-bit WAV for upload.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Production STT backend: `/audio/transcriptions` with model and language fields.
#[derive(Debug, Clone)]
pub struct OpenAiTranscription {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    /// ISO-639-1 hint (e.g. "de").
    pub language: String,
    client: reqwest::Client,
}

impl OpenAiTranscription {
    pub fn new(config: &SpeechConfig) -> VoiceResult<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.stt_model.clone(),
            language: config.stt_language.clone(),
            client,
        })
    }
}

#[async_trait]
impl Transcription for OpenAiTranscription {
    async fn transcribe(&self, audio: &CapturedAudio) -> VoiceResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav(&audio.samples, audio.sample_rate)?;
        debug!(bytes = wav.len(), duration = ?audio.duration(), "Uploading utterance");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}
