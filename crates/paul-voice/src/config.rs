//! Voice assistant configuration loaded from `.env`.
//!
//! Every knob the conversation core consumes lives here: activation phrase, silence gate,
//! follow-up window, transcript filter, spoken fallbacks, and the speech-service endpoints.
//! Change behavior without code edits.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_activation_phrase() -> String {
    "paul".to_string()
}

fn default_silence_threshold() -> f32 {
    0.01
}

fn default_silence_duration_secs() -> f64 {
    4.0
}

fn default_follow_up_timeout_secs() -> f64 {
    5.0
}

fn default_min_transcript_chars() -> usize {
    3
}

fn default_activation_retry_secs() -> f64 {
    10.0
}

fn default_activation_start_delay_ms() -> u64 {
    500
}

fn default_activation_health_secs() -> f64 {
    15.0
}

fn default_reasoning_timeout_secs() -> f64 {
    120.0
}

fn default_session_key() -> String {
    "agent:main:main".to_string()
}

fn default_thinking_text() -> String {
    "Hmm, lass mich überlegen...".to_string()
}

fn default_apology_text() -> String {
    "Entschuldigung, da ist etwas schiefgelaufen.".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn default_hallucination_denylist() -> Vec<String> {
    strings(&[
        "amara.org",
        "untertitel",
        "subtitle",
        "transcription",
        "thank you for watching",
        "thanks for watching",
        "vielen dank",
        "danke fürs zuschauen",
        "bis zum nächsten mal",
        "copyright",
        "www.",
        ".com",
        ".org",
        ".de",
    ])
}

pub fn default_greetings() -> Vec<String> {
    strings(&["Ja?", "Hey!", "Was gibt's?", "Ich bin da!", "Hm?"])
}

pub fn default_no_answer_texts() -> Vec<String> {
    strings(&[
        "Darauf habe ich leider keine Antwort.",
        "Da bin ich gerade überfragt.",
    ])
}

/// Voice assistant configuration loaded from environment.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | PAUL_ACTIVATION_PHRASE | paul | Case-insensitive substring that wakes the assistant. |
/// | PAUL_SILENCE_THRESHOLD | 0.01 | RMS amplitude below which a frame counts as silence. |
/// | PAUL_SILENCE_DURATION_SECS | 4.0 | Continuous silence that ends an utterance. |
/// | PAUL_FOLLOW_UP_TIMEOUT_SECS | 5.0 | Follow-up window after a reply. |
/// | PAUL_FOLLOW_UP_ENABLED | true | Offer a follow-up window at all. |
/// | PAUL_HALLUCINATION_DENYLIST | built-in | Comma-separated substrings rejected in transcripts. |
/// | PAUL_MIN_TRANSCRIPT_CHARS | 3 | Shorter transcripts are dropped. |
/// | PAUL_GREETINGS | Ja?,Hey!,... | Comma-separated greetings, one picked at random per wake. |
/// | PAUL_NO_ANSWER_TEXTS | built-in | Comma-separated fallbacks for an empty reply. |
/// | PAUL_APOLOGY_TEXT | Entschuldigung, ... | Spoken when a service fails mid-turn. |
/// | PAUL_THINKING_TEXT | Hmm, lass mich überlegen... | Status shown while thinking. |
/// | PAUL_ACTIVATION_RETRY_SECS | 10 | Backoff before a failed listener restarts. |
/// | PAUL_ACTIVATION_START_DELAY_MS | 500 | Settle delay between authorization and session start. |
/// | PAUL_ACTIVATION_HEALTH_SECS | 15 | Recovery supervisor interval. |
/// | PAUL_REASONING_TIMEOUT_SECS | 120 | Upper bound on one reasoning call. |
/// | PAUL_SESSION_KEY | agent:main:main | Reasoning session key. |
/// | PAUL_STREAMING_TTS | true | Prefer streaming synthesis for replies. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_activation_phrase")]
    pub activation_phrase: String,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default = "default_silence_duration_secs")]
    pub silence_duration_secs: f64,
    #[serde(default = "default_follow_up_timeout_secs")]
    pub follow_up_timeout_secs: f64,
    #[serde(default = "default_true")]
    pub follow_up_enabled: bool,
    #[serde(default = "default_hallucination_denylist")]
    pub hallucination_denylist: Vec<String>,
    #[serde(default = "default_min_transcript_chars")]
    pub min_transcript_chars: usize,
    #[serde(default = "default_greetings")]
    pub greetings: Vec<String>,
    #[serde(default = "default_no_answer_texts")]
    pub no_answer_texts: Vec<String>,
    #[serde(default = "default_apology_text")]
    pub apology_text: String,
    #[serde(default = "default_thinking_text")]
    pub thinking_text: String,
    #[serde(default = "default_activation_retry_secs")]
    pub activation_retry_secs: f64,
    #[serde(default = "default_activation_start_delay_ms")]
    pub activation_start_delay_ms: u64,
    #[serde(default = "default_activation_health_secs")]
    pub activation_health_secs: f64,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: f64,
    #[serde(default = "default_session_key")]
    pub session_key: String,
    #[serde(default = "default_true")]
    pub streaming_tts: bool,
    /// Speech services (transcription + synthesis).
    #[serde(default)]
    pub speech: SpeechConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            activation_phrase: default_activation_phrase(),
            silence_threshold: default_silence_threshold(),
            silence_duration_secs: default_silence_duration_secs(),
            follow_up_timeout_secs: default_follow_up_timeout_secs(),
            follow_up_enabled: true,
            hallucination_denylist: default_hallucination_denylist(),
            min_transcript_chars: default_min_transcript_chars(),
            greetings: default_greetings(),
            no_answer_texts: default_no_answer_texts(),
            apology_text: default_apology_text(),
            thinking_text: default_thinking_text(),
            activation_retry_secs: default_activation_retry_secs(),
            activation_start_delay_ms: default_activation_start_delay_ms(),
            activation_health_secs: default_activation_health_secs(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
            session_key: default_session_key(),
            streaming_tts: true,
            speech: SpeechConfig::default(),
        }
    }
}

impl VoiceConfig {
    /// Load from environment. Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            activation_phrase: env_opt_string("PAUL_ACTIVATION_PHRASE")
                .unwrap_or(d.activation_phrase),
            silence_threshold: env_parse("PAUL_SILENCE_THRESHOLD", d.silence_threshold),
            silence_duration_secs: env_parse("PAUL_SILENCE_DURATION_SECS", d.silence_duration_secs),
            follow_up_timeout_secs: env_parse(
                "PAUL_FOLLOW_UP_TIMEOUT_SECS",
                d.follow_up_timeout_secs,
            ),
            follow_up_enabled: env_bool("PAUL_FOLLOW_UP_ENABLED", true),
            hallucination_denylist: env_list("PAUL_HALLUCINATION_DENYLIST")
                .unwrap_or(d.hallucination_denylist),
            min_transcript_chars: env_parse("PAUL_MIN_TRANSCRIPT_CHARS", d.min_transcript_chars),
            greetings: env_list("PAUL_GREETINGS").unwrap_or(d.greetings),
            no_answer_texts: env_list("PAUL_NO_ANSWER_TEXTS").unwrap_or(d.no_answer_texts),
            apology_text: env_opt_string("PAUL_APOLOGY_TEXT").unwrap_or(d.apology_text),
            thinking_text: env_opt_string("PAUL_THINKING_TEXT").unwrap_or(d.thinking_text),
            activation_retry_secs: env_parse("PAUL_ACTIVATION_RETRY_SECS", d.activation_retry_secs),
            activation_start_delay_ms: env_parse(
                "PAUL_ACTIVATION_START_DELAY_MS",
                d.activation_start_delay_ms,
            ),
            activation_health_secs: env_parse(
                "PAUL_ACTIVATION_HEALTH_SECS",
                d.activation_health_secs,
            ),
            reasoning_timeout_secs: env_parse(
                "PAUL_REASONING_TIMEOUT_SECS",
                d.reasoning_timeout_secs,
            ),
            session_key: env_opt_string("PAUL_SESSION_KEY").unwrap_or(d.session_key),
            streaming_tts: env_bool("PAUL_STREAMING_TTS", true),
            speech: SpeechConfig::from_env(),
        }
    }

    /// Reject values the conversation core cannot work with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.activation_phrase.trim().is_empty() {
            return Err(VoiceError::Config("activation phrase is empty".to_string()));
        }
        if !(self.silence_threshold > 0.0 && self.silence_threshold < 1.0) {
            return Err(VoiceError::Config(format!(
                "silence threshold must be in (0, 1), got {}",
                self.silence_threshold
            )));
        }
        for (name, secs) in [
            ("silence duration", self.silence_duration_secs),
            ("follow-up timeout", self.follow_up_timeout_secs),
            ("activation retry", self.activation_retry_secs),
            ("reasoning timeout", self.reasoning_timeout_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(VoiceError::Config(format!("{} must be >= 0, got {}", name, secs)));
            }
        }
        if !self.activation_health_secs.is_finite() || self.activation_health_secs <= 0.0 {
            return Err(VoiceError::Config(format!(
                "activation health interval must be > 0, got {}",
                self.activation_health_secs
            )));
        }
        if self.apology_text.trim().is_empty() {
            return Err(VoiceError::Config("apology text is empty".to_string()));
        }
        if self.no_answer_texts.iter().all(|t| t.trim().is_empty()) {
            return Err(VoiceError::Config("no fallback reply configured".to_string()));
        }
        Ok(())
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_secs_f64(self.silence_duration_secs)
    }

    pub fn follow_up_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.follow_up_timeout_secs)
    }

    pub fn activation_retry_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.activation_retry_secs)
    }

    pub fn activation_start_delay(&self) -> Duration {
        Duration::from_millis(self.activation_start_delay_ms)
    }

    pub fn activation_health_interval(&self) -> Duration {
        Duration::from_secs_f64(self.activation_health_secs)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reasoning_timeout_secs)
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_stt_language() -> String {
    "de".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "fable".to_string()
}

fn default_tts_speed() -> f32 {
    1.2
}

/// OpenAI-compatible speech service settings.
///
/// | Env | Default |
/// |-----|---------|
/// | OPENAI_API_URL | https://api.openai.com/v1 |
/// | OPENAI_API_KEY | (none) |
/// | PAUL_STT_MODEL / PAUL_STT_LANGUAGE | whisper-1 / de |
/// | PAUL_TTS_MODEL / PAUL_TTS_VOICE / PAUL_TTS_SPEED | tts-1 / fable / 1.2 |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_stt_language")]
    pub stt_language: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_tts_speed")]
    pub tts_speed: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            stt_model: default_stt_model(),
            stt_language: default_stt_language(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            tts_speed: default_tts_speed(),
        }
    }
}

impl SpeechConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_url: env_opt_string("OPENAI_API_URL").unwrap_or(d.api_url),
            api_key: env_opt_string("OPENAI_API_KEY"),
            stt_model: env_opt_string("PAUL_STT_MODEL").unwrap_or(d.stt_model),
            stt_language: env_opt_string("PAUL_STT_LANGUAGE").unwrap_or(d.stt_language),
            tts_model: env_opt_string("PAUL_TTS_MODEL").unwrap_or(d.tts_model),
            tts_voice: env_opt_string("PAUL_TTS_VOICE").unwrap_or(d.tts_voice),
            tts_speed: env_parse("PAUL_TTS_SPEED", d.tts_speed).clamp(0.25, 4.0),
        }
    }

    /// API key or a configuration error naming the missing variable.
    pub fn require_api_key(&self) -> VoiceResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| VoiceError::Config("speech services require OPENAI_API_KEY".to_string()))
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = env_opt_string(name)?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
