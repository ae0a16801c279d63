//! Gateway connection settings.

use paul_voice::{VoiceError, VoiceResult};
use std::time::Duration;
use url::Url;

/// Protocol revision spoken by this client.
pub const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Shared-secret token sent with `connect`.
    pub token: String,
    pub client_id: String,
    pub display_name: String,
    pub client_version: String,
    pub mode: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub reconnect_delay: Duration,
    /// Upper bound for one chat request, acceptance to final reply.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            token: String::new(),
            client_id: "gateway-client".to_string(),
            display_name: "Paul Voice".to_string(),
            client_version: "1.0.0".to_string(),
            mode: "backend".to_string(),
            role: "operator".to_string(),
            scopes: ["chat", "operator", "operator.read", "operator.write"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reconnect_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    /// `OPENCLAW_GATEWAY_URL` and `OPENCLAW_GATEWAY_TOKEN`; everything else keeps its default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("OPENCLAW_GATEWAY_URL") {
            if !url.trim().is_empty() {
                config.url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var("OPENCLAW_GATEWAY_TOKEN") {
            config.token = token;
        }
        config
    }

    /// Parsed endpoint; only WebSocket schemes are accepted.
    pub fn endpoint(&self) -> VoiceResult<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| VoiceError::Config(format!("gateway url {}: {}", self.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(VoiceError::Config(format!(
                "gateway url must be ws:// or wss://, got {}://",
                other
            ))),
        }
    }
}
