//! Wire frames of the gateway protocol.
//!
//! Every WebSocket text message is one JSON object tagged by `type`:
//! `req` (client → gateway), `res` (answer to a `req` by id), `event` (gateway push).

use crate::config::{GatewayConfig, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Frame {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Frame::Req {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// None for malformed JSON or an unknown frame type.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorShape {
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("UNKNOWN")
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    pub caps: Vec<String>,
    pub auth: Auth,
    pub role: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Auth {
    pub token: String,
}

impl ConnectParams {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: config.client_id.clone(),
                display_name: config.display_name.clone(),
                version: config.client_version.clone(),
                platform: std::env::consts::OS.to_string(),
                mode: config.mode.clone(),
            },
            caps: Vec::new(),
            auth: Auth {
                token: config.token.clone(),
            },
            role: config.role.clone(),
            scopes: config.scopes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    pub session_key: String,
    pub message: String,
    pub idempotency_key: String,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub state: String,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

/// What a `chat` event means for the pending reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    /// Cumulative partial text; replaces the previous delta.
    Delta(String),
    /// Terminal. `None` means reuse the last delta.
    Final(Option<String>),
    Error(String),
    Aborted,
    Ignored,
}

impl ChatEvent {
    /// Text of the first content part, if any.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.content.first())
            .and_then(|part| part.text.as_deref())
    }

    pub fn update(&self) -> ChatUpdate {
        match self.state.as_str() {
            "delta" => match self.text() {
                Some(text) => ChatUpdate::Delta(text.to_string()),
                None => ChatUpdate::Ignored,
            },
            "final" => ChatUpdate::Final(self.text().map(str::to_string)),
            "error" => ChatUpdate::Error(
                self.error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            "aborted" => ChatUpdate::Aborted,
            _ => ChatUpdate::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_type_tag() {
        let frame = Frame::request("1", "chat.send", json!({"message": "hi"}));
        let value: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "req");
        assert_eq!(value["id"], "1");
        assert_eq!(value["method"], "chat.send");
        assert_eq!(value["params"]["message"], "hi");
    }

    #[test]
    fn failed_response_carries_error_shape() {
        let frame = Frame::parse(
            r#"{"type":"res","id":"7","ok":false,"error":{"code":"UNAUTHORIZED","message":"bad token"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Res { id, ok, error, .. } => {
                assert_eq!(id, "7");
                assert!(!ok);
                let error = error.unwrap();
                assert_eq!(error.code(), "UNAUTHORIZED");
                assert_eq!(error.message(), "bad token");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn error_shape_defaults() {
        let shape = ErrorShape::default();
        assert_eq!(shape.code(), "UNKNOWN");
        assert_eq!(shape.message(), "Unknown error");
    }

    #[test]
    fn unknown_frame_type_is_skipped() {
        assert!(Frame::parse(r#"{"type":"ping"}"#).is_none());
        assert!(Frame::parse("not json").is_none());
    }

    #[test]
    fn event_without_payload_parses() {
        let frame = Frame::parse(r#"{"type":"event","event":"tick"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                event: "tick".to_string(),
                payload: Value::Null
            }
        );
    }

    #[test]
    fn connect_params_use_camel_case() {
        let config = GatewayConfig {
            token: "secret".to_string(),
            ..GatewayConfig::default()
        };
        let value = serde_json::to_value(ConnectParams::from_config(&config)).unwrap();
        assert_eq!(value["minProtocol"], 3);
        assert_eq!(value["maxProtocol"], 3);
        assert_eq!(value["client"]["id"], "gateway-client");
        assert_eq!(value["client"]["displayName"], "Paul Voice");
        assert_eq!(value["client"]["mode"], "backend");
        assert_eq!(value["auth"]["token"], "secret");
        assert_eq!(value["role"], "operator");
        assert_eq!(value["caps"], json!([]));
        assert_eq!(value["scopes"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn chat_send_params_use_camel_case() {
        let params = ChatSendParams {
            session_key: "agent:main:main".to_string(),
            message: "hallo".to_string(),
            idempotency_key: "k".to_string(),
        };
        let value = serde_json::to_value(params).unwrap();
        assert_eq!(value["sessionKey"], "agent:main:main");
        assert_eq!(value["idempotencyKey"], "k");
    }

    fn chat(value: Value) -> ChatEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn chat_states_map_to_updates() {
        let delta = chat(json!({"state": "delta", "message": {"content": [{"text": "Es ist"}]}}));
        assert_eq!(delta.update(), ChatUpdate::Delta("Es ist".to_string()));

        let final_text = chat(json!({"state": "final", "message": {"content": [{"text": "Es ist drei"}]}}));
        assert_eq!(final_text.update(), ChatUpdate::Final(Some("Es ist drei".to_string())));

        let bare_final = chat(json!({"state": "final"}));
        assert_eq!(bare_final.update(), ChatUpdate::Final(None));

        let error = chat(json!({"state": "error", "errorMessage": "quota"}));
        assert_eq!(error.update(), ChatUpdate::Error("quota".to_string()));

        assert_eq!(chat(json!({"state": "aborted"})).update(), ChatUpdate::Aborted);
        assert_eq!(chat(json!({"state": "delta"})).update(), ChatUpdate::Ignored);
        assert_eq!(chat(json!({"state": "queued"})).update(), ChatUpdate::Ignored);
    }
}
