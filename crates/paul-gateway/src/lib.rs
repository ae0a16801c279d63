//! # Paul Gateway
//!
//! WebSocket client for the remote reasoning gateway. Plugs into the conversation core as
//! its [`paul_voice::ReasoningService`].
//!
//! ```text
//! gateway                                client
//!   │── event connect.challenge ──────────►│
//!   │◄───────────────── req connect ───────│  protocol 3, token, role, scopes
//!   │── res ok ───────────────────────────►│  connected
//!   │◄───────────────── req chat.send ─────│  sessionKey, message, idempotencyKey
//!   │── res ok {runId} ───────────────────►│
//!   │── event chat delta … final ─────────►│  reply text
//! ```

pub mod client;
pub mod config;
pub mod frame;

pub use client::GatewayClient;
pub use config::{GatewayConfig, PROTOCOL_VERSION};
pub use frame::{ChatEvent, ChatUpdate, Frame};
