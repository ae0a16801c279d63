//! **GatewayClient** — persistent WebSocket connection to the reasoning gateway.
//!
//! One background task owns the socket. It answers the gateway's `connect.challenge`,
//! routes `res` frames to the requests waiting on them, and feeds `chat` events into the
//! single active chat slot. Once `chat.send` is acknowledged, only events carrying its
//! `runId` reach that slot; run-tagged events seen before the acknowledgement are held
//! until the run is known. When the socket drops, everything in flight fails with
//! `NotConnected` and the task reconnects after the configured delay.

use crate::config::GatewayConfig;
use crate::frame::{ChatEvent, ChatSendParams, ChatUpdate, ConnectParams, Frame};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use paul_voice::{ReasoningService, VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a request id is waiting for.
#[derive(Debug, Clone)]
enum PendingRequest {
    Connect,
    ChatSend { chat: String },
}

/// Whether the gateway has acknowledged `chat.send` yet.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Run {
    Awaiting,
    /// `None` when the acknowledgement carried no `runId`.
    Accepted(Option<String>),
}

/// Where a `chat` event goes relative to the active chat.
enum Route {
    Apply,
    Hold,
    Stale,
}

/// The one chat request whose reply is still wanted.
struct ActiveChat {
    id: String,
    run: Run,
    /// Last cumulative delta.
    partial: String,
    /// Run-tagged events that arrived before the acknowledgement.
    early: Vec<ChatEvent>,
    reply: oneshot::Sender<VoiceResult<String>>,
}

impl ActiveChat {
    fn route(&self, event: &ChatEvent) -> Route {
        match (&self.run, event.run_id.as_deref()) {
            (_, None) => Route::Apply,
            (Run::Awaiting, Some(_)) => Route::Hold,
            (Run::Accepted(None), Some(_)) => Route::Apply,
            (Run::Accepted(Some(ours)), Some(theirs)) if ours == theirs => Route::Apply,
            _ => Route::Stale,
        }
    }
}

struct Shared {
    config: GatewayConfig,
    connected: AtomicBool,
    pending: DashMap<String, PendingRequest>,
    chat: Mutex<Option<ActiveChat>>,
}

impl Shared {
    async fn resolve_chat(&self, chat: Option<&str>, result: VoiceResult<String>) {
        let mut slot = self.chat.lock().await;
        let matches = match (slot.as_ref(), chat) {
            (Some(active), Some(id)) => active.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            if let Some(active) = slot.take() {
                let _ = active.reply.send(result);
            }
        }
    }

    async fn on_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("🔌 Gateway connection lost");
        }
        self.pending.clear();
        self.resolve_chat(None, Err(VoiceError::NotConnected)).await;
    }

    /// Bind the acknowledged run to its chat and replay events held back until now.
    async fn accept_chat(&self, chat: &str, run_id: Option<String>) {
        let mut slot = self.chat.lock().await;
        let early = match slot.as_mut() {
            Some(active) if active.id == chat => {
                active.run = Run::Accepted(run_id);
                std::mem::take(&mut active.early)
            }
            _ => {
                debug!(chat = %chat, "Acknowledgement for a superseded chat ignored");
                return;
            }
        };
        for event in early {
            route_chat(&mut slot, event);
        }
    }
}

pub struct GatewayClient {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl GatewayClient {
    /// Spawn the connection task. Returns immediately; `is_connected` turns true once the
    /// gateway accepted the `connect` handshake.
    pub fn connect(config: GatewayConfig) -> VoiceResult<Self> {
        let endpoint = config.endpoint()?;
        let shared = Arc::new(Shared {
            config,
            connected: AtomicBool::new(false),
            pending: DashMap::new(),
            chat: Mutex::new(None),
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_loop(
            endpoint.to_string(),
            Arc::clone(&shared),
            outgoing.clone(),
            outgoing_rx,
        ));
        Ok(Self {
            shared,
            outgoing,
            task,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Send one user message and wait for the final reply text.
    pub async fn chat(&self, text: &str, session_key: &str) -> VoiceResult<String> {
        if !self.is_connected() {
            return Err(VoiceError::NotConnected);
        }

        let chat_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = self.shared.chat.lock().await;
            let previous = slot.replace(ActiveChat {
                id: chat_id.clone(),
                run: Run::Awaiting,
                partial: String::new(),
                early: Vec::new(),
                reply: reply_tx,
            });
            if let Some(previous) = previous {
                debug!(chat = %previous.id, "Chat superseded");
                let _ = previous
                    .reply
                    .send(Err(VoiceError::remote("SUPERSEDED", "a newer chat request replaced this one")));
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let params = serde_json::to_value(ChatSendParams {
            session_key: session_key.to_string(),
            message: text.to_string(),
            idempotency_key: Uuid::new_v4().to_string(),
        })?;
        let frame = Frame::request(request_id.clone(), "chat.send", params).to_text()?;
        self.shared.pending.insert(
            request_id.clone(),
            PendingRequest::ChatSend {
                chat: chat_id.clone(),
            },
        );
        if self.outgoing.send(frame).is_err() {
            self.shared.pending.remove(&request_id);
            self.shared
                .resolve_chat(Some(&chat_id), Err(VoiceError::NotConnected))
                .await;
        }

        match tokio::time::timeout(self.shared.config.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(VoiceError::NotConnected),
            Err(_) => {
                warn!(chat = %chat_id, "Gateway chat timed out");
                self.shared
                    .resolve_chat(Some(&chat_id), Err(VoiceError::Timeout))
                    .await;
                Err(VoiceError::Timeout)
            }
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl ReasoningService for GatewayClient {
    async fn send(&self, text: &str, session_key: &str) -> VoiceResult<String> {
        self.chat(text, session_key).await
    }
}

async fn connection_loop(
    endpoint: String,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<String>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        match connect_async(endpoint.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %endpoint, "WebSocket opened to gateway");
                run_session(socket, &shared, &outgoing, &mut outgoing_rx).await;
            }
            Err(e) => warn!(url = %endpoint, "Gateway connection failed: {}", e),
        }
        shared.on_disconnected().await;
        // Frames queued for the dead socket are meaningless on the next one.
        while outgoing_rx.try_recv().is_ok() {}
        tokio::time::sleep(shared.config.reconnect_delay).await;
    }
}

async fn run_session(
    socket: Socket,
    shared: &Shared,
    outgoing: &mpsc::UnboundedSender<String>,
    outgoing_rx: &mut mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            Some(text) = outgoing_rx.recv() => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    error!("Gateway send failed: {}", e);
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), shared, outgoing).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_frame(text, shared, outgoing).await,
                    Err(_) => debug!("Non-UTF-8 binary frame dropped ({} bytes)", data.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Gateway closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Gateway receive failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }
}

async fn handle_frame(text: &str, shared: &Shared, outgoing: &mpsc::UnboundedSender<String>) {
    let frame = match Frame::parse(text) {
        Some(frame) => frame,
        None => {
            debug!("Unparseable gateway frame ignored");
            return;
        }
    };
    match frame {
        Frame::Event { event, payload } => match event.as_str() {
            "connect.challenge" => {
                info!("Gateway challenge received, sending connect");
                send_connect(shared, outgoing);
            }
            "chat" => match serde_json::from_value::<ChatEvent>(payload) {
                Ok(chat) => handle_chat(chat, shared).await,
                Err(e) => debug!("Malformed chat event: {}", e),
            },
            "tick" | "health" => {}
            other => debug!(event = %other, "Gateway event"),
        },
        Frame::Res {
            id,
            ok,
            payload,
            error,
        } => {
            let pending = match shared.pending.remove(&id) {
                Some((_, pending)) => pending,
                None => return,
            };
            let error = error.unwrap_or_default();
            match (pending, ok) {
                (PendingRequest::Connect, true) => {
                    shared.connected.store(true, Ordering::SeqCst);
                    info!("✅ Connected to gateway");
                }
                (PendingRequest::Connect, false) => {
                    error!("Gateway connect rejected: {} - {}", error.code(), error.message());
                }
                (PendingRequest::ChatSend { chat }, true) => {
                    let run_id = payload
                        .as_ref()
                        .and_then(|p| p.get("runId"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    debug!(chat = %chat, run_id = ?run_id, "chat.send accepted");
                    shared.accept_chat(&chat, run_id).await;
                }
                (PendingRequest::ChatSend { chat }, false) => {
                    warn!("chat.send failed: {} - {}", error.code(), error.message());
                    shared
                        .resolve_chat(Some(&chat), Err(VoiceError::remote(error.code(), error.message())))
                        .await;
                }
            }
        }
        Frame::Req { method, .. } => debug!(method = %method, "Unexpected request from gateway"),
    }
}

fn send_connect(shared: &Shared, outgoing: &mpsc::UnboundedSender<String>) {
    let id = Uuid::new_v4().to_string();
    let frame = serde_json::to_value(ConnectParams::from_config(&shared.config))
        .and_then(|params| Frame::request(id.clone(), "connect", params).to_text());
    match frame {
        Ok(text) => {
            shared.pending.insert(id, PendingRequest::Connect);
            let _ = outgoing.send(text);
        }
        Err(e) => error!("Could not encode connect request: {}", e),
    }
}

async fn handle_chat(event: ChatEvent, shared: &Shared) {
    let mut slot = shared.chat.lock().await;
    route_chat(&mut slot, event);
}

fn route_chat(slot: &mut Option<ActiveChat>, event: ChatEvent) {
    let route = match slot.as_ref() {
        Some(active) => active.route(&event),
        None => return,
    };
    match route {
        Route::Apply => apply_chat(slot, event),
        Route::Hold => {
            if let Some(active) = slot.as_mut() {
                active.early.push(event);
            }
        }
        Route::Stale => debug!(run_id = ?event.run_id, "Chat event for a superseded run dropped"),
    }
}

fn apply_chat(slot: &mut Option<ActiveChat>, event: ChatEvent) {
    let result = match event.update() {
        ChatUpdate::Delta(text) => {
            if let Some(active) = slot.as_mut() {
                active.partial = text;
            }
            return;
        }
        ChatUpdate::Ignored => return,
        ChatUpdate::Final(text) => Ok(text),
        ChatUpdate::Error(message) => {
            warn!("Gateway chat error: {}", message);
            Err(VoiceError::remote("CHAT_ERROR", message))
        }
        ChatUpdate::Aborted => {
            warn!("Gateway chat aborted");
            Err(VoiceError::remote("ABORTED", "chat aborted"))
        }
    };
    if let Some(active) = slot.take() {
        let result = result.map(|text| text.unwrap_or(active.partial));
        if let Ok(reply) = &result {
            info!("Gateway reply: {}", reply.chars().take(100).collect::<String>());
        }
        let _ = active.reply.send(result);
    }
}
