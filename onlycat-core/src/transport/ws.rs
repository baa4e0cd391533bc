// Default WebSocket transport for the OnlyCat gateway
//
// Owns the connection loop: per-attempt token fetch, reconnection with
// capped exponential backoff, and routing of event/ack frames. Everything
// above this module only sees the `Transport` trait.

use crate::auth::TokenProvider;
use crate::config::ConnectionConfig;
use crate::error::{OnlyCatError, OnlyCatResult};
use crate::transport::{AckReceiver, EventHandler, Transport, TransportSignal};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, Notify, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wire frame exchanged with the gateway.
///
/// An outbound `Event` carries an `ack` id when the caller expects a reply;
/// the gateway answers with an `Ack` frame echoing that id.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Event {
        event: String,
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    Ack {
        ack: u64,
        #[serde(default)]
        data: Value,
    },
}

/// WebSocket transport for the OnlyCat gateway
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    tokens: Arc<dyn TokenProvider>,
    signal_tx: broadcast::Sender<TransportSignal>,
    outbound_tx: RwLock<Option<mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<HashMap<u64, tokio::sync::oneshot::Sender<Value>>>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    next_ack_id: AtomicU64,
    running: AtomicBool,
    active: AtomicBool,
    shutdown: AtomicBool,
    hard_abort: AtomicBool,
    closing: Notify,
}

impl WebSocketTransport {
    /// Create a new transport for the configured gateway
    pub fn new(config: ConnectionConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let (signal_tx, _) = broadcast::channel(32);

        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                signal_tx,
                outbound_tx: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                next_ack_id: AtomicU64::new(0),
                running: AtomicBool::new(false),
                active: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                hard_abort: AtomicBool::new(false),
                closing: Notify::new(),
            }),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> OnlyCatResult<()> {
        // One connection loop per transport; further calls are no-ops.
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.active.store(true, Ordering::SeqCst);
        tokio::spawn(Inner::run(Arc::clone(&self.inner)));
        Ok(())
    }

    async fn disconnect(&self) -> OnlyCatResult<()> {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.closing.notify_one();

        let _ = self.inner.signal_tx.send(TransportSignal::Disconnected);
        self.inner.fail_pending().await;
        Ok(())
    }

    async fn abort(&self) -> OnlyCatResult<()> {
        // Drops the current connection without a close handshake; the
        // connection loop stays alive and reconnects.
        self.inner.hard_abort.store(true, Ordering::SeqCst);
        self.inner.closing.notify_one();
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<TransportSignal> {
        self.inner.signal_tx.subscribe()
    }

    async fn emit_with_ack(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<AckReceiver> {
        let tx = self
            .inner
            .outbound_tx
            .read()
            .await
            .clone()
            .ok_or_else(|| OnlyCatError::transport("not connected"))?;

        let ack_id = self.inner.next_ack_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        self.inner.pending.lock().await.insert(ack_id, ack_tx);

        let frame = Frame::Event {
            event: event.to_string(),
            args,
            ack: Some(ack_id),
        };

        if tx.send(frame).is_err() {
            self.inner.pending.lock().await.remove(&ack_id);
            return Err(OnlyCatError::transport("connection closed"));
        }

        Ok(ack_rx)
    }

    async fn on_event(&self, event: &str, handler: EventHandler) {
        self.inner
            .handlers
            .write()
            .await
            .insert(event.to_string(), handler);
    }

    async fn off_event(&self, event: &str) {
        self.inner.handlers.write().await.remove(event);
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }
}

impl Inner {
    /// Connection loop: connect, drive the stream until it drops, back off,
    /// repeat. Exits on graceful disconnect or when auto-reconnect is off.
    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if attempt > 0 {
                let _ = self.signal_tx.send(TransportSignal::ReconnectAttempt(attempt));
                let delay = backoff_delay(
                    attempt - 1,
                    self.config.reconnect_delay,
                    self.config.max_reconnect_delay,
                );
                debug!("Reconnecting in {:?} (attempt {})", delay, attempt);
                sleep(delay).await;

                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }

            let url = match self.build_url().await {
                Ok(url) => url,
                Err(e) => {
                    warn!("Connect Error: {}", e);
                    let _ = self.signal_tx.send(TransportSignal::ConnectError(e.to_string()));
                    attempt += 1;
                    if !self.config.enable_auto_reconnect {
                        break;
                    }
                    continue;
                }
            };

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _response)) => {
                    if attempt > 0 {
                        debug!("Reconnect success");
                        let _ = self.signal_tx.send(TransportSignal::Reconnected(attempt));
                    }
                    info!("Connected to {}", self.config.gateway_url);
                    let _ = self.signal_tx.send(TransportSignal::Connected);

                    let (tx, mut rx) = mpsc::unbounded_channel();
                    *self.outbound_tx.write().await = Some(tx);

                    self.drive(ws_stream, &mut rx).await;

                    *self.outbound_tx.write().await = None;
                    self.fail_pending().await;

                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }

                    warn!("Disconnected.");
                    let _ = self.signal_tx.send(TransportSignal::Disconnected);
                    attempt = 1;
                }
                Err(e) => {
                    warn!("Connect Error: {}", e);
                    let _ = self.signal_tx.send(TransportSignal::ConnectError(e.to_string()));
                    attempt += 1;
                }
            }

            if !self.config.enable_auto_reconnect {
                break;
            }
        }

        self.active.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Pump one live connection until it closes or teardown is requested
    async fn drive(&self, ws_stream: WsStream, rx: &mut mpsc::UnboundedReceiver<Frame>) {
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.closing.notified() => {
                    if !self.hard_abort.swap(false, Ordering::SeqCst) {
                        let _ = sink.send(Message::Close(None)).await;
                    }
                    return;
                }
                frame = rx.recv() => {
                    let Some(frame) = frame else { return };
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!("Send failed: {}", e);
                        return;
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Close(_))) => {
                            info!("Connection closed by gateway");
                            return;
                        }
                        Some(Ok(_)) => {} // ping/pong handled by tungstenite
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            return;
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Route one inbound frame: acks to their pending request, events to
    /// the registered handler
    async fn handle_frame(&self, text: &str) {
        let frame = match serde_json::from_str::<Frame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to decode frame: {}", e);
                return;
            }
        };

        match frame {
            Frame::Ack { ack, data } => {
                if let Some(ack_tx) = self.pending.lock().await.remove(&ack) {
                    let _ = ack_tx.send(data);
                } else {
                    debug!("Ack {} has no pending request", ack);
                }
            }
            Frame::Event { event, mut args, .. } => {
                let handler = self.handlers.read().await.get(&event).cloned();
                if let Some(handler) = handler {
                    let payload = match args.len() {
                        1 => args.remove(0),
                        _ => Value::Array(args),
                    };
                    handler(payload);
                } else {
                    debug!("No handler for event '{}'", event);
                }
            }
        }
    }

    /// Drop all pending ack senders; their receivers observe the loss
    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }

    async fn build_url(&self) -> OnlyCatResult<String> {
        let token = self.tokens.token().await?;
        Ok(build_ws_url(&self.config, &token))
    }
}

/// Build the websocket URL with connection query metadata and bearer token
fn build_ws_url(config: &ConnectionConfig, token: &str) -> String {
    let base = config.gateway_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    format!(
        "{}/?platform={}&device={}&token={}",
        ws_base,
        urlencoding::encode(&config.platform),
        urlencoding::encode(&config.device),
        urlencoding::encode(token),
    )
}

/// Exponential backoff with jitter (0-25% of the capped delay)
fn backoff_delay(retry_count: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    use rand::Rng;

    let exponential = base_delay.saturating_mul(2u32.saturating_pow(retry_count.min(16)));
    let capped = exponential.min(max_delay);

    let jitter_range = capped.as_millis() as u64 / 4;
    let jitter = if jitter_range == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_range)
    };

    capped + Duration::from_millis(jitter)
}
