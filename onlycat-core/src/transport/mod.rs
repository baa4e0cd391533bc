// Transport abstraction for the gateway's duplex event channel
//
// The transport owns handshake, framing, heartbeats and reconnection
// cadence. The rest of the crate only sees the signal vocabulary below
// plus named events with optional acknowledgements.

use crate::error::OnlyCatResult;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, RwLock};

pub use self::ws::WebSocketTransport;

mod ws;

/// Lifecycle signals surfaced by a transport
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// Connection (or reconnection) established
    Connected,
    /// A connection attempt failed; the transport keeps retrying on its own
    ConnectError(String),
    /// Connection dropped
    Disconnected,
    /// The transport started another reconnection attempt
    ReconnectAttempt(u32),
    /// A reconnection attempt succeeded; a `Connected` signal follows
    Reconnected(u32),
}

/// Handler for a named event pushed by the gateway
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// One-shot receiver for a request acknowledgement.
///
/// The sender side is dropped without sending when the connection is lost,
/// so waiting on it never hangs past the transport's lifetime.
pub type AckReceiver = oneshot::Receiver<Value>;

/// Shared slot holding the live transport handle, if any.
///
/// Owned by the connection state machine; the request correlator clones the
/// inner `Arc` per call.
pub type TransportSlot = Arc<RwLock<Option<Arc<dyn Transport>>>>;

/// The gateway's persistent duplex event channel, treated as a black box
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting. Returns once the attempt is underway; connection
    /// outcomes are reported through [`Transport::signals`].
    async fn connect(&self) -> OnlyCatResult<()>;

    /// Protocol-level graceful disconnect. Broadcasts `Disconnected` so
    /// in-flight requests settle.
    async fn disconnect(&self) -> OnlyCatResult<()>;

    /// Engine-level hard teardown, skipping any close handshake.
    async fn abort(&self) -> OnlyCatResult<()>;

    /// Subscribe to lifecycle signals. Every subscriber sees every signal
    /// broadcast after the point of subscription.
    fn signals(&self) -> broadcast::Receiver<TransportSignal>;

    /// Emit a named event with arguments and a single-shot acknowledgement.
    async fn emit_with_ack(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<AckReceiver>;

    /// Register the handler for a named event, replacing any previous one.
    async fn on_event(&self, event: &str, handler: EventHandler);

    /// Deregister the handler for a named event.
    async fn off_event(&self, event: &str);

    /// Whether the transport is in an active connect/reconnect cycle.
    fn is_active(&self) -> bool;
}
