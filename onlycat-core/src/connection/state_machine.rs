// Connection state machine
// Tracks the logical gateway connection lifecycle and owns the transport handle

use crate::auth::TokenProvider;
use crate::config::ConnectionConfig;
use crate::transport::{
    EventHandler, Transport, TransportSignal, TransportSlot, WebSocketTransport,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event the gateway pushes after authenticating the session
const IDENTITY_EVENT: &str = "userUpdate";

/// Logical connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Starting,
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection state machine
///
/// Owns the transport handle and exposes the current [`ConnectionState`]
/// and authenticated identity as observable cells. Transport lifecycle
/// errors are logged, never surfaced to callers.
pub struct ConnectionStateMachine {
    state_tx: watch::Sender<ConnectionState>,
    identity_tx: watch::Sender<Option<Value>>,
    transport: TransportSlot,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionStateMachine {
    /// Create a new state machine in the `Disconnected` state
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (identity_tx, _) = watch::channel(None);

        Self {
            state_tx,
            identity_tx,
            transport: Arc::new(RwLock::new(None)),
            signal_task: Mutex::new(None),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes (current value + notifications)
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Get the authenticated identity, if the gateway has reported one
    pub fn identity(&self) -> Option<Value> {
        self.identity_tx.borrow().clone()
    }

    /// Subscribe to identity changes
    pub fn watch_identity(&self) -> watch::Receiver<Option<Value>> {
        self.identity_tx.subscribe()
    }

    /// The shared transport slot. Request correlation borrows the live
    /// handle from here per call.
    pub fn transport_slot(&self) -> TransportSlot {
        Arc::clone(&self.transport)
    }

    /// Set the connection state to `Starting`, prior to the first connect
    /// attempt. No transport side effect.
    pub fn prepare_connection(&self) {
        self.state_tx.send_replace(ConnectionState::Starting);
    }

    /// Initialise the gateway connection with the default WebSocket
    /// transport. Connect errors are logged; the transport's own
    /// reconnection policy governs retry cadence.
    pub async fn init_connection(&self, config: ConnectionConfig, tokens: Arc<dyn TokenProvider>) {
        debug!("Connecting to {}", config.gateway_url);
        let transport = Arc::new(WebSocketTransport::new(config, tokens));
        self.attach_transport(transport).await;
    }

    /// Wire an already-constructed transport: register the identity-update
    /// handler, drive lifecycle signals into state transitions, and start
    /// connecting. Set state to `Connecting` immediately.
    pub async fn attach_transport(&self, transport: Arc<dyn Transport>) {
        let mut signals = transport.signals();

        // Identity updates ride the named-event channel.
        let identity_tx = self.identity_tx.clone();
        let handler: EventHandler = Arc::new(move |user: Value| {
            debug!("UserUpdate: '{:?}'", user.get("id"));
            identity_tx.send_replace(Some(user));
        });
        transport.on_event(IDENTITY_EVENT, handler).await;

        *self.transport.write().await = Some(Arc::clone(&transport));
        self.state_tx.send_replace(ConnectionState::Connecting);

        let state_tx = self.state_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => {
                        log_signal(&signal);
                        let current = *state_tx.borrow();
                        let next = apply(current, &signal);
                        if next != current {
                            state_tx.send_replace(next);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Signal stream lagged by {}", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.signal_task.lock().await.replace(handle) {
            old.abort();
        }

        if let Err(e) = transport.connect().await {
            warn!("Connect Error: {}", e);
        }
    }

    /// Close the gateway connection: disconnect the transport, discard the
    /// handle, reset state and identity. No-op when no handle exists.
    ///
    /// The transport is disconnected before the handle is discarded so that
    /// in-flight requests observe the disconnect signal.
    pub async fn close_connection(&self) {
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
            if let Some(task) = self.signal_task.lock().await.take() {
                task.abort();
            }
            self.state_tx.send_replace(ConnectionState::Disconnected);
            self.identity_tx.send_replace(None);
        }
    }

    /// Engine-level hard teardown of the current connection. The transport
    /// stays attached and reconnects on its own. No-op without a transport.
    pub async fn disconnect_engine(&self) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            if let Err(e) = transport.abort().await {
                warn!("Engine disconnect failed: {}", e);
            }
        }
    }

    /// Protocol-level graceful disconnect. No-op without a transport.
    pub async fn disconnect_socket(&self) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
    }

    /// Register a handler for a named gateway event. No-op without a transport.
    pub async fn subscribe_to_event(&self, event: &str, callback: EventHandler) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            transport.on_event(event, callback).await;
        }
    }

    /// Deregister the handler for a named gateway event. No-op without a transport.
    pub async fn unsubscribe_from_event(&self, event: &str) {
        let transport = self.transport.read().await.clone();
        if let Some(transport) = transport {
            transport.off_event(event).await;
        }
    }

    /// Whether the transport is in an active reconnection cycle
    pub async fn is_reconnecting(&self) -> bool {
        self.transport
            .read()
            .await
            .as_ref()
            .map(|t| t.is_active())
            .unwrap_or(false)
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// State transition table. Signals not listed for the current state leave
/// it unchanged.
fn apply(current: ConnectionState, signal: &TransportSignal) -> ConnectionState {
    match (current, signal) {
        (
            ConnectionState::Connecting | ConnectionState::Reconnecting,
            TransportSignal::Connected,
        ) => ConnectionState::Connected,
        (_, TransportSignal::Disconnected) => ConnectionState::Disconnected,
        (ConnectionState::Connected, TransportSignal::ReconnectAttempt(_)) => {
            ConnectionState::Reconnecting
        }
        // connect_error and reconnect-success only log; the subsequent
        // connect signal drives the state
        _ => current,
    }
}

fn log_signal(signal: &TransportSignal) {
    match signal {
        TransportSignal::Connected => debug!("Connected."),
        TransportSignal::ConnectError(e) => warn!("Connect Error: {}", e),
        TransportSignal::Disconnected => warn!("Disconnected."),
        TransportSignal::ReconnectAttempt(n) => debug!("Reconnect attempt {}", n),
        TransportSignal::Reconnected(n) => debug!("Reconnect success (attempt {})", n),
    }
}
