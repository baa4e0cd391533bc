// Gateway client facade
// Wires the connection state machine and request correlator into one handle

use crate::auth::TokenProvider;
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::error::OnlyCatResult;
use crate::request::RequestCorrelator;
use crate::transport::EventHandler;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Client for the OnlyCat gateway
///
/// Convenience wrapper for hosts that want a single handle; the state
/// machine and correlator remain usable on their own.
pub struct GatewayClient {
    config: ConnectionConfig,
    tokens: Arc<dyn TokenProvider>,
    state_machine: Arc<ConnectionStateMachine>,
    correlator: RequestCorrelator,
}

impl GatewayClient {
    /// Create a new client. No connection is attempted until
    /// [`GatewayClient::init_connection`].
    pub fn new(config: ConnectionConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let state_machine = Arc::new(ConnectionStateMachine::new());
        let correlator = RequestCorrelator::with_timeout(
            state_machine.transport_slot(),
            config.request_timeout,
        );

        Self {
            config,
            tokens,
            state_machine,
            correlator,
        }
    }

    /// The connection state machine
    pub fn state_machine(&self) -> &Arc<ConnectionStateMachine> {
        &self.state_machine
    }

    /// Set the connection state to `Starting`
    pub fn prepare_connection(&self) {
        self.state_machine.prepare_connection();
    }

    /// Initialise the gateway connection
    pub async fn init_connection(&self) {
        self.state_machine
            .init_connection(self.config.clone(), Arc::clone(&self.tokens))
            .await;
    }

    /// Close the gateway connection (idempotent)
    pub async fn close_connection(&self) {
        self.state_machine.close_connection().await;
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state_machine.state()
    }

    /// Subscribe to connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_machine.watch_state()
    }

    /// Authenticated identity, if the gateway has reported one
    pub fn identity(&self) -> Option<Value> {
        self.state_machine.identity()
    }

    /// Subscribe to identity changes
    pub fn watch_identity(&self) -> watch::Receiver<Option<Value>> {
        self.state_machine.watch_identity()
    }

    /// Register a handler for a named gateway event
    pub async fn subscribe_to_event(&self, event: &str, callback: EventHandler) {
        self.state_machine.subscribe_to_event(event, callback).await;
    }

    /// Deregister the handler for a named gateway event
    pub async fn unsubscribe_from_event(&self, event: &str) {
        self.state_machine.unsubscribe_from_event(event).await;
    }

    /// Whether the transport is in an active reconnection cycle
    pub async fn is_reconnecting(&self) -> bool {
        self.state_machine.is_reconnecting().await
    }

    /// Send an event and await its acknowledgement
    pub async fn send(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<Value> {
        self.correlator.send(event, args).await
    }

    /// Alias for [`GatewayClient::send`]
    pub async fn request(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<Value> {
        self.correlator.request(event, args).await
    }
}
