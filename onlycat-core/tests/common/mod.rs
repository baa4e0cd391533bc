// Shared test harness: a scriptable in-memory transport

use async_trait::async_trait;
use onlycat_core::error::OnlyCatResult;
use onlycat_core::transport::{AckReceiver, EventHandler, Transport, TransportSignal};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};

/// One event a caller emitted through the mock, with its ack sender
pub struct EmittedRequest {
    pub event: String,
    pub args: Vec<Value>,
    pub ack: oneshot::Sender<Value>,
}

/// In-memory transport: tests fire lifecycle signals, answer acks, and
/// push named events by hand.
pub struct MockTransport {
    signal_tx: broadcast::Sender<TransportSignal>,
    emitted: Mutex<Vec<EmittedRequest>>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    active: AtomicBool,
    connect_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        let (signal_tx, _) = broadcast::channel(32);
        Self {
            signal_tx,
            emitted: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
        }
    }

    /// Broadcast a lifecycle signal to every subscriber
    pub fn fire(&self, signal: TransportSignal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Pop the oldest emitted request
    pub fn take_emitted(&self) -> EmittedRequest {
        self.emitted.lock().unwrap().remove(0)
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted.lock().unwrap().len()
    }

    /// Invoke the registered handler for a named event, as the gateway would
    pub fn push_event(&self, event: &str, payload: Value) {
        let handler = self.handlers.lock().unwrap().get(event).cloned();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(event)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> OnlyCatResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> OnlyCatResult<()> {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.signal_tx.send(TransportSignal::Disconnected);
        Ok(())
    }

    async fn abort(&self) -> OnlyCatResult<()> {
        let _ = self.signal_tx.send(TransportSignal::Disconnected);
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<TransportSignal> {
        self.signal_tx.subscribe()
    }

    async fn emit_with_ack(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<AckReceiver> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.emitted.lock().unwrap().push(EmittedRequest {
            event: event.to_string(),
            args,
            ack: ack_tx,
        });
        Ok(ack_rx)
    }

    async fn on_event(&self, event: &str, handler: EventHandler) {
        self.handlers.lock().unwrap().insert(event.to_string(), handler);
    }

    async fn off_event(&self, event: &str) {
        self.handlers.lock().unwrap().remove(event);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
