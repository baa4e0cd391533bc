// Request/response correlation over the gateway's event channel
//
// A request is one outbound event emission awaiting exactly one of three
// outcomes: the acknowledgement arrives, the transport disconnects while
// the request is in flight, or the timeout elapses.

use crate::error::{is_success, OnlyCatError, OnlyCatResult};
use crate::transport::{TransportSignal, TransportSlot};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Default time a request may stay in flight before settling as timed out
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlates outbound events with their asynchronous acknowledgements.
///
/// Any number of requests may be in flight concurrently; each settles
/// independently, and not necessarily in emission order. Settlement is a
/// single commit: whichever of acknowledgement, disconnect, or timeout
/// occurs first decides the outcome, and the others are discarded.
pub struct RequestCorrelator {
    transport: TransportSlot,
    next_request_id: AtomicU64,
    request_timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator borrowing transport handles from the given slot
    /// (see [`crate::connection::ConnectionStateMachine::transport_slot`])
    pub fn new(transport: TransportSlot) -> Self {
        Self::with_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a correlator with a non-default request timeout
    pub fn with_timeout(transport: TransportSlot, request_timeout: Duration) -> Self {
        Self {
            transport,
            next_request_id: AtomicU64::new(0),
            request_timeout,
        }
    }

    /// Number of requests issued by this correlator so far. Request ids are
    /// strictly increasing from 1 and never reused.
    pub fn requests_issued(&self) -> u64 {
        self.next_request_id.load(Ordering::SeqCst)
    }

    /// Send an event to the gateway and await its acknowledgement.
    ///
    /// Fails with `NotInitialized` when no transport handle exists (no
    /// request id is consumed), with `Disconnected` when the transport
    /// drops while the request is in flight, with `Timeout` when neither
    /// happens within the request timeout, and with `Remote` when the
    /// response carries a non-success status code. A successful response
    /// (no code, or code 200) is returned verbatim.
    pub async fn send(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<Value> {
        let transport = self.transport.read().await.clone();
        let Some(transport) = transport else {
            return Err(OnlyCatError::not_initialized());
        };

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("[{}] -> event: '{}' - args: {:?}", request_id, event, args);

        // Subscribe to the disconnect broadcast before emitting, so a drop
        // racing the emission cannot be missed.
        let mut signals = transport.signals();
        let mut ack = transport.emit_with_ack(event, args).await?;

        let timeout = sleep(self.request_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                response = &mut ack => {
                    return match response {
                        Ok(response) => {
                            // Teardown may have raced the acknowledgement.
                            if self.transport.read().await.is_none() {
                                return Err(OnlyCatError::not_initialized());
                            }
                            debug!(
                                "[{}] <- event: '{}' - response: '{}'",
                                request_id, event, truncate(&response.to_string(), 200),
                            );
                            if is_success(&response) {
                                Ok(response)
                            } else {
                                error!(
                                    "Error: event '{}' - response: '{}'",
                                    event, response,
                                );
                                Err(OnlyCatError::remote(response))
                            }
                        }
                        // Ack sender dropped without replying: connection lost.
                        Err(_) => {
                            debug!("[{}] <-x- DISCONNECTED", request_id);
                            Err(OnlyCatError::disconnected())
                        }
                    };
                }
                signal = signals.recv() => {
                    match signal {
                        Ok(TransportSignal::Disconnected)
                        | Err(broadcast::error::RecvError::Closed) => {
                            debug!("[{}] <-x- DISCONNECTED", request_id);
                            return Err(OnlyCatError::disconnected());
                        }
                        // Other lifecycle signals do not settle a request.
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                _ = &mut timeout => {
                    warn!("[{}] <-?- Request Timeout", request_id);
                    return Err(OnlyCatError::timeout(self.request_timeout));
                }
            }
        }
    }

    /// Alias for [`RequestCorrelator::send`]
    pub async fn request(&self, event: &str, args: Vec<Value>) -> OnlyCatResult<Value> {
        self.send(event, args).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
