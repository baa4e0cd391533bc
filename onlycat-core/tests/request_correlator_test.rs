// Request correlation tests: the three settlement outcomes, race ordering,
// id allocation, and cleanup

mod common;

use common::MockTransport;
use futures::poll;
use onlycat_core::connection::ConnectionStateMachine;
use onlycat_core::error::OnlyCatError;
use onlycat_core::request::RequestCorrelator;
use onlycat_core::transport::{Transport, TransportSignal, TransportSlot};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};

fn slot_with(mock: &Arc<MockTransport>) -> TransportSlot {
    Arc::new(RwLock::new(Some(Arc::clone(mock) as Arc<dyn Transport>)))
}

#[tokio::test]
async fn test_send_without_transport_fails_not_initialized() {
    let slot: TransportSlot = Arc::new(RwLock::new(None));
    let correlator = RequestCorrelator::new(slot);

    let result = correlator.send("ping", vec![]).await;
    assert!(matches!(result, Err(OnlyCatError::NotInitialized { .. })));
    assert_eq!(correlator.requests_issued(), 0);
}

#[tokio::test]
async fn test_successful_acknowledgement_resolves_with_payload() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![json!("payload")]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    let request = mock.take_emitted();
    assert_eq!(request.event, "ping");
    assert_eq!(request.args, vec![json!("payload")]);
    request.ack.send(json!({"code": 200, "data": "pong"})).unwrap();

    let response = send.await.expect("ack should resolve the request");
    assert_eq!(response, json!({"code": 200, "data": "pong"}));
}

#[tokio::test]
async fn test_response_without_code_is_success() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("getDevices", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    mock.take_emitted().ack.send(json!(["flap-1", "flap-2"])).unwrap();

    let response = send.await.unwrap();
    assert_eq!(response, json!(["flap-1", "flap-2"]));
}

#[tokio::test]
async fn test_non_success_code_rejects_with_payload() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    mock.take_emitted()
        .ack
        .send(json!({"code": 500, "message": "err"}))
        .unwrap();

    match send.await {
        Err(OnlyCatError::Remote { response }) => {
            assert_eq!(response, json!({"code": 500, "message": "err"}));
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_before_ack_rejects_with_1006() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    mock.fire(TransportSignal::Disconnected);

    match send.await {
        Err(OnlyCatError::Disconnected { code, message }) => {
            assert_eq!(code, 1006);
            assert_eq!(message, "Disconnected");
        }
        other => panic!("expected disconnected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_lifecycle_signals_do_not_settle() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    mock.fire(TransportSignal::ReconnectAttempt(1));
    mock.fire(TransportSignal::Reconnected(1));
    mock.fire(TransportSignal::Connected);
    assert!(poll!(&mut send).is_pending());

    mock.take_emitted().ack.send(json!({"code": 200})).unwrap();
    assert!(send.await.is_ok());
}

#[tokio::test]
async fn test_ack_and_disconnect_race_settles_exactly_once() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    // both outcomes arrive within the same scheduling tick
    let request = mock.take_emitted();
    let _ = request.ack.send(json!({"code": 200, "data": "pong"}));
    mock.fire(TransportSignal::Disconnected);

    // exactly one settlement: either the ack won or the disconnect did
    match send.await {
        Ok(response) => assert_eq!(response, json!({"code": 200, "data": "pong"})),
        Err(OnlyCatError::Disconnected { code, .. }) => assert_eq!(code, 1006),
        other => panic!("unexpected settlement: {:?}", other),
    }
}

#[tokio::test]
async fn test_dropped_ack_sender_counts_as_disconnect() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    // the transport failing its pending table drops the sender unfired
    drop(mock.take_emitted().ack);

    assert!(matches!(
        send.await,
        Err(OnlyCatError::Disconnected { code: 1006, .. })
    ));
}

#[tokio::test]
async fn test_teardown_between_emit_and_ack_fails_not_initialized() {
    let mock = Arc::new(MockTransport::new());
    let slot = slot_with(&mock);
    let correlator = RequestCorrelator::new(Arc::clone(&slot));

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    // handle torn down while the request is in flight
    *slot.write().await = None;
    mock.take_emitted().ack.send(json!({"code": 200})).unwrap();

    assert!(matches!(
        send.await,
        Err(OnlyCatError::NotInitialized { .. })
    ));
}

#[tokio::test]
async fn test_timeout_settles_the_request() {
    let mock = Arc::new(MockTransport::new());
    let correlator =
        RequestCorrelator::with_timeout(slot_with(&mock), Duration::from_millis(50));

    let result = timeout(Duration::from_secs(1), correlator.send("ping", vec![]))
        .await
        .expect("request should settle on its own timer");

    assert!(matches!(result, Err(OnlyCatError::Timeout { .. })));
}

#[tokio::test]
async fn test_request_ids_increase_regardless_of_outcome() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    // success
    let send = correlator.send("a", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());
    mock.take_emitted().ack.send(json!({"code": 200})).unwrap();
    send.await.unwrap();
    assert_eq!(correlator.requests_issued(), 1);

    // remote failure
    let send = correlator.send("b", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());
    mock.take_emitted().ack.send(json!({"code": 500})).unwrap();
    assert!(send.await.is_err());
    assert_eq!(correlator.requests_issued(), 2);

    // disconnect failure
    let send = correlator.send("c", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());
    mock.fire(TransportSignal::Disconnected);
    assert!(send.await.is_err());
    assert_eq!(correlator.requests_issued(), 3);
}

#[tokio::test]
async fn test_concurrent_requests_settle_independently() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let first = correlator.send("first", vec![]);
    tokio::pin!(first);
    assert!(poll!(&mut first).is_pending());

    let second = correlator.send("second", vec![]);
    tokio::pin!(second);
    assert!(poll!(&mut second).is_pending());

    assert_eq!(mock.emitted_count(), 2);
    let req_first = mock.take_emitted();
    let req_second = mock.take_emitted();

    // resolve out of emission order
    req_second.ack.send(json!({"data": "second"})).unwrap();
    assert!(poll!(&mut first).is_pending());
    assert_eq!(second.await.unwrap(), json!({"data": "second"}));

    req_first.ack.send(json!({"data": "first"})).unwrap();
    assert_eq!(first.await.unwrap(), json!({"data": "first"}));
}

#[tokio::test]
async fn test_request_is_an_alias_for_send() {
    let mock = Arc::new(MockTransport::new());
    let correlator = RequestCorrelator::new(slot_with(&mock));

    let send = correlator.request("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    mock.take_emitted().ack.send(json!({"code": 200})).unwrap();
    assert!(send.await.is_ok());
    assert_eq!(correlator.requests_issued(), 1);
}

#[tokio::test]
async fn test_close_connection_settles_in_flight_requests() {
    let sm = ConnectionStateMachine::new();
    let mock = Arc::new(MockTransport::new());
    sm.attach_transport(mock.clone()).await;

    let correlator = RequestCorrelator::new(sm.transport_slot());

    let send = correlator.send("ping", vec![]);
    tokio::pin!(send);
    assert!(poll!(&mut send).is_pending());

    // teardown disconnects the transport before discarding the handle,
    // so the in-flight request observes the disconnect
    sm.close_connection().await;

    assert!(matches!(
        send.await,
        Err(OnlyCatError::Disconnected { code: 1006, .. })
    ));
}
