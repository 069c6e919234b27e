//! Integration Tests: Payment Stream Flow
//!
//! Tests live payment streams against the in-memory ledger:
//! - Events arrive in operation order with the right direction
//! - A dropped connection resumes from the last delivered event
//! - Replayed events are suppressed
//! - Repeated connect failures end the stream with `StreamTerminated`
//! - Two-way payments complete a condition set

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tradeio_ledger_mock::DemoScenario;
use tradeio_payments::stream::ledger_of_operation;
use tradeio_payments::{
    Asset, ConditionSet, Cursor, PaymentError, PaymentEvent, PaymentEventStream, PaymentKind,
    StreamState,
};

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn scenario() -> DemoScenario {
    let mut scenario = DemoScenario::new().expect("Failed to create scenario");
    scenario.config.stream.reconnect_backoff_ms = 10;
    scenario.config.stream.max_reconnect_backoff_ms = 50;
    scenario
}

async fn next(stream: &mut PaymentEventStream) -> PaymentEvent {
    tokio::time::timeout(EVENT_WAIT, stream.next_event())
        .await
        .expect("Timed out waiting for payment event")
        .expect("Stream ended unexpectedly")
        .expect("Stream delivered an error")
}

/// Test: A payment shows up on both accounts' streams
#[tokio::test]
async fn test_payment_appears_on_both_streams() {
    let scenario = scenario();
    let client = scenario.client();
    let alice = &scenario.account1;
    let bob = &scenario.account2;

    let mut alice_stream = client.watch_payments(alice.address(), Cursor::Now).await.unwrap();
    let mut bob_stream = client.watch_payments(bob.address(), Cursor::Now).await.unwrap();
    assert_eq!(alice_stream.state(), StreamState::Streaming);

    let result = client
        .send_payment(alice, bob.address(), Asset::native(), "5", None)
        .await
        .unwrap();

    let sent = next(&mut alice_stream).await;
    let received = next(&mut bob_stream).await;
    assert_eq!(sent, received);

    assert_eq!(sent.kind, PaymentKind::Payment);
    assert_eq!(sent.amount, "5.0000000");
    assert_eq!(sent.transaction_hash, result.hash);
    assert_eq!(sent.ledger, result.ledger);
    assert_eq!(ledger_of_operation(sent.id), result.ledger);
    assert!(sent.is_payment_from(alice.address()));
    assert!(received.is_deposit_to(bob.address()));

    alice_stream.close().await;
    bob_stream.close().await;
}

/// Test: Events on a stream come in increasing id order
#[tokio::test]
async fn test_events_are_ordered() {
    let scenario = scenario();
    let client = scenario.client();
    let mut stream = client
        .watch_payments(scenario.account2.address(), Cursor::Now)
        .await
        .unwrap();

    for amount in ["1", "2", "3"] {
        client
            .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), amount, None)
            .await
            .unwrap();
    }

    let events = vec![next(&mut stream).await, next(&mut stream).await, next(&mut stream).await];
    let amounts: Vec<&str> = events.iter().map(|e| e.amount.as_str()).collect();
    assert_eq!(amounts, vec!["1.0000000", "2.0000000", "3.0000000"]);
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));

    stream.close().await;
}

/// Test: Opening at a paging token replays what came after it
#[tokio::test]
async fn test_resume_from_cursor() {
    let scenario = scenario();
    let client = scenario.client();

    for amount in ["1", "2", "3"] {
        client
            .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), amount, None)
            .await
            .unwrap();
    }
    let history: Vec<PaymentEvent> = scenario
        .ledger
        .history()
        .into_iter()
        .filter(|e| e.from == scenario.account1.address() && e.to == scenario.account2.address())
        .collect();
    assert_eq!(history.len(), 3);

    let cursor = Cursor::from(history[0].paging_token.as_str());
    let mut stream = client.watch_payments(scenario.account2.address(), cursor).await.unwrap();

    assert_eq!(next(&mut stream).await, history[1]);
    assert_eq!(next(&mut stream).await, history[2]);

    stream.close().await;
}

/// Test: No payment is lost or duplicated across a dropped connection
#[tokio::test]
async fn test_reconnect_is_complete_and_deduplicated() {
    let scenario = scenario();
    let client = scenario.client();
    scenario.ledger.replay_on_reconnect(true);

    let mut stream = client
        .watch_payments(scenario.account1.address(), Cursor::Now)
        .await
        .unwrap();

    let pay = |amount: &'static str| {
        let client = &client;
        let scenario = &scenario;
        async move {
            client
                .send_payment(&scenario.account2, scenario.account1.address(), Asset::native(), amount, None)
                .await
                .unwrap()
        }
    };

    pay("1").await;
    let first = next(&mut stream).await;
    assert_eq!(first.amount, "1.0000000");

    scenario.ledger.drop_connections();
    pay("2").await;
    pay("3").await;

    let second = next(&mut stream).await;
    let third = next(&mut stream).await;
    assert_eq!(second.amount, "2.0000000");
    assert_eq!(third.amount, "3.0000000");
    assert!(first.id < second.id && second.id < third.id);

    // Nothing else is pending: the replayed first event was dropped
    let extra = tokio::time::timeout(Duration::from_millis(200), stream.next_event()).await;
    assert!(extra.is_err(), "Unexpected extra event: {:?}", extra);

    stream.close().await;
    assert_eq!(stream.state(), StreamState::Closed);
}

/// Test: A `now` stream dropped before its first event misses nothing
/// paid while it was reconnecting
#[tokio::test]
async fn test_drop_before_first_event_loses_nothing() {
    let mut scenario = scenario();
    scenario.config.stream.reconnect_backoff_ms = 200;
    scenario.config.stream.max_reconnect_backoff_ms = 200;
    let client = scenario.client();

    let mut stream = client
        .watch_payments(scenario.account2.address(), Cursor::Now)
        .await
        .unwrap();

    scenario.ledger.drop_connections();
    // Applied while the stream waits out its reconnect backoff
    client
        .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), "1", None)
        .await
        .unwrap();

    let first = next(&mut stream).await;
    client
        .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), "2", None)
        .await
        .unwrap();
    let second = next(&mut stream).await;

    assert_eq!(
        vec![first.amount.as_str(), second.amount.as_str()],
        vec!["1.0000000", "2.0000000"]
    );
    assert_eq!(stream.state(), StreamState::Streaming);

    stream.close().await;
}

/// Test: The stream gives up after the configured number of reconnects
#[tokio::test]
async fn test_stream_terminates_after_failed_reconnects() {
    let mut scenario = scenario();
    scenario.config.stream.max_reconnect_attempts = 2;
    let client = scenario.client();

    let mut stream = client
        .watch_payments(scenario.account1.address(), Cursor::Now)
        .await
        .unwrap();

    scenario.ledger.fail_next_connects(10);
    scenario.ledger.drop_connections();

    let item = tokio::time::timeout(EVENT_WAIT, stream.next_event())
        .await
        .expect("Timed out waiting for termination")
        .expect("Termination should be delivered");

    match item {
        Err(PaymentError::StreamTerminated { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("Expected StreamTerminated, got {:?}", other),
    }
    assert!(stream.next_event().await.is_none());

    stream.close().await;
    assert_eq!(stream.state(), StreamState::Closed);
}

/// Test: Opening a stream for an unknown account fails up front
#[tokio::test]
async fn test_stream_for_missing_account() {
    let scenario = scenario();
    let client = scenario.client();
    let nobody = tradeio_payments::KeyPair::random();

    let result = client.watch_payments(nobody.address(), Cursor::Now).await;
    assert!(matches!(result, Err(PaymentError::NotFound(_))));
}

/// Test: Closing twice is harmless
#[tokio::test]
async fn test_close_is_idempotent() {
    let scenario = scenario();
    let client = scenario.client();
    let mut stream = client
        .watch_payments(scenario.account1.address(), Cursor::Now)
        .await
        .unwrap();

    stream.close().await;
    stream.close().await;
    assert_eq!(stream.state(), StreamState::Closed);
    assert!(stream.next_event().await.is_none());
}

/// Test: account1 pays account2 and account2 pays back; account1's handler
/// sees both directions within ten seconds
#[tokio::test]
async fn test_two_way_payments_complete_conditions() {
    let scenario = scenario();
    let client = scenario.client();
    let alice = scenario.account1.clone();
    let bob = scenario.account2.clone();

    let conditions = Arc::new(ConditionSet::new(["payment", "deposit"]));
    let marker = Arc::clone(&conditions);
    let watched = alice.address().to_string();

    let mut stream = client
        .watch_payments_with_handler(alice.address(), Cursor::Now, move |item| {
            let Ok(event) = item else { return };
            if event.is_payment_from(&watched) {
                marker.mark("payment");
            }
            if event.is_deposit_to(&watched) {
                marker.mark("deposit");
            }
        })
        .await
        .unwrap();

    client
        .send_payment(&alice, bob.address(), Asset::native(), "10", Some("outbound"))
        .await
        .unwrap();
    client
        .send_payment(&bob, alice.address(), Asset::native(), "4", Some("inbound"))
        .await
        .unwrap();

    let outcome = conditions.wait(Duration::from_secs(10)).await;
    assert!(outcome.is_ok(), "Conditions not met: {:?}", outcome);
    assert!(stream.next_event().await.is_none(), "Handler streams have no channel");

    stream.close().await;
}
