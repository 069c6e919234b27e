//! Integration Tests: Single-Key Payment Flow
//!
//! Tests the path from account lookup to an applied transaction:
//! - Sequence numbers advance by one per transaction
//! - Balances move between accounts
//! - Submission errors are classified from ledger result codes
//! - Transport failures are retried, timeouts are enforced

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tradeio_ledger_mock::DemoScenario;
use tradeio_payments::{
    Asset, KeyPair, Memo, Operation, PaymentError, RetryPolicy, SignatureCollector,
    SubmissionClient, TransactionBuilder,
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        jitter_ms: 5,
    }
}

/// Test: A payment bumps the sender's sequence by one and moves the amount
#[tokio::test]
async fn test_payment_advances_sequence_and_moves_balance() {
    let scenario = DemoScenario::new().expect("Failed to create scenario");
    let client = scenario.client();
    let sender = &scenario.account1;
    let receiver = scenario.account2.address();

    let before = client.fetch_account(sender.address()).await.unwrap();

    let result = client
        .send_payment(sender, receiver, Asset::native(), "10", Some("test payment"))
        .await
        .expect("Payment should be applied");

    assert!(result.success);
    assert_eq!(result.hash.len(), 64);
    assert_eq!(result.ledger, scenario.ledger.current_ledger());

    let after = client.fetch_account(sender.address()).await.unwrap();
    assert_eq!(after.sequence, before.sequence + 1, "Sequence should advance by one");

    assert_eq!(
        scenario.ledger.balance(receiver, &Asset::native()).as_deref(),
        Some("10010.0000000")
    );
    assert_eq!(
        scenario.ledger.balance(sender.address(), &Asset::native()).as_deref(),
        Some("9989.9999900")
    );
}

/// Test: Back-to-back payments each fetch a fresh sequence number
#[tokio::test]
async fn test_consecutive_payments() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let start = scenario.ledger.account(scenario.account1.address()).unwrap().sequence;

    for _ in 0..3 {
        client
            .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), "1", None)
            .await
            .unwrap();
    }

    let account = client.fetch_account(scenario.account1.address()).await.unwrap();
    assert_eq!(account.sequence, start + 3);
}

/// Test: A native payment to a missing account creates it
#[tokio::test]
async fn test_payment_creates_missing_destination() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let newcomer = KeyPair::random();

    assert!(!client.account_exists(newcomer.address()).await.unwrap());

    client
        .send_payment(&scenario.account1, newcomer.address(), Asset::native(), "50", None)
        .await
        .expect("Create account should be applied");

    let account = client.fetch_account(newcomer.address()).await.unwrap();
    assert_eq!(account.balance("native"), Some("50.0000000"));
    assert_eq!(account.signer_weight(newcomer.address()), 1);
}

/// Test: Paying more than the spendable balance is Underfunded
#[tokio::test]
async fn test_underfunded_payment() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();

    let err = client
        .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), "1000000", None)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Underfunded { .. }), "got {:?}", err);
    let context = err.context().expect("Underfunded should carry context");
    assert_eq!(context.account, scenario.account1.address());
    assert_eq!(context.operation, "payment");
}

/// Test: Two envelopes built from the same snapshot cannot both apply
#[tokio::test]
async fn test_stale_envelope_is_bad_sequence() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let account = client.fetch_account(scenario.account1.address()).await.unwrap();
    let payment = Operation::payment(scenario.account2.address(), Asset::native(), "1");

    let builder = client.builder();
    let mut first = builder.build(&account, vec![payment.clone()]).unwrap();
    let mut second = builder.memo(Memo::Id(7)).build(&account, vec![payment]).unwrap();
    client.collector().sign(&mut first, &scenario.account1).unwrap();
    client.collector().sign(&mut second, &scenario.account1).unwrap();

    client.submitter().submit(first).await.expect("First envelope should apply");
    let err = client.submitter().submit(second).await.unwrap_err();

    assert!(matches!(err, PaymentError::BadSequence { .. }), "got {:?}", err);
    assert!(!err.is_retryable());
}

/// Test: Signing twice with the same key is refused
#[tokio::test]
async fn test_duplicate_signer() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let account = client.fetch_account(scenario.account1.address()).await.unwrap();

    let mut envelope = client
        .builder()
        .build(&account, vec![Operation::payment(scenario.account2.address(), Asset::native(), "1")])
        .unwrap();

    client.collector().sign(&mut envelope, &scenario.account1).unwrap();
    let err = client.collector().sign(&mut envelope, &scenario.account1).unwrap_err();

    assert_eq!(
        err,
        PaymentError::DuplicateSigner {
            signer: scenario.account1.address().to_string()
        }
    );
    assert_eq!(envelope.signatures().len(), 1);
}

/// Test: Identical inputs give identical envelopes and hashes
#[tokio::test]
async fn test_envelope_hash_is_deterministic() {
    let scenario = DemoScenario::new().unwrap();
    let account = scenario.ledger.account(scenario.account1.address()).unwrap();
    let ops = vec![Operation::payment(scenario.account2.address(), Asset::native(), "12.5")];

    let builder = TransactionBuilder::new(&scenario.config).memo_text("determinism");
    let a = builder.build(&account, ops.clone()).unwrap();
    let b = builder.build(&account, ops.clone()).unwrap();
    assert_eq!(a.hash_hex(), b.hash_hex());
    assert_eq!(a.to_base64().unwrap(), b.to_base64().unwrap());

    let mainnet = tradeio_payments::StellarConfig::mainnet();
    let c = TransactionBuilder::new(&mainnet).memo_text("determinism").build(&account, ops).unwrap();
    assert_eq!(a.transaction_xdr(), c.transaction_xdr());
    assert_ne!(a.hash_hex(), c.hash_hex(), "Network passphrase must change the hash");
}

/// Test: A signature made for another network is rejected by the ledger
#[tokio::test]
async fn test_wrong_network_signature_is_unauthorized() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let account = client.fetch_account(scenario.account1.address()).await.unwrap();

    let mainnet = tradeio_payments::StellarConfig::mainnet();
    let mut envelope = TransactionBuilder::new(&mainnet)
        .build(&account, vec![Operation::payment(scenario.account2.address(), Asset::native(), "1")])
        .unwrap();
    SignatureCollector::new(&mainnet).sign(&mut envelope, &scenario.account1).unwrap();

    let err = client.submitter().submit(envelope).await.unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized { .. }), "got {:?}", err);
}

/// Test: A zero timeout fails without reaching the ledger
#[tokio::test]
async fn test_zero_timeout_is_network_error() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let account = client.fetch_account(scenario.account1.address()).await.unwrap();

    let mut envelope = client
        .builder()
        .build(&account, vec![Operation::payment(scenario.account2.address(), Asset::native(), "1")])
        .unwrap();
    client.collector().sign(&mut envelope, &scenario.account1).unwrap();

    let err = client
        .submitter()
        .submit_with_timeout(envelope, Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::NetworkError(_)), "got {:?}", err);
    assert_eq!(scenario.ledger.submission_count(), 0);
}

/// Test: Transport failures are retried until the ledger answers
#[tokio::test]
async fn test_transport_failures_are_retried() {
    let mut scenario = DemoScenario::new().unwrap();
    scenario.config.retry = fast_retry();
    let client = scenario.client();

    scenario.ledger.fail_next_submissions(2);
    let result = client
        .send_payment(&scenario.account1, scenario.account2.address(), Asset::native(), "3", None)
        .await
        .expect("Third attempt should succeed");

    assert!(result.success);
    assert_eq!(scenario.ledger.submission_count(), 1);
}

/// Test: Retries stop after the policy's limit
#[tokio::test]
async fn test_retries_are_bounded() {
    let scenario = DemoScenario::new().unwrap();
    let ledger = Arc::new(scenario.ledger.clone());
    let submitter = SubmissionClient::new(ledger, &scenario.config).with_retry_policy(fast_retry());

    let account = scenario.ledger.account(scenario.account1.address()).unwrap();
    let mut envelope = TransactionBuilder::new(&scenario.config)
        .build(&account, vec![Operation::payment(scenario.account2.address(), Asset::native(), "1")])
        .unwrap();
    SignatureCollector::new(&scenario.config)
        .sign(&mut envelope, &scenario.account1)
        .unwrap();

    scenario.ledger.fail_next_submissions(10);
    let err = submitter.submit(envelope).await.unwrap_err();

    assert!(err.is_retryable(), "got {:?}", err);
    assert_eq!(scenario.ledger.submission_count(), 0);
}

/// Test: Trustline then credit payment through the client
#[tokio::test]
async fn test_credit_asset_payment() {
    let scenario = DemoScenario::new().unwrap();
    let client = scenario.client();
    let usd = Asset::credit("USD", scenario.account1.address());

    client
        .submit_operations(
            scenario.account2.address(),
            std::slice::from_ref(&scenario.account2),
            vec![Operation::ChangeTrust { asset: usd.clone(), limit: None }],
            Memo::None,
        )
        .await
        .expect("Trustline should be created");

    client
        .send_payment(&scenario.account1, scenario.account2.address(), usd.clone(), "42", None)
        .await
        .expect("Issuer payment should apply");

    let holder = client.fetch_account(scenario.account2.address()).await.unwrap();
    assert_eq!(holder.balance(&usd.canonical()), Some("42.0000000"));
}
