//! Integration Tests: Horizon and Friendbot over HTTP
//!
//! A local TCP listener answers with canned responses, one per connection:
//! - Friendbot: anything but 200 is a `FundingError`
//! - Accounts: 404 is `NotFound`
//! - Submission: 400 result codes are classified, 429/5xx are retried
//! - Payment history: the newest paging token pins a `now` stream

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tradeio_payments::{
    Account, AccountFetcher, Asset, Cursor, Faucet, HorizonClient, KeyPair, Operation, PaymentError,
    PaymentFeed, RetryPolicy, SignatureCollector, StellarConfig, SubmissionClient,
    SubmissionOutcome, TransactionBuilder, TransactionEnvelope,
};

const ACCOUNT: &str = "GBCVUVHACJQRW7YSVXX6EJHGOHZHRRQWZMIZLQMFD4U5TC55QNYPM3R6";
const DESTINATION: &str = "GB4BDWG64YW4F2D3O3DF3WTAVM2IJBHPH4DKWSUSYFHWUPLQEJRQ5AYN";

/// Serve `responses` in order, one per connection; the handle yields the
/// raw requests that were received.
async fn stub_server(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind stub");
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);

            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });

    (base, handle)
}

/// Read one request: headers, then `Content-Length` bytes of body
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).to_string()
}

fn config(base: &str) -> StellarConfig {
    let mut config = StellarConfig::testnet();
    config.horizon_url = base.to_string();
    config.friendbot_url = Some(base.to_string());
    config.request_timeout_ms = 5_000;
    config
}

fn signed_envelope(config: &StellarConfig) -> TransactionEnvelope {
    let signer = KeyPair::random();
    let account = Account::new(signer.address(), 41);
    let mut envelope = TransactionBuilder::new(config)
        .build(&account, vec![Operation::payment(DESTINATION, Asset::native(), "1")])
        .unwrap();
    SignatureCollector::new(config).sign(&mut envelope, &signer).unwrap();
    envelope
}

fn result_codes(transaction: &str, operations: &[&str]) -> String {
    serde_json::json!({
        "type": "https://stellar.org/horizon-errors/transaction_failed",
        "title": "Transaction Failed",
        "status": 400,
        "extras": {
            "result_codes": {
                "transaction": transaction,
                "operations": operations,
            }
        }
    })
    .to_string()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff_ms: 5,
        max_backoff_ms: 10,
        jitter_ms: 0,
    }
}

/// Test: Friendbot answering anything but 200 is a fatal FundingError
#[tokio::test]
async fn test_friendbot_failure_is_funding_error() {
    let (base, server) = stub_server(vec![
        (400, r#"{"detail":"account already funded"}"#.to_string()),
        (500, "{}".to_string()),
        (200, r#"{"hash":"00"}"#.to_string()),
    ])
    .await;
    let faucet = Faucet::new(&config(&base)).unwrap();

    let err = faucet.fund(ACCOUNT).await.unwrap_err();
    assert!(matches!(err, PaymentError::FundingError(_)), "got {:?}", err);
    assert!(err.to_string().contains("400"));

    let err = faucet.fund(ACCOUNT).await.unwrap_err();
    assert!(matches!(err, PaymentError::FundingError(_)), "got {:?}", err);
    assert!(!err.is_retryable());

    faucet.fund(ACCOUNT).await.expect("200 should fund");

    let requests = server.await.unwrap();
    assert!(requests[0].starts_with(&format!("GET /?addr={} ", ACCOUNT)), "{}", requests[0]);
}

/// Test: 404 on the account endpoint is NotFound, 200 is parsed
#[tokio::test]
async fn test_account_lookup_statuses() {
    let record = serde_json::json!({
        "id": ACCOUNT,
        "sequence": "120",
        "thresholds": { "low_threshold": 0, "med_threshold": 0, "high_threshold": 0 },
        "signers": [{ "key": ACCOUNT, "weight": 1, "type": "ed25519_public_key" }],
        "balances": [{ "asset_type": "native", "balance": "25.0000000" }]
    })
    .to_string();
    let (base, server) = stub_server(vec![
        (404, r#"{"status":404}"#.to_string()),
        (200, record),
    ])
    .await;
    let horizon = HorizonClient::new(config(&base)).unwrap();

    let err = horizon.fetch_account(ACCOUNT).await.unwrap_err();
    assert_eq!(err, PaymentError::NotFound(ACCOUNT.to_string()));

    let account = horizon.fetch_account(ACCOUNT).await.unwrap();
    assert_eq!(account.sequence, 120);
    assert_eq!(account.signer_weight(ACCOUNT), 1);
    assert_eq!(account.balance("native"), Some("25.0000000"));

    let requests = server.await.unwrap();
    assert!(requests[1].starts_with(&format!("GET /accounts/{} ", ACCOUNT)), "{}", requests[1]);
}

/// Test: 400 with result codes comes back as a rejection, classified by the submitter
#[tokio::test]
async fn test_rejections_are_classified() {
    let (base, server) = stub_server(vec![
        (400, result_codes("tx_failed", &["op_no_destination"])),
        (400, result_codes("tx_bad_seq", &[])),
        (400, result_codes("tx_failed", &["op_underfunded"])),
    ])
    .await;
    let config = config(&base);
    let horizon = Arc::new(HorizonClient::new(config.clone()).unwrap());

    let envelope = signed_envelope(&config);
    let outcome = horizon.submit_transaction(&envelope.to_base64().unwrap()).await.unwrap();
    assert_eq!(
        outcome,
        SubmissionOutcome::Rejected {
            transaction_code: "tx_failed".to_string(),
            operation_codes: vec!["op_no_destination".to_string()],
        }
    );

    let submitter = SubmissionClient::new(horizon, &config).with_retry_policy(fast_retry());
    let err = submitter.submit(signed_envelope(&config)).await.unwrap_err();
    assert!(matches!(err, PaymentError::BadSequence { .. }), "got {:?}", err);

    let err = submitter.submit(signed_envelope(&config)).await.unwrap_err();
    assert!(matches!(err, PaymentError::Underfunded { .. }), "got {:?}", err);

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 3, "Rejections must not be retried");
    assert!(requests[0].starts_with("POST /transactions "), "{}", requests[0]);
    assert!(requests[0].contains("tx="), "{}", requests[0]);
}

/// Test: Rate limiting and server errors are retryable transport failures
#[tokio::test]
async fn test_rate_limit_and_server_errors_retry() {
    let accepted = serde_json::json!({ "hash": "ab".repeat(32), "ledger": 77 }).to_string();
    let (base, server) = stub_server(vec![
        (429, "{}".to_string()),
        (503, "{}".to_string()),
        (500, "{}".to_string()),
        (200, accepted),
    ])
    .await;
    let config = config(&base);
    let horizon = Arc::new(HorizonClient::new(config.clone()).unwrap());
    let envelope = signed_envelope(&config);

    let err = horizon.submit_transaction(&envelope.to_base64().unwrap()).await.unwrap_err();
    assert!(matches!(err, PaymentError::NetworkError(_)), "got {:?}", err);
    assert!(err.is_retryable());

    // 503 and 500 are retried; the third attempt lands
    let submitter = SubmissionClient::new(horizon, &config).with_retry_policy(fast_retry());
    let result = submitter.submit(envelope).await.expect("Retries should reach the 200");
    assert_eq!(result.ledger, 77);
    assert!(result.success);

    assert_eq!(server.await.unwrap().len(), 4);
}

/// Test: The newest payment record's paging token pins a `now` cursor
#[tokio::test]
async fn test_tip_cursor_from_payment_history() {
    let page = serde_json::json!({
        "_embedded": { "records": [{ "id": "12884905986", "paging_token": "12884905986" }] }
    })
    .to_string();
    let empty = serde_json::json!({ "_embedded": { "records": [] } }).to_string();
    let (base, server) = stub_server(vec![
        (200, page),
        (200, empty),
        (404, "{}".to_string()),
    ])
    .await;
    let horizon = HorizonClient::new(config(&base)).unwrap();

    assert_eq!(
        horizon.tip_cursor(ACCOUNT).await.unwrap(),
        Cursor::At("12884905986".to_string())
    );
    assert_eq!(horizon.tip_cursor(ACCOUNT).await.unwrap(), Cursor::At("0".to_string()));
    assert!(matches!(horizon.tip_cursor(ACCOUNT).await, Err(PaymentError::NotFound(_))));

    let requests = server.await.unwrap();
    assert!(
        requests[0].starts_with(&format!("GET /accounts/{}/payments?order=desc&limit=1 ", ACCOUNT)),
        "{}",
        requests[0]
    );
}
