//! LND REST client and withdrawal behaviour against a mock node

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mockito::{Server, ServerGuard};
use serde_json::json;
use uuid::Uuid;

use ganamos_ledger::lightning::fake::build_signed_invoice;
use ganamos_ledger::lightning::{InvoiceState, LightningBackend, LightningError, LndRestClient};
use ganamos_ledger::store::{
    LedgerStore, MemoryStore, Profile, TransactionFilter, TransactionStatus,
};
use ganamos_ledger::{LedgerError, WalletService};

const MACAROON: &str = "0201036c6e64";

async fn node() -> (ServerGuard, LndRestClient) {
    let server = Server::new_async().await;
    let client = LndRestClient::new(&server.url(), MACAROON, false).expect("client should build");
    (server, client)
}

#[tokio::test]
async fn test_check_invoice_settled() {
    let (mut server, client) = node().await;
    let r_hash = "11".repeat(32);

    let mock = server
        .mock("GET", format!("/v1/invoice/{}", r_hash).as_str())
        .match_header("grpc-metadata-macaroon", MACAROON)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "settled": true,
                "amt_paid_sat": "2500",
                "state": "SETTLED",
                "creation_date": "1700000000",
                "settle_date": "1700000060",
                "r_preimage": BASE64.encode([2u8; 32])
            })
            .to_string(),
        )
        .create_async()
        .await;

    let status = client.check_invoice(&r_hash).await.unwrap();
    assert!(status.settled);
    assert_eq!(status.state, InvoiceState::Settled);
    assert_eq!(status.amount_paid_sats, 2500);
    assert_eq!(status.preimage, Some("02".repeat(32)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_check_invoice_not_found() {
    let (mut server, client) = node().await;
    let known_missing = "22".repeat(32);
    let proxied = "33".repeat(32);

    server
        .mock("GET", format!("/v1/invoice/{}", known_missing).as_str())
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":5,"message":"unable to locate invoice"}"#)
        .create_async()
        .await;
    server
        .mock("GET", format!("/v1/invoice/{}", proxied).as_str())
        .with_status(404)
        .with_header("content-type", "text/html")
        .with_body("<html>Not Found</html>")
        .create_async()
        .await;

    assert!(matches!(
        client.check_invoice(&known_missing).await,
        Err(LightningError::UnknownInvoice)
    ));
    assert!(matches!(
        client.check_invoice(&proxied).await,
        Err(LightningError::InvalidResponse(_))
    ));
    // Malformed hashes never reach the node
    assert!(matches!(
        client.check_invoice("not-hex").await,
        Err(LightningError::InvalidInvoice(_))
    ));
}

#[tokio::test]
async fn test_pay_invoice_success_and_rejection() {
    let (mut server, client) = node().await;
    let (invoice, hash) = build_signed_invoice(Some(700), "payout", &[5u8; 32], 600).unwrap();
    let hash_bytes = hex::decode(&hash).unwrap();

    let mock = server
        .mock("POST", "/v1/channels/transactions")
        .match_body(mockito::Matcher::Json(json!({ "payment_request": invoice })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "payment_error": "",
                "payment_hash": BASE64.encode(&hash_bytes),
                "payment_preimage": BASE64.encode([5u8; 32]),
                "payment_route": { "total_fees": "3" }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let paid = client.pay_invoice(&invoice, None).await.unwrap();
    assert_eq!(paid.payment_hash, hash);
    assert_eq!(paid.fee_sats, 3);
    mock.assert_async().await;

    let (mut server, client) = node().await;
    server
        .mock("POST", "/v1/channels/transactions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"payment_error": "no_route"}"#)
        .create_async()
        .await;
    assert!(matches!(
        client.pay_invoice(&invoice, None).await,
        Err(LightningError::PaymentFailed(reason)) if reason == "no_route"
    ));
}

#[tokio::test]
async fn test_pay_invoice_gateway_errors_are_unknown_outcomes() {
    let (invoice, _) = build_signed_invoice(Some(700), "payout", &[6u8; 32], 600).unwrap();

    for (status, content_type, body) in [
        (504, "text/html", "<html>Gateway Timeout</html>"),
        (502, "application/json", r#"{"error":"bad gateway"}"#),
        (200, "text/plain", "ok"),
    ] {
        let (mut server, client) = node().await;
        server
            .mock("POST", "/v1/channels/transactions")
            .with_status(status)
            .with_header("content-type", content_type)
            .with_body(body)
            .create_async()
            .await;

        assert!(matches!(
            client.pay_invoice(&invoice, None).await,
            Err(LightningError::InvalidResponse(_))
        ));
    }

    // A JSON 4xx is a definite refusal
    let (mut server, client) = node().await;
    server
        .mock("POST", "/v1/channels/transactions")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":2,"message":"invoice expired"}"#)
        .create_async()
        .await;
    assert!(matches!(
        client.pay_invoice(&invoice, None).await,
        Err(LightningError::Api { status: 400, .. })
    ));
}

#[tokio::test]
async fn test_amountless_invoice_sends_amount() {
    let (mut server, client) = node().await;
    let (invoice, hash) = build_signed_invoice(None, "tips", &[7u8; 32], 600).unwrap();

    let mock = server
        .mock("POST", "/v1/channels/transactions")
        .match_body(mockito::Matcher::Json(json!({
            "payment_request": invoice,
            "amt": "250"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "payment_hash": BASE64.encode(hex::decode(&hash).unwrap()) }).to_string())
        .create_async()
        .await;

    client.pay_invoice(&invoice, Some(250)).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_node_balance_tolerates_missing_onchain_wallet() {
    let (mut server, client) = node().await;

    server
        .mock("GET", "/v1/balance/channels")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"balance": "80000", "pending_open_balance": "5000"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v1/balance/blockchain")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"wallet locked"}"#)
        .create_async()
        .await;

    let balance = client.node_balance().await.unwrap();
    assert_eq!(balance.channel_balance, 80_000);
    assert_eq!(balance.onchain_balance, 0);
    assert_eq!(balance.total_balance, 85_000);
}

#[tokio::test]
async fn test_withdrawal_keeps_debit_when_node_times_out() {
    let (mut server, client) = node().await;
    let store = Arc::new(MemoryStore::new());
    let wallet = WalletService::new(store.clone(), Arc::new(client), 3600);
    let user = Uuid::new_v4();
    store.upsert_profile(&Profile::new(user, "alice", 1_000)).await.unwrap();
    let (invoice, _) = build_signed_invoice(Some(600), "payout", &[8u8; 32], 600).unwrap();

    server
        .mock("POST", "/v1/channels/transactions")
        .with_status(504)
        .with_header("content-type", "text/html")
        .with_body("<html>504 Gateway Time-out</html>")
        .create_async()
        .await;

    let err = wallet.process_withdrawal(user, &invoice, 600).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Lightning(LightningError::InvalidResponse(_))
    ));
    assert_eq!(wallet.get_balance(user).await.unwrap(), 400);

    let rows = store
        .list_transactions(&TransactionFilter::for_user(user))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_withdrawal_refunds_when_node_refuses() {
    let (mut server, client) = node().await;
    let store = Arc::new(MemoryStore::new());
    let wallet = WalletService::new(store.clone(), Arc::new(client), 3600);
    let user = Uuid::new_v4();
    store.upsert_profile(&Profile::new(user, "alice", 1_000)).await.unwrap();
    let (invoice, _) = build_signed_invoice(Some(600), "payout", &[9u8; 32], 600).unwrap();

    server
        .mock("POST", "/v1/channels/transactions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"payment_error": "insufficient local balance"}"#)
        .create_async()
        .await;

    assert!(wallet.process_withdrawal(user, &invoice, 600).await.is_err());
    assert_eq!(wallet.get_balance(user).await.unwrap(), 1_000);

    let rows = store
        .list_transactions(&TransactionFilter::for_user(user))
        .await
        .unwrap();
    assert_eq!(rows[0].status, TransactionStatus::Failed);
}
