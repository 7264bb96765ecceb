//! PostgREST behaviour of the Supabase ledger store, against a mock server

use chrono::Utc;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use uuid::Uuid;

use ganamos_ledger::config::SupabaseConfig;
use ganamos_ledger::store::{
    LedgerStore, ProfileStatus, StoreError, SupabaseStore, Transaction, TransactionStatus,
    TransactionType,
};

const SERVICE_KEY: &str = "service-role-key";

async fn store() -> (ServerGuard, SupabaseStore) {
    let server = Server::new_async().await;
    let store = SupabaseStore::new(&SupabaseConfig {
        url: server.url(),
        service_role_key: SERVICE_KEY.to_string(),
    })
    .expect("store should build");
    (server, store)
}

fn profile_row(id: Uuid, balance: i64) -> serde_json::Value {
    json!({
        "id": id,
        "email": "user@example.com",
        "name": "User",
        "balance": balance,
        "status": null,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

// === adjust_balance ===

#[tokio::test]
async fn test_adjust_balance_uses_rpc() {
    let (mut server, store) = store().await;
    let user = Uuid::new_v4();

    let rpc = server
        .mock("POST", "/rest/v1/rpc/adjust_balance")
        .match_header("apikey", SERVICE_KEY)
        .match_header("authorization", format!("Bearer {}", SERVICE_KEY).as_str())
        .match_body(Matcher::Json(json!({
            "p_user_id": user,
            "p_delta": -100,
            "p_allow_negative": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("150")
        .create_async()
        .await;

    assert_eq!(store.adjust_balance(user, -100, false).await.unwrap(), 150);
    rpc.assert_async().await;
}

#[tokio::test]
async fn test_adjust_balance_rpc_reports_insufficient_balance() {
    let (mut server, store) = store().await;
    let user = Uuid::new_v4();

    server
        .mock("POST", "/rest/v1/rpc/adjust_balance")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":"P0001","message":"insufficient_balance"}"#)
        .create_async()
        .await;
    server
        .mock("GET", format!("/rest/v1/profiles?id=eq.{}&select=*", user).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([profile_row(user, 40)]).to_string())
        .create_async()
        .await;

    let err = store.adjust_balance(user, -100, false).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientBalance {
            available: 40,
            requested: 100
        }
    ));
}

#[tokio::test]
async fn test_missing_rpc_falls_back_to_optimistic_update() {
    for (status, body) in [
        (404, ""),
        (400, r#"{"code":"PGRST202","message":"Could not find the function"}"#),
    ] {
        let (mut server, store) = store().await;
        let user = Uuid::new_v4();

        server
            .mock("POST", "/rest/v1/rpc/adjust_balance")
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;
        let read = server
            .mock("GET", format!("/rest/v1/profiles?id=eq.{}&select=balance", user).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"balance": 100}]"#)
            .create_async()
            .await;
        let write = server
            .mock("PATCH", format!("/rest/v1/profiles?id=eq.{}&balance=eq.100", user).as_str())
            .match_header("prefer", "return=representation")
            .match_body(Matcher::PartialJson(json!({ "balance": 70 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"balance": 70}]"#)
            .create_async()
            .await;

        assert_eq!(store.adjust_balance(user, -30, false).await.unwrap(), 70);
        read.assert_async().await;
        write.assert_async().await;
    }
}

#[tokio::test]
async fn test_optimistic_update_refuses_overdraft_without_writing() {
    let (mut server, store) = store().await;
    let user = Uuid::new_v4();

    server
        .mock("POST", "/rest/v1/rpc/adjust_balance")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", format!("/rest/v1/profiles?id=eq.{}&select=balance", user).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"balance": 20}]"#)
        .create_async()
        .await;
    let write = server
        .mock("PATCH", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = store.adjust_balance(user, -50, false).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientBalance {
            available: 20,
            requested: 50
        }
    ));
    write.assert_async().await;
}

#[tokio::test]
async fn test_optimistic_update_gives_up_after_lost_races() {
    let (mut server, store) = store().await;
    let user = Uuid::new_v4();

    server
        .mock("POST", "/rest/v1/rpc/adjust_balance")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", format!("/rest/v1/profiles?id=eq.{}&select=balance", user).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"balance": 500}]"#)
        .expect(5)
        .create_async()
        .await;
    // Every write sees a balance that moved underneath it
    let write = server
        .mock("PATCH", format!("/rest/v1/profiles?id=eq.{}&balance=eq.500", user).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(5)
        .create_async()
        .await;

    let err = store.adjust_balance(user, 10, true).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    write.assert_async().await;
}

#[tokio::test]
async fn test_rpc_server_error_is_not_retried() {
    let (mut server, store) = store().await;

    server
        .mock("POST", "/rest/v1/rpc/adjust_balance")
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;
    let fallback = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let err = store.adjust_balance(Uuid::new_v4(), 10, true).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(message) if message.contains("503")));
    fallback.assert_async().await;
}

// === transition_transaction ===

#[tokio::test]
async fn test_transition_compare_and_set() {
    let (mut server, store) = store().await;
    let tx = Transaction::new(
        Uuid::new_v4(),
        TransactionType::Deposit,
        1_000,
        TransactionStatus::Completed,
        "Deposit 1000 sats to Ganamos!",
    );
    let row = serde_json::to_value(&tx).unwrap();

    let won = server
        .mock("PATCH", format!("/rest/v1/transactions?id=eq.{}&status=eq.pending", tx.id).as_str())
        .match_body(Matcher::PartialJson(json!({ "status": "completed" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([row]).to_string())
        .create_async()
        .await;

    assert!(store
        .transition_transaction(tx.id, TransactionStatus::Pending, TransactionStatus::Completed, None)
        .await
        .unwrap());
    won.assert_async().await;
}

#[tokio::test]
async fn test_transition_lost_and_missing_rows() {
    let (mut server, store) = store().await;
    let tx = Transaction::new(
        Uuid::new_v4(),
        TransactionType::Deposit,
        1_000,
        TransactionStatus::Completed,
        "Deposit 1000 sats to Ganamos!",
    );
    let missing = Uuid::new_v4();

    for id in [tx.id, missing] {
        server
            .mock("PATCH", format!("/rest/v1/transactions?id=eq.{}&status=eq.pending", id).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
    }
    server
        .mock("GET", format!("/rest/v1/transactions?id=eq.{}&select=*", tx.id).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([serde_json::to_value(&tx).unwrap()]).to_string())
        .create_async()
        .await;
    server
        .mock("GET", format!("/rest/v1/transactions?id=eq.{}&select=*", missing).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    // Someone else already completed it
    assert!(!store
        .transition_transaction(tx.id, TransactionStatus::Pending, TransactionStatus::Completed, None)
        .await
        .unwrap());
    assert!(matches!(
        store
            .transition_transaction(missing, TransactionStatus::Pending, TransactionStatus::Failed, None)
            .await,
        Err(StoreError::NotFound(_))
    ));
}

// === donations ===

fn donation_row(pool_id: Uuid, payment_hash: &str, status: &str) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "donation_pool_id": pool_id,
        "amount": 250,
        "payment_request": "lnbcrt2500n1donation",
        "payment_hash": payment_hash,
        "status": status,
        "donor_name": null,
        "message": null,
        "created_at": Utc::now(),
        "completed_at": null
    })
}

#[tokio::test]
async fn test_complete_donation_adds_to_pool_total() {
    let (mut server, store) = store().await;
    let pool_id = Uuid::new_v4();
    let hash = "ab".repeat(32);

    server
        .mock(
            "PATCH",
            format!("/rest/v1/donations?payment_hash=eq.{}&status=eq.pending", hash).as_str(),
        )
        .match_body(Matcher::PartialJson(json!({ "status": "completed" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([donation_row(pool_id, &hash, "completed")]).to_string())
        .create_async()
        .await;
    server
        .mock(
            "GET",
            format!("/rest/v1/donation_pools?id=eq.{}&select=total_donated", pool_id).as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"total_donated": 1000}]"#)
        .create_async()
        .await;
    let total = server
        .mock(
            "PATCH",
            format!("/rest/v1/donation_pools?id=eq.{}&total_donated=eq.1000", pool_id).as_str(),
        )
        .match_body(Matcher::Json(json!({ "total_donated": 1250 })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"total_donated": 1250}]"#)
        .create_async()
        .await;

    assert!(store.complete_donation(&hash).await.unwrap());
    total.assert_async().await;
}

#[tokio::test]
async fn test_completed_donation_is_not_counted_twice() {
    let (mut server, store) = store().await;
    let pool_id = Uuid::new_v4();
    let hash = "cd".repeat(32);

    server
        .mock(
            "PATCH",
            format!("/rest/v1/donations?payment_hash=eq.{}&status=eq.pending", hash).as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;
    server
        .mock(
            "GET",
            format!("/rest/v1/donations?payment_hash=eq.{}&select=*&limit=1", hash).as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([donation_row(pool_id, &hash, "completed")]).to_string())
        .create_async()
        .await;
    let pool = server
        .mock("GET", Matcher::Regex("^/rest/v1/donation_pools".to_string()))
        .expect(0)
        .create_async()
        .await;

    assert!(!store.complete_donation(&hash).await.unwrap());
    pool.assert_async().await;
}

// === profiles ===

#[tokio::test]
async fn test_profiles_with_null_status_load() {
    let (mut server, store) = store().await;
    let user = Uuid::new_v4();

    server
        .mock(
            "GET",
            "/rest/v1/profiles?select=*&order=created_at.asc&or=(status.is.null,status.neq.deleted)&limit=1000&offset=0",
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([profile_row(user, 300)]).to_string())
        .create_async()
        .await;

    let profiles = store.list_profiles(false).await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].status, ProfileStatus::Active);
    assert_eq!(profiles[0].balance, 300);
}

#[tokio::test]
async fn test_duplicate_insert_is_a_conflict() {
    let (mut server, store) = store().await;
    let tx = Transaction::new(
        Uuid::new_v4(),
        TransactionType::Internal,
        10,
        TransactionStatus::Completed,
        "Transfer",
    );

    server
        .mock("POST", "/rest/v1/transactions")
        .match_header("prefer", "return=minimal")
        .with_status(409)
        .with_body(r#"{"code":"23505"}"#)
        .create_async()
        .await;

    assert!(matches!(
        store.insert_transaction(&tx).await,
        Err(StoreError::Conflict(_))
    ));
}
