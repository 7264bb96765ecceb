// HTTP Interface for Ganamos
//
// REST endpoints for the wallet, funded posts, donations, the price quote
// and the operator audit tooling, all backed by a shared AppState.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::auth::{AdminAccess, AuthUser, ADMIN_KEY_HEADER};
use crate::donations::DonationRequest;
use crate::error::LedgerError;
use crate::l402::L402Error;
use crate::lightning::LightningError;
use crate::posts::{pricing, PostOutcome, PostRequest};
use crate::reconcile::{
    activity_summary, audit_all_balances, liquidity_summary, scan_for_duplicates,
    DEFAULT_ACTIVITY_WINDOW_HOURS,
};

/// JSON error answer: `{"success": false, "error": ..., "details": ...}`
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl<E: Into<LedgerError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            LedgerError::InvalidRequest(_) | LedgerError::InsufficientBalance { .. } => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            LedgerError::Lightning(e) => lightning_status(e),
            LedgerError::L402(L402Error::Lightning(e)) => lightning_status(e),
            LedgerError::L402(_) => StatusCode::UNAUTHORIZED,
            LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn lightning_status(err: &LightningError) -> StatusCode {
    match err {
        LightningError::UnknownInvoice => StatusCode::NOT_FOUND,
        LightningError::InvalidInvoice(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }

        let details = match &self.0 {
            LedgerError::InsufficientBalance {
                available,
                requested,
            } => serde_json::json!({ "available": available, "requested": requested }),
            _ => serde_json::Value::Null,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Successful answer with `success: true` merged into the payload
#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

/// Create the router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(ADMIN_KEY_HEADER),
        ])
        .expose_headers([WWW_AUTHENTICATE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/wallet/deposit", post(create_deposit))
        .route("/api/wallet/deposit/:r_hash", get(check_deposit))
        .route("/api/wallet/withdraw", post(withdraw))
        .route("/api/wallet/transfer", post(transfer))
        .route("/api/user/balance", get(user_balance))
        .route("/api/invoice-status", get(invoice_status))
        .route("/api/bitcoin-price", get(bitcoin_price))
        .route("/api/posts", get(posts_pricing).post(create_post))
        .route("/api/donations", post(create_donation))
        .route("/api/donations/:payment_hash", get(donation_status))
        .route("/api/admin/node-balance", get(admin_node_balance))
        .route("/api/admin/node-info", get(admin_node_info))
        .route("/api/admin/audit", get(admin_audit))
        .route("/api/admin/duplicates", get(admin_duplicates))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP interface
pub async fn run_http_interface(bind_addr: &str, state: AppState) -> Result<()> {
    info!("🌐 Starting HTTP interface...");

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("✅ HTTP interface ready - listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ganamos-ledger",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Amounts arrive as numbers or numeric strings
#[serde_as]
#[derive(Debug, Deserialize)]
struct DepositHttpRequest {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    amount: i64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawHttpRequest {
    payment_request: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    amount: i64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferHttpRequest {
    to_user_id: Uuid,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    amount: i64,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceStatusQuery {
    r_hash: Option<String>,
}

async fn create_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<DepositHttpRequest>,
) -> ApiResult<impl IntoResponse> {
    info!(user_id = %user.user_id, amount = request.amount, "📨 Deposit invoice requested");
    let invoice = state
        .wallet
        .create_deposit_invoice(user.user_id, request.amount)
        .await?;
    Ok(success(invoice))
}

async fn check_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(r_hash): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state
        .wallet
        .check_deposit_status(user.user_id, &r_hash)
        .await?;
    Ok(success(status))
}

async fn withdraw(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<WithdrawHttpRequest>,
) -> ApiResult<impl IntoResponse> {
    info!(user_id = %user.user_id, amount = request.amount, "📨 Withdrawal requested");
    let result = state
        .wallet
        .process_withdrawal(user.user_id, &request.payment_request, request.amount)
        .await?;
    Ok(success(result))
}

async fn transfer(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<TransferHttpRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .wallet
        .transfer_sats(
            user.user_id,
            request.to_user_id,
            request.amount,
            request.memo.as_deref(),
        )
        .await?;
    Ok(success(result))
}

async fn user_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let balance = state.wallet.get_balance(user.user_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "balance": balance })))
}

async fn invoice_status(
    State(state): State<AppState>,
    Query(query): Query<InvoiceStatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let r_hash = query
        .r_hash
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| LedgerError::invalid("r_hash parameter is required"))?;

    let status = state.lightning.check_invoice(r_hash.trim()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "settled": status.settled,
        "r_hash": r_hash,
        "preimage": status.preimage,
    })))
}

async fn bitcoin_price(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.price.btc_usd().await)
}

async fn posts_pricing() -> Json<serde_json::Value> {
    Json(pricing())
}

/// Create a funded post. Without credentials this answers 402 with an L402
/// challenge; the body is optional in that case.
async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<PostRequest>>,
) -> ApiResult<Response> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());
    let request = body.map(|Json(r)| r).unwrap_or_default();

    match state.posts.handle(authorization, request).await? {
        PostOutcome::PaymentRequired(challenge) => {
            let www_authenticate = HeaderValue::from_str(&challenge.www_authenticate)
                .map_err(|e| LedgerError::invalid(format!("Invalid challenge header: {}", e)))?;
            let mut response =
                (StatusCode::PAYMENT_REQUIRED, Json(challenge.body)).into_response();
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, www_authenticate);
            Ok(response)
        }
        PostOutcome::Created(created) => Ok((StatusCode::CREATED, Json(created)).into_response()),
    }
}

async fn create_donation(
    State(state): State<AppState>,
    Json(request): Json<DonationRequest>,
) -> ApiResult<impl IntoResponse> {
    let invoice = state.donations.create_donation_invoice(request).await?;
    Ok(success(invoice))
}

async fn donation_status(
    State(state): State<AppState>,
    Path(payment_hash): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let donation = state.donations.check_donation_status(&payment_hash).await?;
    Ok(success(donation))
}

async fn admin_node_balance(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> ApiResult<impl IntoResponse> {
    let balance = state.lightning.node_balance().await?;
    Ok(Json(serde_json::json!({ "success": true, "balance": balance })))
}

async fn admin_node_info(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> ApiResult<impl IntoResponse> {
    let node = state.lightning.node_info().await?;
    Ok(Json(serde_json::json!({ "success": true, "node": node })))
}

async fn admin_audit(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> ApiResult<impl IntoResponse> {
    let audit = audit_all_balances(state.store.as_ref()).await?;
    let liquidity = liquidity_summary(state.store.as_ref(), state.lightning.as_ref()).await?;
    let since = chrono::Utc::now() - chrono::Duration::hours(DEFAULT_ACTIVITY_WINDOW_HOURS);
    let activity = activity_summary(state.store.as_ref(), since).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "audit": audit,
        "liquidity": liquidity,
        "activity": activity,
    })))
}

async fn admin_duplicates(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> ApiResult<impl IntoResponse> {
    let report = scan_for_duplicates(state.store.as_ref()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "clean": report.is_clean(),
        "report": report,
    })))
}
