// LND REST Client
//
// Talks to an LND (or Voltage-hosted LND) node over its REST gateway.
// int64 fields come back as JSON strings and bytes fields as base64.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tracing::{debug, error, warn};

use super::invoice::extract_invoice_amount;
use super::{
    CreatedInvoice, InvoiceState, InvoiceStatus, LightningBackend, LightningError, NodeBalance,
    NodeInfo, PaymentResult,
};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const ERROR_BODY_LIMIT: usize = 200;

/// LND REST client
#[derive(Debug, Clone)]
pub struct LndRestClient {
    client: Client,
    base_url: String,
    macaroon: String,
}

#[derive(Debug, Serialize)]
struct AddInvoiceRequest<'a> {
    value: String,
    memo: &'a str,
    expiry: String,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    add_index: Option<u64>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct LookupInvoiceResponse {
    #[serde(default)]
    settled: bool,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    amt_paid_sat: u64,
    state: InvoiceState,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    creation_date: i64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    settle_date: i64,
    #[serde(default)]
    r_preimage: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendPaymentRequest<'a> {
    payment_request: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amt: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: Option<String>,
    #[serde(default)]
    payment_preimage: Option<String>,
    #[serde(default)]
    payment_hash: Option<String>,
    #[serde(default)]
    payment_route: Option<PaymentRoute>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct PaymentRoute {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    total_fees: u64,
}

#[derive(Debug, Deserialize)]
struct GetInfoResponse {
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    synced_to_chain: bool,
    #[serde(default)]
    block_height: u32,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct ChannelBalanceResponse {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    balance: i64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pending_open_balance: i64,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct WalletBalanceResponse {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    confirmed_balance: i64,
}

/// Convert an LND base64 bytes field to lowercase hex
fn base64_to_hex(value: &str) -> Result<String, LightningError> {
    BASE64
        .decode(value)
        .map(hex::encode)
        .map_err(|e| LightningError::InvalidResponse(format!("bad base64 field: {}", e)))
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

impl LndRestClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `rest_url` - Node REST endpoint, already normalised (scheme, no trailing slash)
    /// * `macaroon_hex` - Admin macaroon, hex encoded
    /// * `accept_invalid_certs` - Allow self-signed node certificates
    pub fn new(
        rest_url: &str,
        macaroon_hex: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self, LightningError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: rest_url.trim_end_matches('/').to_string(),
            macaroon: macaroon_hex.to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Make an authenticated request and decode the JSON reply
    async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, LightningError> {
        let url = self.url(endpoint);
        debug!(method = %method, url = %url, "LND request");

        let mut request = self
            .client
            .request(method, &url)
            .header(MACAROON_HEADER, &self.macaroon)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let text = response.text().await?;

        if !is_json {
            error!(status = %status, "Non-JSON response from LND");
            return Err(LightningError::InvalidResponse(format!(
                "non-JSON reply (HTTP {}): {}",
                status.as_u16(),
                truncate(&text)
            )));
        }

        if !status.is_success() {
            error!(status = %status, body = %truncate(&text), "LND API error");
            if status.as_u16() == 404 || text.contains("unable to locate invoice") {
                return Err(LightningError::UnknownInvoice);
            }
            return Err(LightningError::Api {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        serde_json::from_str(&text).map_err(|e| LightningError::InvalidResponse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, LightningError> {
        self.request::<(), T>(Method::GET, endpoint, None).await
    }
}

#[async_trait]
impl LightningBackend for LndRestClient {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice, LightningError> {
        let body = AddInvoiceRequest {
            value: amount_sats.to_string(),
            memo,
            expiry: expiry_secs.to_string(),
        };
        let response: AddInvoiceResponse = self
            .request(Method::POST, "/v1/invoices", Some(&body))
            .await?;

        Ok(CreatedInvoice {
            payment_request: response.payment_request,
            r_hash: base64_to_hex(&response.r_hash)?,
            add_index: response.add_index,
        })
    }

    async fn check_invoice(&self, r_hash: &str) -> Result<InvoiceStatus, LightningError> {
        if hex::decode(r_hash).map(|b| b.len()) != Ok(32) {
            return Err(LightningError::InvalidInvoice(format!(
                "payment hash must be 32 bytes of hex, got '{}'",
                r_hash
            )));
        }

        let response: LookupInvoiceResponse =
            self.get(&format!("/v1/invoice/{}", r_hash)).await?;

        let settled = response.settled || response.state == InvoiceState::Settled;
        let preimage = match (&response.r_preimage, settled) {
            (Some(p), true) if !p.is_empty() => Some(base64_to_hex(p)?),
            _ => None,
        };

        Ok(InvoiceStatus {
            settled,
            amount_paid_sats: response.amt_paid_sat,
            state: response.state,
            creation_date: response.creation_date,
            settle_date: response.settle_date,
            preimage,
        })
    }

    async fn pay_invoice(
        &self,
        payment_request: &str,
        amount_sats: Option<u64>,
    ) -> Result<PaymentResult, LightningError> {
        let invoice_amount = extract_invoice_amount(payment_request);
        let amt = match (invoice_amount, amount_sats) {
            (None, Some(a)) | (Some(0), Some(a)) => Some(a.to_string()),
            _ => None,
        };
        debug!(?invoice_amount, ?amount_sats, "Paying invoice");

        let body = SendPaymentRequest {
            payment_request,
            amt,
        };
        // A gateway error may arrive while the payment is still in flight
        let response: SendPaymentResponse = self
            .request(Method::POST, "/v1/channels/transactions", Some(&body))
            .await
            .map_err(|e| match e {
                LightningError::Api { status, body } if status >= 500 => {
                    LightningError::InvalidResponse(format!(
                        "payment outcome unknown (HTTP {}): {}",
                        status, body
                    ))
                }
                other => other,
            })?;

        if let Some(payment_error) = response.payment_error.filter(|e| !e.is_empty()) {
            warn!(error = %payment_error, "Payment rejected by node");
            return Err(LightningError::PaymentFailed(payment_error));
        }

        let payment_hash = response
            .payment_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| LightningError::InvalidResponse("missing payment_hash".into()))
            .and_then(base64_to_hex)?;
        let preimage = response
            .payment_preimage
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(base64_to_hex)
            .transpose()?;

        Ok(PaymentResult {
            payment_hash,
            preimage,
            fee_sats: response.payment_route.map(|r| r.total_fees).unwrap_or(0),
        })
    }

    async fn node_info(&self) -> Result<NodeInfo, LightningError> {
        let info: GetInfoResponse = self.get("/v1/getinfo").await?;

        Ok(NodeInfo {
            pubkey: info.identity_pubkey,
            alias: info.alias,
            version: info.version,
            synced_to_chain: info.synced_to_chain,
            block_height: info.block_height,
        })
    }

    async fn node_balance(&self) -> Result<NodeBalance, LightningError> {
        let channels: ChannelBalanceResponse = self.get("/v1/balance/channels").await?;

        let onchain = match self.get::<WalletBalanceResponse>("/v1/balance/blockchain").await {
            Ok(wallet) => wallet.confirmed_balance,
            Err(e) => {
                warn!("Failed to fetch on-chain balance, counting it as 0: {}", e);
                0
            }
        };

        Ok(NodeBalance::new(
            channels.balance,
            channels.pending_open_balance,
            onchain,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_encoded_int64_fields() {
        let json = r#"{
            "settled": true,
            "amt_paid_sat": "1500",
            "state": "SETTLED",
            "creation_date": "1700000000",
            "settle_date": "1700000100",
            "r_preimage": "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE="
        }"#;
        let parsed: LookupInvoiceResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.amt_paid_sat, 1500);
        assert_eq!(parsed.state, InvoiceState::Settled);
        assert_eq!(parsed.settle_date, 1_700_000_100);
        assert_eq!(
            base64_to_hex(parsed.r_preimage.as_deref().unwrap()).unwrap(),
            "01".repeat(32)
        );
    }

    #[test]
    fn test_balance_fields_accept_numbers_and_defaults() {
        let parsed: ChannelBalanceResponse =
            serde_json::from_str(r#"{"balance": 2500}"#).unwrap();
        assert_eq!(parsed.balance, 2500);
        assert_eq!(parsed.pending_open_balance, 0);
    }

    #[test]
    fn test_send_payment_error_is_parsed() {
        let parsed: SendPaymentResponse =
            serde_json::from_str(r#"{"payment_error": "no_route", "payment_hash": ""}"#).unwrap();
        assert_eq!(parsed.payment_error.as_deref(), Some("no_route"));
    }

    #[test]
    fn test_amt_only_sent_for_amountless() {
        let body = SendPaymentRequest {
            payment_request: "lnbc1...",
            amt: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"payment_request": "lnbc1..."})
        );
    }

    #[test]
    fn test_url_joining() {
        let client = LndRestClient::new("https://node.example:8080/", "0201", false).unwrap();
        assert_eq!(client.url("/v1/getinfo"), "https://node.example:8080/v1/getinfo");
        assert_eq!(client.url("v1/getinfo"), "https://node.example:8080/v1/getinfo");
    }
}
