// L402 Payment Gate
//
// Flow:
// 1. Client calls a paid endpoint without credentials
// 2. Server answers 402 with an invoice and a macaroon bound to its payment hash
// 3. Client pays the invoice and learns the preimage
// 4. Client retries with `Authorization: L402 <macaroon>:<preimage>`
// 5. Server checks the macaroon signature, caveats, preimage and settlement
//
// Macaroons are base64(JSON) signed with HMAC-SHA256 over
// identifier || location || json(caveats).

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::hashes::{sha256, Hash};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lightning::{LightningBackend, LightningError};

type HmacSha256 = Hmac<Sha256>;

/// Validity of a challenge, in milliseconds
const CHALLENGE_TTL_MS: i64 = 3_600_000;

#[derive(Debug, Error)]
pub enum L402Error {
    #[error("Malformed L402 token: {0}")]
    Malformed(String),
    #[error("Invalid macaroon signature")]
    InvalidSignature,
    #[error("L402 token expired")]
    Expired,
    #[error("Preimage does not match payment hash")]
    PreimageMismatch,
    #[error("Invoice not paid")]
    NotPaid,
    #[error("L402 token is not valid for action '{0}'")]
    WrongAction(String),
    #[error(transparent)]
    Lightning(#[from] LightningError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    pub condition: String,
    pub value: String,
}

impl Caveat {
    pub fn new(condition: &str, value: impl ToString) -> Self {
        Self {
            condition: condition.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macaroon {
    /// Payment hash of the invoice, hex
    pub identifier: String,
    pub location: String,
    /// HMAC-SHA256, hex
    pub signature: String,
    pub caveats: Vec<Caveat>,
}

impl Macaroon {
    pub fn caveat(&self, condition: &str) -> Option<&str> {
        self.caveats
            .iter()
            .find(|c| c.condition == condition)
            .map(|c| c.value.as_str())
    }

    /// base64(JSON)
    pub fn encode(&self) -> Result<String, L402Error> {
        let json = serde_json::to_vec(self).map_err(|e| L402Error::Malformed(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, L402Error> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| L402Error::Malformed(format!("macaroon is not base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| L402Error::Malformed(format!("macaroon is not valid JSON: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L402Challenge {
    /// Encoded macaroon
    pub macaroon: String,
    /// BOLT11 invoice to pay
    pub invoice: String,
    pub payment_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L402Token {
    pub macaroon: String,
    pub preimage: String,
}

#[derive(Debug, Clone)]
pub struct VerifiedL402 {
    pub payment_hash: String,
    pub macaroon: Macaroon,
}

/// Render the `WWW-Authenticate` header for a challenge
pub fn www_authenticate_value(challenge: &L402Challenge) -> String {
    format!(
        "L402 macaroon=\"{}\", invoice=\"{}\"",
        challenge.macaroon, challenge.invoice
    )
}

/// Parse `L402 <macaroon>:<preimage>`. The scheme is matched case-insensitively.
pub fn parse_authorization(header: &str) -> Option<L402Token> {
    let header = header.trim();
    let scheme = header.get(..5)?;
    if !scheme.eq_ignore_ascii_case("L402 ") {
        return None;
    }
    let (macaroon, preimage) = header[5..].trim().split_once(':')?;
    if macaroon.is_empty() || preimage.is_empty() {
        return None;
    }
    Some(L402Token {
        macaroon: macaroon.to_string(),
        preimage: preimage.to_string(),
    })
}

fn signing_payload(identifier: &str, location: &str, caveats: &[Caveat]) -> Result<Vec<u8>, L402Error> {
    let caveats_json =
        serde_json::to_vec(caveats).map_err(|e| L402Error::Malformed(e.to_string()))?;
    let mut payload = Vec::with_capacity(identifier.len() + location.len() + caveats_json.len());
    payload.extend_from_slice(identifier.as_bytes());
    payload.extend_from_slice(location.as_bytes());
    payload.extend_from_slice(&caveats_json);
    Ok(payload)
}

#[derive(Clone)]
pub struct L402Service {
    lightning: Arc<dyn LightningBackend>,
    root_key: Vec<u8>,
    location: String,
    invoice_expiry_secs: u64,
}

impl L402Service {
    pub fn new(
        lightning: Arc<dyn LightningBackend>,
        root_key: Vec<u8>,
        location: impl Into<String>,
        invoice_expiry_secs: u64,
    ) -> Self {
        Self {
            lightning,
            root_key,
            location: location.into(),
            invoice_expiry_secs,
        }
    }

    fn mac(&self) -> Result<HmacSha256, L402Error> {
        HmacSha256::new_from_slice(&self.root_key)
            .map_err(|e| L402Error::Malformed(format!("invalid root key: {}", e)))
    }

    /// Sign a macaroon for `identifier`
    pub fn mint_macaroon(&self, identifier: &str, caveats: Vec<Caveat>) -> Result<Macaroon, L402Error> {
        let mut mac = self.mac()?;
        mac.update(&signing_payload(identifier, &self.location, &caveats)?);
        Ok(Macaroon {
            identifier: identifier.to_string(),
            location: self.location.clone(),
            signature: hex::encode(mac.finalize().into_bytes()),
            caveats,
        })
    }

    /// Constant-time signature check
    pub fn verify_signature(&self, macaroon: &Macaroon) -> Result<(), L402Error> {
        let signature = hex::decode(&macaroon.signature).map_err(|_| L402Error::InvalidSignature)?;
        let mut mac = self.mac()?;
        mac.update(&signing_payload(
            &macaroon.identifier,
            &macaroon.location,
            &macaroon.caveats,
        )?);
        mac.verify_slice(&signature)
            .map_err(|_| L402Error::InvalidSignature)
    }

    /// Create an invoice and a macaroon bound to its payment hash
    pub async fn create_challenge(
        &self,
        amount_sats: u64,
        memo: &str,
        action: &str,
    ) -> Result<L402Challenge, L402Error> {
        let invoice = self
            .lightning
            .create_invoice(amount_sats, memo, self.invoice_expiry_secs)
            .await?;

        let expires = Utc::now().timestamp_millis() + CHALLENGE_TTL_MS;
        let caveats = vec![
            Caveat::new("action", action),
            Caveat::new("amount", amount_sats),
            Caveat::new("expires", expires),
        ];
        let macaroon = self.mint_macaroon(&invoice.r_hash, caveats)?;

        debug!(payment_hash = %invoice.r_hash, amount_sats, action, "L402 challenge issued");

        Ok(L402Challenge {
            macaroon: macaroon.encode()?,
            invoice: invoice.payment_request,
            payment_hash: invoice.r_hash,
        })
    }

    /// Verify a presented token. When `action` is given the macaroon must
    /// carry a matching `action` caveat.
    pub async fn verify_token(
        &self,
        token: &L402Token,
        action: Option<&str>,
    ) -> Result<VerifiedL402, L402Error> {
        let macaroon = Macaroon::decode(&token.macaroon)?;
        self.verify_signature(&macaroon)?;

        if let Some(expires) = macaroon.caveat("expires") {
            let expires: i64 = expires
                .parse()
                .map_err(|_| L402Error::Malformed("expires caveat is not a number".into()))?;
            if expires < Utc::now().timestamp_millis() {
                return Err(L402Error::Expired);
            }
        }

        if let Some(required) = action {
            if macaroon.caveat("action") != Some(required) {
                return Err(L402Error::WrongAction(required.to_string()));
            }
        }

        let preimage = hex::decode(token.preimage.trim())
            .map_err(|_| L402Error::Malformed("preimage is not hex".into()))?;
        let preimage_hash = hex::encode(sha256::Hash::hash(&preimage).to_byte_array());
        if !preimage_hash.eq_ignore_ascii_case(&macaroon.identifier) {
            warn!(payment_hash = %macaroon.identifier, "L402 preimage mismatch");
            return Err(L402Error::PreimageMismatch);
        }

        let status = self.lightning.check_invoice(&macaroon.identifier).await?;
        if !status.settled {
            return Err(L402Error::NotPaid);
        }

        info!(payment_hash = %macaroon.identifier, "L402 token verified");

        Ok(VerifiedL402 {
            payment_hash: macaroon.identifier.clone(),
            macaroon,
        })
    }
}
