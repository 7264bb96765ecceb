// Lightning invoice validation utilities

use std::str::FromStr;

use bitcoin::hashes::Hash;
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription, Currency};
use serde::Serialize;

use super::LightningError;

const MSAT_PER_SAT: u64 = 1000;

/// Prefixes accepted by the deposit and withdrawal forms
const INVOICE_PREFIXES: [&str; 4] = ["lnbcrt", "lntbs", "lnbc", "lntb"];

#[derive(Debug, Clone, Serialize)]
pub struct DecodedInvoice {
    /// Amount in sats, `None` for amountless invoices
    pub amount_sats: Option<u64>,
    pub description: Option<String>,
    pub payment_hash: String,
    pub expiry_secs: u64,
    pub timestamp: u64,
    pub network: String,
}

/// Lowercase and strip whitespace and any `lightning:` URI prefix
pub fn normalize_invoice(invoice: &str) -> String {
    let trimmed = invoice.trim().to_lowercase();
    trimmed
        .strip_prefix("lightning:")
        .map(str::to_string)
        .unwrap_or(trimmed)
}

/// Fully decode a BOLT11 payment request
pub fn decode_invoice(invoice: &str) -> Result<DecodedInvoice, LightningError> {
    let normalized = normalize_invoice(invoice);
    let parsed = Bolt11Invoice::from_str(&normalized)
        .map_err(|e| LightningError::InvalidInvoice(e.to_string()))?;

    let description = match parsed.description() {
        Bolt11InvoiceDescription::Direct(d) => Some(d.to_string()),
        Bolt11InvoiceDescription::Hash(_) => None,
    };

    let network = match parsed.currency() {
        Currency::Bitcoin => "mainnet",
        Currency::BitcoinTestnet => "testnet",
        Currency::Regtest => "regtest",
        Currency::Simnet => "simnet",
        Currency::Signet => "signet",
    };

    Ok(DecodedInvoice {
        amount_sats: parsed.amount_milli_satoshis().map(|msat| msat / MSAT_PER_SAT),
        description,
        payment_hash: hex::encode(parsed.payment_hash().to_byte_array()),
        expiry_secs: parsed.expiry_time().as_secs(),
        timestamp: parsed.duration_since_epoch().as_secs(),
        network: network.to_string(),
    })
}

/// Check that a string looks like and decodes as a Lightning invoice
pub fn validate_lightning_invoice(invoice: &str) -> bool {
    let normalized = normalize_invoice(invoice);
    if !INVOICE_PREFIXES.iter().any(|p| normalized.starts_with(p)) {
        return false;
    }
    decode_invoice(&normalized).is_ok()
}

/// Amount in sats, or `None` when the invoice is amountless or undecodable
pub fn extract_invoice_amount(invoice: &str) -> Option<u64> {
    decode_invoice(invoice).ok().and_then(|d| d.amount_sats)
}

/// Amountless invoices always match; otherwise allow a 1 sat rounding difference
pub fn validate_invoice_amount(invoice: &str, expected_sats: u64) -> bool {
    match extract_invoice_amount(invoice) {
        None => true,
        Some(amount) => amount.abs_diff(expected_sats) <= 1,
    }
}
