// Ledger errors shared by the wallet, posts and donation services

use thiserror::Error;

use crate::l402::L402Error;
use crate::lightning::LightningError;
use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Insufficient balance: {available} sats available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error("Payment required: {0}")]
    PaymentRequired(String),
    #[error(transparent)]
    Lightning(#[from] LightningError),
    #[error("Database error: {0}")]
    Store(StoreError),
    #[error(transparent)]
    L402(#[from] L402Error),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance {
                available,
                requested,
            } => LedgerError::InsufficientBalance {
                available,
                requested,
            },
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Conflict(what) => LedgerError::Conflict(what),
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        LedgerError::InvalidRequest(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_ledger_variants() {
        let err: LedgerError = StoreError::InsufficientBalance {
            available: 5,
            requested: 10,
        }
        .into();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 5,
                requested: 10
            }
        ));

        let err: LedgerError = StoreError::NotFound("profile".into()).into();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let err: LedgerError = StoreError::Backend("timeout".into()).into();
        assert!(matches!(err, LedgerError::Store(_)));
    }
}
