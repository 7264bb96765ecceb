// Ganamos Ledger Library
//
// Custodial Lightning ledger behind the Ganamos! app: LND client, balance
// store, wallet flows, reconciliation, L402-funded posts and donations.

pub mod auth;
pub mod config;
pub mod donations;
pub mod error;
pub mod interfaces;
pub mod l402;
pub mod lightning;
pub mod posts;
pub mod price;
pub mod reconcile;
pub mod store;
pub mod wallet;

pub use config::ServiceConfig;
pub use error::{LedgerError, LedgerResult};
pub use interfaces::AppState;
pub use wallet::WalletService;
