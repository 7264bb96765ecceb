// CLI commands module

pub mod activity;
pub mod audit;
pub mod balance;
pub mod duplicates;
pub mod node;
pub mod settle;

use std::sync::Arc;

use anyhow::{Context, Result};
use ganamos_ledger::config::BackendConfig;
use ganamos_ledger::interfaces::{build_lightning, build_store};
use ganamos_ledger::lightning::LightningBackend;
use ganamos_ledger::store::LedgerStore;

/// Whether a command found something that needs an operator's attention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Findings,
}

/// Store and node handles, built from the same environment as the service
pub struct AdminContext {
    pub store: Arc<dyn LedgerStore>,
    pub lightning: Arc<dyn LightningBackend>,
}

impl AdminContext {
    pub fn from_env() -> Result<Self> {
        let backends = BackendConfig::from_env().context("Invalid backend configuration")?;
        Ok(Self {
            store: build_store(&backends)?,
            lightning: build_lightning(&backends)?,
        })
    }
}

pub fn sats(amount: i64) -> String {
    format!("{} sats", amount)
}
