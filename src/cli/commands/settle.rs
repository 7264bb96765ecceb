// Settle command - Credit pending deposits whose invoices were paid

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use ganamos_ledger::config::DEFAULT_INVOICE_EXPIRY_SECS;
use ganamos_ledger::wallet::WalletService;

use super::{AdminContext, Outcome};

#[derive(Args)]
pub struct SettleArgs {}

pub async fn execute(ctx: &AdminContext, _args: SettleArgs, verbose: bool) -> Result<Outcome> {
    if verbose {
        println!("{} Checking pending deposits against the node...", "→".blue());
    }

    let wallet = WalletService::new(
        ctx.store.clone(),
        ctx.lightning.clone(),
        DEFAULT_INVOICE_EXPIRY_SECS,
    );
    let summary = wallet.settle_pending_deposits().await?;

    println!("Pending deposits checked: {}", summary.checked);
    println!("  Settled:        {}", summary.settled.to_string().green());
    println!("  Failed:         {}", summary.failed);
    println!("  Still pending:  {}", summary.still_pending);
    if summary.errors > 0 {
        println!("  Errors:         {}", summary.errors.to_string().red());
        return Ok(Outcome::Findings);
    }

    Ok(Outcome::Clean)
}
