// Balance command - Show a user's balance and recent ledger activity

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use uuid::Uuid;

use ganamos_ledger::reconcile::compute_balance;
use ganamos_ledger::store::{TransactionFilter, TransactionStatus};

use super::{sats, AdminContext, Outcome};

#[derive(Args)]
pub struct BalanceArgs {
    /// Profile id
    #[arg(short, long)]
    pub user: Uuid,

    /// Number of recent transactions to list
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
}

pub async fn execute(ctx: &AdminContext, args: BalanceArgs, _verbose: bool) -> Result<Outcome> {
    let profile = ctx
        .store
        .get_profile(args.user)
        .await?
        .ok_or_else(|| anyhow!("No profile with id {}", args.user))?;
    let transactions = ctx
        .store
        .list_transactions(&TransactionFilter::for_user(args.user))
        .await?;
    let breakdown = compute_balance(&transactions);

    println!(
        "{} {}",
        "User:".bold(),
        profile
            .email
            .as_deref()
            .or(profile.name.as_deref())
            .unwrap_or("(unnamed)")
    );
    println!("  Balance:    {}", sats(profile.balance).bold());
    if profile.balance == breakdown.calculated {
        println!("  History:    {}", sats(breakdown.calculated).green());
    } else {
        println!(
            "  History:    {} {}",
            sats(breakdown.calculated).red(),
            format!("(diff {:+})", profile.balance - breakdown.calculated).red()
        );
    }

    let recent: Vec<_> = transactions.iter().rev().take(args.limit).collect();
    if recent.is_empty() {
        println!("  No transactions");
        return Ok(Outcome::Clean);
    }

    println!();
    println!("{}", "Recent transactions".bold());
    for tx in recent {
        let status = match tx.status {
            TransactionStatus::Completed => tx.status.as_str().green(),
            TransactionStatus::Pending => tx.status.as_str().yellow(),
            TransactionStatus::Failed => tx.status.as_str().red(),
        };
        println!(
            "  {}  {:<10} {:>10}  {:<9}  {}",
            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
            tx.tx_type.as_str(),
            tx.amount,
            status,
            tx.memo.as_deref().unwrap_or("")
        );
    }

    Ok(Outcome::Clean)
}
