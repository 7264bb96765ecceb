// Activity command - Completed deposits, withdrawals and transfers in a window

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::Args;
use colored::Colorize;

use ganamos_ledger::reconcile::{activity_summary, VolumeCount, DEFAULT_ACTIVITY_WINDOW_HOURS};

use super::{sats, AdminContext, Outcome};

#[derive(Args)]
pub struct ActivityArgs {
    /// Size of the window, in hours back from now
    #[arg(long, default_value_t = DEFAULT_ACTIVITY_WINDOW_HOURS)]
    pub hours: i64,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

fn print_volume(label: &str, volume: &VolumeCount) {
    println!("  {:<13}{:>6}  ({})", label, volume.count, sats(volume.amount));
}

pub async fn execute(ctx: &AdminContext, args: ActivityArgs, verbose: bool) -> Result<Outcome> {
    if args.hours <= 0 {
        bail!("--hours must be positive");
    }
    let since = Utc::now() - Duration::hours(args.hours);
    if verbose {
        println!("{} Summarising activity since {}", "→".blue(), since.to_rfc3339());
    }

    let summary = activity_summary(ctx.store.as_ref(), since).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(Outcome::Clean);
    }

    println!("{}", format!("Last {}h activity", args.hours).bold());
    println!("  Transactions: {:>6}", summary.transactions);
    print_volume("Deposits:", &summary.deposits);
    print_volume("Withdrawals:", &summary.withdrawals);
    print_volume("Transfers:", &summary.transfers);

    Ok(Outcome::Clean)
}
