// Duplicates command - Look for double-booked transactions

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use ganamos_ledger::reconcile::scan_for_duplicates;
use ganamos_ledger::store::Transaction;

use super::{AdminContext, Outcome};

#[derive(Args)]
pub struct DuplicatesArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn describe(tx: &Transaction) -> String {
    format!(
        "{} {} {} {} \"{}\"",
        tx.id,
        tx.created_at.to_rfc3339(),
        tx.tx_type.as_str(),
        tx.amount,
        tx.memo.as_deref().unwrap_or("")
    )
}

pub async fn execute(ctx: &AdminContext, args: DuplicatesArgs, verbose: bool) -> Result<Outcome> {
    if verbose {
        println!("{} Scanning all transactions...", "→".blue());
    }
    let report = scan_for_duplicates(ctx.store.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Transactions scanned: {}", report.total_transactions);

        if report.duplicate_pairs.is_empty() {
            println!("{}", "✓ No suspected duplicate pairs".green());
        } else {
            println!(
                "{}",
                format!("✗ {} suspected duplicate pair(s)", report.duplicate_pairs.len())
                    .red()
                    .bold()
            );
            for pair in &report.duplicate_pairs {
                println!("  user {} ({:.1} min apart)", pair.first.user_id, pair.minutes_apart);
                println!("    1: {}", describe(&pair.first));
                println!("    2: {}", describe(&pair.second));
            }
        }

        if !report.deposits_without_invoice.is_empty() {
            println!(
                "{}",
                format!(
                    "! {} completed deposit(s) without an invoice",
                    report.deposits_without_invoice.len()
                )
                .yellow()
            );
            for tx in &report.deposits_without_invoice {
                println!("    {}", describe(tx));
            }
        }

        if !report.identical_timestamps.is_empty() {
            println!(
                "{}",
                format!(
                    "! {} timestamp(s) shared by several transactions",
                    report.identical_timestamps.len()
                )
                .yellow()
            );
            for collision in &report.identical_timestamps {
                println!(
                    "    {} ({} transactions)",
                    collision.created_at.to_rfc3339(),
                    collision.transactions.len()
                );
            }
        }
    }

    Ok(if report.is_clean() {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}
