// Audit command - Compare stored balances with transaction history

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use uuid::Uuid;

use ganamos_ledger::reconcile::{
    audit_all_balances, audit_user, liquidity_summary, AuditReport, AuditStatus, UserAudit,
};

use super::{sats, AdminContext, Outcome};

#[derive(Args)]
pub struct AuditArgs {
    /// Audit a single user instead of every profile
    #[arg(short, long)]
    pub user: Option<Uuid>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the node liquidity comparison
    #[arg(long)]
    pub skip_node: bool,
}

pub async fn execute(ctx: &AdminContext, args: AuditArgs, verbose: bool) -> Result<Outcome> {
    if let Some(user_id) = args.user {
        let audit = audit_user(ctx.store.as_ref(), user_id).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&audit)?);
        } else {
            print_user_audit(&audit);
        }
        return Ok(if audit.is_consistent() {
            Outcome::Clean
        } else {
            Outcome::Findings
        });
    }

    if verbose {
        println!("{} Auditing all balances...", "→".blue());
    }
    let report = audit_all_balances(ctx.store.as_ref()).await?;

    let liquidity = if args.skip_node {
        None
    } else {
        match liquidity_summary(ctx.store.as_ref(), ctx.lightning.as_ref()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                eprintln!("{} Could not compare with node balance: {}", "!".yellow(), e);
                None
            }
        }
    };

    if args.json {
        let output = serde_json::json!({ "audit": report, "liquidity": liquidity });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report);
        if let Some(summary) = liquidity {
            println!();
            println!("{}", "Node liquidity".bold());
            println!("  Node total:     {}", sats(summary.node.total_balance));
            println!("  Owed to users:  {}", sats(summary.app_total_balance));
            let difference = sats(summary.difference);
            if summary.difference < 0 {
                println!("  Difference:     {}", difference.red().bold());
            } else {
                println!("  Difference:     {}", difference.green());
            }
        }
    }

    Ok(match report.status {
        AuditStatus::Passed => Outcome::Clean,
        AuditStatus::Failed => Outcome::Findings,
    })
}

fn print_user_audit(audit: &UserAudit) {
    let who = audit
        .email
        .clone()
        .unwrap_or_else(|| audit.user_id.to_string());
    println!("{} {}", "User:".bold(), who);
    println!("  Stored balance:     {}", sats(audit.profile_balance));
    println!("  Deposits:          +{}", sats(audit.breakdown.deposits));
    println!("  Withdrawals:       -{}", sats(audit.breakdown.withdrawals));
    println!("  Internal:           {}", sats(audit.breakdown.internal));
    println!("  Calculated:         {}", sats(audit.breakdown.calculated));
    println!("  Transactions:       {}", audit.breakdown.transaction_count);
    if audit.is_consistent() {
        println!("  {}", "✓ Balance matches history".green());
    } else {
        println!(
            "  {} {}",
            "✗ Difference:".red().bold(),
            sats(audit.difference).red()
        );
    }
}

fn print_report(report: &AuditReport) {
    match report.status {
        AuditStatus::Passed => println!("{}", "✓ Balance audit passed".green().bold()),
        AuditStatus::Failed => println!("{}", "✗ Balance audit failed".red().bold()),
    }
    println!("  Users audited:            {}", report.total_users);
    println!("  Users with discrepancies: {}", report.users_with_discrepancies);
    println!("  Total discrepancy:        {}", sats(report.total_discrepancy));
    if report.skipped_users > 0 {
        println!(
            "  {}",
            format!("Skipped users:            {}", report.skipped_users).yellow()
        );
    }
    if let Some(largest) = &report.largest_discrepancy {
        println!("  Largest:                  {} ({})", sats(largest.amount), largest.user);
    }

    if !report.discrepancies.is_empty() {
        println!();
        println!("{}", "Discrepancies".bold());
        for audit in &report.discrepancies {
            println!(
                "  {:<38} stored {:>12}  calculated {:>12}  diff {}",
                audit.email.clone().unwrap_or_else(|| audit.user_id.to_string()),
                audit.profile_balance,
                audit.breakdown.calculated,
                format!("{:+}", audit.difference).red()
            );
        }
    }
}
