// Ganamos Admin CLI - Ledger audit and node tooling for operators

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{activity, audit, balance, duplicates, node, settle, AdminContext, Outcome};

/// Exit status when a check found discrepancies
const FINDINGS_EXIT_CODE: i32 = 2;

/// Ganamos Admin - audit balances and inspect the Lightning node
#[derive(Parser)]
#[command(name = "ganamos-admin")]
#[command(version)]
#[command(about = "Operator tooling for the Ganamos Lightning ledger", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every stored balance with its transaction history
    Audit(audit::AuditArgs),

    /// Summarise completed deposits, withdrawals and transfers
    Activity(activity::ActivityArgs),

    /// Show one user's balance and recent transactions
    Balance(balance::BalanceArgs),

    /// Look for double-booked transactions
    Duplicates(duplicates::DuplicatesArgs),

    /// Show the Lightning node's balances
    NodeBalance(node::NodeBalanceArgs),

    /// Credit pending deposits whose invoices have been paid
    SettlePending(settle::SettleArgs),
}

fn print_banner() {
    println!("{}", "GANAMOS ADMIN".blue().bold());
    println!("{}", "Lightning ledger tooling".blue());
    println!();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        print_banner();
    }

    let ctx = match AdminContext::from_env() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Audit(args) => audit::execute(&ctx, args, cli.verbose).await,
        Commands::Activity(args) => activity::execute(&ctx, args, cli.verbose).await,
        Commands::Balance(args) => balance::execute(&ctx, args, cli.verbose).await,
        Commands::Duplicates(args) => duplicates::execute(&ctx, args, cli.verbose).await,
        Commands::NodeBalance(args) => node::execute(&ctx, args, cli.verbose).await,
        Commands::SettlePending(args) => settle::execute(&ctx, args, cli.verbose).await,
    };

    match result {
        Ok(Outcome::Clean) => {}
        Ok(Outcome::Findings) => std::process::exit(FINDINGS_EXIT_CODE),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
