// Node balance command - Show what the Lightning node holds

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{sats, AdminContext, Outcome};

#[derive(Args)]
pub struct NodeBalanceArgs {
    /// Print the balances as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(ctx: &AdminContext, args: NodeBalanceArgs, verbose: bool) -> Result<Outcome> {
    let balance = ctx.lightning.node_balance().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&balance)?);
        return Ok(Outcome::Clean);
    }

    if verbose {
        let info = ctx.lightning.node_info().await?;
        println!("{} {} ({})", "Node:".bold(), info.alias, info.pubkey);
        println!(
            "  Version {}, block {}, {}",
            info.version,
            info.block_height,
            if info.synced_to_chain {
                "synced".green()
            } else {
                "not synced".yellow()
            }
        );
    }

    println!("{}", "Node balance".bold());
    println!("  Channels:  {}", sats(balance.channel_balance));
    println!("  Pending:   {}", sats(balance.pending_balance));
    println!("  On-chain:  {}", sats(balance.onchain_balance));
    println!("  Total:     {}", sats(balance.total_balance).bold());

    Ok(Outcome::Clean)
}
