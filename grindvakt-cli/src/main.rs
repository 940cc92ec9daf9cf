//! ## grindvakt-cli
//! **Operational interface for the rule rotation engine**
//!
//! Runs threat findings through the handler, blocks hosts directly, and
//! inspects or audits the managed slot window of a rule set.

use clap::Parser;

mod backends;
mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
