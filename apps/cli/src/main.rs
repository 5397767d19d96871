//! relnotes CLI: watches vendor release notes and posts localized
//! summaries to Slack.
//!
//! Runs either as a one-shot batch job (`relnotes run`) or as an HTTP
//! trigger server (`relnotes serve`).

mod commands;
mod server;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
