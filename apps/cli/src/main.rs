//! linkenrich CLI: build-time GitHub link enrichment for document trees.
//!
//! Reads mdast-shaped JSON trees, resolves issue links and `@handle`
//! mentions against GitHub, and writes the decorated trees back.

mod commands;

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
