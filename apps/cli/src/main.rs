//! CatalogSync CLI for scheduled vendor catalog imports.
//!
//! Streams vendor CSV files into the product document store and backfills
//! missing descriptions through a text-generation service.

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
