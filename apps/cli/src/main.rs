//! Pagewise CLI: ask questions about a website.
//!
//! Crawls from one or more start URLs, lets a language model decide which
//! links to follow, and answers (or runs generated code) from what it read.

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
