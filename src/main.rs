//! stacksplit CLI entry point.
//!
//! Parses arguments, runs the selected command, and renders failures as a
//! single colored error line (with the cause chain) before exiting
//! non-zero.

use clap::Parser;
use colored::Colorize;
use stacksplit::cli;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    if let Err(error) = cli.execute().await {
        eprintln!("{} {error:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
