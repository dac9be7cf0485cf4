//! raycoon: command-line proxy manager.

mod cli;
mod context;
mod logging;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    if let Err(e) = cli::run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
