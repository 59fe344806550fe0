//! Courier CLI binary entry point.

use clap::Parser;
use courier::cli::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = courier::cli::commands::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
