mod cli;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(args.log_level)
        .init();

    cli::run(args).await?;
    // Exit explicitly: the stdin reader thread may still be parked on a blocking read.
    std::process::exit(0);
}
