use clap::Parser;
use entity_cache::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli::cache::run(cli.command).await
}
