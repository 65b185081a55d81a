use anyhow::Result;
use clap::Parser;
use ledgerbridge::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // so DATABASE_PATH from .env reaches clap
    let cli = Cli::parse();
    cli.run().await
}
