use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "apiwatch", version, about = "Build and watch batched API requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the request batch for an operation (JSON)
    Build(commands::build::BuildArgs),
    /// Poll an operation and log Update/Change events until Ctrl+C
    Watch(commands::watch::WatchArgs),
    /// Print the JSON schema of the config file
    Schema(commands::schema::SchemaArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    apiwatch_otel::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => commands::build::run(args),
        Commands::Watch(args) => commands::watch::run(args).await,
        Commands::Schema(args) => commands::schema::run(args),
    }
}
