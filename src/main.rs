use anyhow::Result;
use clap::Parser;
use greeter::config::Config;
use greeter::server::Server;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "greeter", version, about = "Greeting API behind a global rate limit")]
struct Cli {
    /// Load environment variables from this file instead of `.env`
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Print the resolved settings as JSON and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables from .env file
    match &cli.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    // Load configuration from environment
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let settings = config
        .resolve()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "greeter={level},tower_http={level}",
                    level = settings.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting greeter service");
    tracing::info!(
        "Configuration: environment={}, bind_addr={}",
        settings.environment,
        settings.bind_addr
    );

    // Create and run the server
    let server =
        Server::new(settings).map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
