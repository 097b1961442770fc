#![cfg(not(tarpaulin_include))]

use clap::Parser;
use loyalty_dashboard::app;
use loyalty_dashboard::config::DashboardConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Loyalty dashboard web server")]
struct Args {
    /// TOML configuration file; `LOYALTY_*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Main entry point for the dashboard server
///
/// Loads the configuration, initialises logging with the configured level
/// (`RUST_LOG` still wins) and serves until stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = DashboardConfig::load(args.config.as_deref())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    app::run(config).await?;
    Ok(())
}
