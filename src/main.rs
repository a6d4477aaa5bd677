//! # Artisan
//!
//! Command-line entry point.
//!
//! ## Startup
//!
//! 1. **Arguments** - Parse the command line with clap
//! 2. **Configuration** - Load `--config` (TOML or JSON) or use defaults
//! 3. **Tracing** - Install the subscriber; `RUST_LOG` overrides the
//!    configured filter
//! 4. **Command** - Run the subcommand and print its output

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use artisan::ArtisanConfig;
use artisan::cli::Cli;
use artisan::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ArtisanConfig::load(cli.config.as_deref()).with_context(|| {
        cli.config.as_ref().map_or_else(
            || "Failed to build default configuration".to_string(),
            |path| format!("Failed to load configuration from {}", path.display()),
        )
    })?;

    init_tracing(&config.logging.filter);
    debug!(command = ?cli.command, "Running command");

    let output = execute_command(cli.command, &config).await?;
    println!("{output}");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(fallback: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
