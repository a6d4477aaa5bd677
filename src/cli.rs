//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Artisan - exactly-once operation coordinator
#[derive(Parser, Debug)]
#[command(name = "artisan")]
#[command(version)]
#[command(about = "Deduplicate side-effecting operations within a TTL window")]
#[command(
    long_about = "Artisan fingerprints request payloads, derives dedup keys, and runs operations at most once per (owner, operation, payload) inside a TTL window."
)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the fingerprint of a JSON payload
    Fingerprint {
        /// Payload as JSON
        #[arg(short, long, required_unless_present = "absent")]
        payload: Option<String>,

        /// Fingerprint the absent payload instead
        #[arg(long, default_value_t = false, conflicts_with = "payload")]
        absent: bool,
    },

    /// Print the dedup key for a request
    Key {
        /// Owner id; omitted means anonymous
        #[arg(long)]
        owner: Option<String>,

        /// Operation name
        #[arg(long)]
        operation: String,

        /// Payload as JSON; omitted means absent
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Race concurrent attempts of one operation and report outcomes as JSON
    Simulate {
        /// Owner id; omitted means anonymous
        #[arg(long)]
        owner: Option<String>,

        /// Operation name
        #[arg(long)]
        operation: String,

        /// Payload as JSON
        #[arg(short, long)]
        payload: String,

        /// Number of concurrent attempts
        #[arg(long, default_value_t = 5)]
        attempts: usize,

        /// Simulated work per attempt in milliseconds
        #[arg(long, default_value_t = 50)]
        work_ms: u64,

        /// Claim TTL in milliseconds; defaults to the configured TTL
        #[arg(long)]
        ttl_ms: Option<u64>,

        /// Make the winning attempt fail
        #[arg(long, default_value_t = false)]
        fail: bool,
    },
}
