#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Artisan
//!
//! Exactly-once coordination for side-effecting operations.
//!
//! This library re-exports the Artisan workspace crates and holds the CLI
//! plumbing shared by the `artisan` binary and its tests.

pub use artisan_core;
pub use artisan_idempotency;

pub mod cli;
pub mod commands;
pub mod config;

pub use config::{ArtisanConfig, LoggingConfig};
