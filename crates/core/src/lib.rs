//! Core errors and configuration loading shared by Artisan crates.

pub mod config;
pub mod error;

pub use config::load_file;
pub use error::{Error, Result};
