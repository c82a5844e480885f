//! Configuration for the tessera client.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line. Unknown or missing fields fall back to defaults so config
//! files survive upgrades in both directions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, HandshakeSettings, NetworkConfig};
pub use error::ConfigError;
