//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tessera client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera", about = "Tessera world-mirror client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    /// Config directory to use: `--config` if given, else the per-user default.
    pub fn config_dir(&self) -> Result<PathBuf, crate::ConfigError> {
        match &self.config {
            Some(dir) => Ok(dir.clone()),
            None => Config::default_dir(),
        }
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            log_level: Some("debug".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 3333);
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_args() {
        let args = CliArgs::parse_from(["tessera", "--port", "4000", "--config", "/tmp/t"]);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.config_dir().unwrap(), PathBuf::from("/tmp/t"));
    }
}
