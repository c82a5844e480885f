//! Headless Tessera client.
//!
//! Connects to the configured server and logs the mirrored world once per
//! server tick until the connection closes.
//!
//! Run with: `cargo run -p tessera-client -- --server 127.0.0.1 --port 3333`

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tessera_client::ClientBuilder;
use tessera_config::{CliArgs, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = match args.config_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("tessera: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("tessera: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    tessera_log::init_logging(
        config.debug.log_dir.as_deref(),
        cfg!(debug_assertions),
        Some(&config),
    );

    let builder = match ClientBuilder::from_config(&config) {
        Ok(builder) => builder,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut client = match builder.connect_configured(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Connected to {}:{}",
        config.network.server_address, config.network.server_port
    );

    while client.is_connected() {
        let ticked =
            tokio::task::block_in_place(|| client.wait_for_tick(Duration::from_secs(1)));
        if !ticked {
            continue;
        }
        let world = client.world();
        match world.local_player() {
            Some(player) => info!(
                "Tick {}: {} entities, player at ({:.2}, {:.2})",
                world.server_ticks(),
                world.len(),
                player.position.x,
                player.position.y
            ),
            None => info!("Tick {}: {} entities", world.server_ticks(), world.len()),
        }
    }

    info!("Disconnected");
    ExitCode::SUCCESS
}
