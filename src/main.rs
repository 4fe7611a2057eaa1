//! ackd: delayed-acknowledgment server
//!
//! Accepts TCP clients, appends each received message to `<port>.txt` and
//! answers `ACCEPTED` once the configured delay has passed.

use ackd::config::Config;
use ackd::runtime::{self, Shutdown};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        ack_delay_ms = config.ack_delay.as_millis() as u64,
        max_connections = config.max_connections,
        eager_receive = config.eager_receive,
        "Starting ackd server"
    );

    let shutdown = Shutdown::on_signals()?;
    let stats = runtime::run(&config, shutdown).map_err(|e| {
        error!(error = %e, "Server failed");
        e
    })?;

    info!(
        accepted = stats.accepted,
        messages = stats.messages,
        acks = stats.acks,
        disconnects = stats.disconnects,
        "Shut down"
    );
    Ok(())
}
