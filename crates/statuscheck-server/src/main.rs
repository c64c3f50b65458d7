//! Statuscheck server binary

use statuscheck_server::{Config, StatusServer, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes first, it carries the logging settings.
    // Invalid configuration is fatal.
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    let _telemetry_guard = init_tracing(&config.logging, &config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        services = config.services.len(),
        "Statuscheck server starting"
    );

    let server = StatusServer::new(config.to_server_config())?;
    server.run().await?;

    // Telemetry guard flushes spans on drop

    Ok(())
}
