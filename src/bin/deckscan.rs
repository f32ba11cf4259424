//! Service binary: load configuration, start the server.

use deckscan::config::ServiceConfig;

// Process-wide allocator; every subsystem inherits the throughput win.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("DECKSCAN_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));

    let config = match config_path {
        Some(path) if std::path::Path::new(&path).exists() => ServiceConfig::from_file(&path)?,
        Some(path) => {
            eprintln!("config file {path} not found, using defaults");
            ServiceConfig::default()
        }
        None => ServiceConfig::default(),
    };

    deckscan::server::init_tracing(&config.server.log_level);
    deckscan::server::start_server(config).await?;
    Ok(())
}
