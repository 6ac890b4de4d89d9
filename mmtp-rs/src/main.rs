use mmtp_rs::config::Config;
use mmtp_rs::crypto::KeyStore;
use mmtp_rs::server::MtpServer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = if std::path::Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::default()
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting mmtp-rs server");
    info!("  Listening on: {}", config.server.listen_addr);
    if config.tls.enabled {
        info!("  TLS listening on: {}", config.server.tls_listen_addr);
    }
    info!("  HashCash difficulty: {}", config.server.hashcash_difficulty);
    info!("  Key directory: {}", config.crypto.key_dir);

    let keystore = Arc::new(KeyStore::new(
        config.crypto.key_dir.clone(),
        config.crypto.rsa_bits,
    ));

    let server = MtpServer::new(config, keystore);
    server.run().await?;

    Ok(())
}
