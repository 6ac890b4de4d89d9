//! TLS configuration for the TLS listener.
//!
//! Loads a PEM certificate chain and PKCS#8 private key from the paths in
//! the config. Certificate provisioning (self-signed generation and the
//! like) is external tooling, not this server's job.

use crate::error::{MtpError, Result};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub fn load_server_config<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Arc<ServerConfig>> {
    info!("Loading TLS certificate from {:?}", cert_path.as_ref());

    let cert_file = File::open(cert_path.as_ref())
        .map_err(|e| MtpError::Tls(format!("Failed to open certificate file: {e}")))?;
    let mut cert_reader = BufReader::new(cert_file);

    let certs = certs(&mut cert_reader)
        .map_err(|e| MtpError::Tls(format!("Failed to read certificates: {e}")))?;
    if certs.is_empty() {
        return Err(MtpError::Tls("No certificates found in file".to_string()));
    }
    debug!("Loaded {} certificate(s)", certs.len());

    let key_file = File::open(key_path.as_ref())
        .map_err(|e| MtpError::Tls(format!("Failed to open key file: {e}")))?;
    let mut key_reader = BufReader::new(key_file);

    let mut keys = pkcs8_private_keys(&mut key_reader)
        .map_err(|e| MtpError::Tls(format!("Failed to read private keys: {e}")))?;
    if keys.is_empty() {
        return Err(MtpError::Tls("No private key found in file".to_string()));
    }
    let private_key = keys.remove(0);

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(
            certs.into_iter().map(rustls::Certificate).collect(),
            rustls::PrivateKey(private_key),
        )
        .map_err(|e| MtpError::Tls(format!("Failed to create TLS config: {e}")))?;

    Ok(Arc::new(config))
}
