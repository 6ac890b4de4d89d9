use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsSettings,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub tls_listen_addr: String,
    /// Required leading zero hex characters in a HashCash digest.
    /// Server-wide constant, not negotiated per message.
    pub hashcash_difficulty: u32,
    /// Concurrent connections allowed per source IP.
    pub max_connections_per_ip: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsSettings {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CryptoConfig {
    /// Enables the encryption/signing envelope and key registration actions.
    pub enabled: bool,
    pub key_dir: String,
    pub rsa_bits: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::MtpError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::MtpError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8025".to_string(),
                tls_listen_addr: "0.0.0.0:8026".to_string(),
                hashcash_difficulty: 4,
                max_connections_per_ip: 5,
            },
            tls: TlsSettings {
                enabled: false,
                cert_path: None,
                key_path: None,
            },
            crypto: CryptoConfig {
                enabled: true,
                key_dir: "keys".to_string(),
                rsa_bits: 4096,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_ports() {
        let config = Config::default();
        assert!(config.server.listen_addr.ends_with(":8025"));
        assert!(config.server.tls_listen_addr.ends_with(":8026"));
        assert_eq!(config.server.max_connections_per_ip, 5);
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
            [server]
            listen_addr = "127.0.0.1:9025"
            tls_listen_addr = "127.0.0.1:9026"
            hashcash_difficulty = 2
            max_connections_per_ip = 5

            [tls]
            enabled = false

            [crypto]
            enabled = true
            key_dir = "/tmp/keys"
            rsa_bits = 2048

            [logging]
            level = "debug"
            format = "pretty"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.hashcash_difficulty, 2);
        assert_eq!(config.crypto.rsa_bits, 2048);
    }
}
