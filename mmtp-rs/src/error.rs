use thiserror::Error;

#[derive(Error, Debug)]
pub enum MtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FormatError: {0}")]
    Format(String),

    #[error("IntegrityError: {0}")]
    Integrity(String),

    #[error("AntiSpamError: {0}")]
    AntiSpam(String),

    #[error("CryptoError: {0}")]
    Crypto(String),

    #[error("CapacityError: {0}")]
    Capacity(String),

    #[error("ProtocolError: {0}")]
    Protocol(String),

    #[error("TimeoutError: no response to {0} within 10s")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MtpError>;
