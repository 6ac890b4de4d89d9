//! mmtp-rs: message-transfer protocol with proof-of-work anti-spam
//!
//! A custom mail-like protocol served over TCP: JSON packets carrying a
//! HashCash proof-of-work token, a content-integrity hash, optional
//! end-to-end encryption/signing and tag-based categorization, with a
//! connection-oriented server holding per-address mailboxes and a client
//! that composes, sends and retrieves messages.
//!
//! # Features
//!
//! - **Packets**: `(local)%(domain)` addressing, SHA-256 content hashes,
//!   HashCash anti-spam tokens, closed/open tag categories
//! - **Crypto**: hybrid RSA + AES-GCM envelope, detached signatures,
//!   file-backed per-address key store
//! - **Server**: concurrent connections with a per-IP cap, per-address
//!   serialized mailboxes, plain TCP (8025) and TLS (8026) listeners
//! - **Client**: request/response correlation by request id with a fixed
//!   10-second timeout
//!
//! # Example
//!
//! ```no_run
//! use mmtp_rs::config::Config;
//! use mmtp_rs::crypto::KeyStore;
//! use mmtp_rs::server::MtpServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let keystore = Arc::new(KeyStore::new(
//!         config.crypto.key_dir.clone(),
//!         config.crypto.rsa_bits,
//!     ));
//!
//!     let server = MtpServer::new(config, keystore);
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`protocol`]: Packet model, proof-of-work, integrity, tags, engine
//! - [`crypto`]: Envelope crypto and the key store
//! - [`server`]: Connection manager and mailbox store
//! - [`client`]: Client connection and request correlation

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{MtpError, Result};
