//! Cryptographic envelope and key material.
//!
//! - [`envelope`]: hybrid encryption and detached signatures
//! - [`keystore`]: file-backed per-address key store with caching

pub mod envelope;
pub mod keystore;

pub use keystore::KeyStore;
