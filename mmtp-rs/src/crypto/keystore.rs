//! File-backed key store with an in-memory cache.
//!
//! One armored key pair per address, stored as `<address>.pub.asc` /
//! `<address>.priv.asc` under the configured key directory. The cache is
//! consulted before the filesystem and populated by file reads. No expiry
//! or revocation. The store is an explicit injected object, constructed
//! once and handed to engine instances.

use crate::crypto::envelope;
use crate::error::{MtpError, Result};
use crate::protocol::address::split_address;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct KeyRecord {
    public: Option<String>,
    private: Option<String>,
}

pub struct KeyStore {
    key_dir: PathBuf,
    rsa_bits: usize,
    cache: RwLock<HashMap<String, KeyRecord>>,
}

impl KeyStore {
    pub fn new(key_dir: impl Into<PathBuf>, rsa_bits: usize) -> Self {
        Self {
            key_dir: key_dir.into(),
            rsa_bits,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    fn public_path(&self, address: &str) -> PathBuf {
        self.key_dir.join(format!("{address}.pub.asc"))
    }

    fn private_path(&self, address: &str) -> PathBuf {
        self.key_dir.join(format!("{address}.priv.asc"))
    }

    pub async fn get_public_key(&self, address: &str) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(armored) = cache.get(address).and_then(|r| r.public.clone()) {
                return Ok(armored);
            }
        }

        let armored = fs::read_to_string(self.public_path(address))
            .await
            .map_err(|_| MtpError::Crypto(format!("no public key for {address}")))?;
        debug!("Loaded public key for {} from disk", address);

        let mut cache = self.cache.write().await;
        cache.entry(address.to_string()).or_default().public = Some(armored.clone());
        Ok(armored)
    }

    pub async fn get_private_key(&self, address: &str) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(armored) = cache.get(address).and_then(|r| r.private.clone()) {
                return Ok(armored);
            }
        }

        let armored = fs::read_to_string(self.private_path(address))
            .await
            .map_err(|_| MtpError::Crypto(format!("no private key for {address}")))?;
        debug!("Loaded private key for {} from disk", address);

        let mut cache = self.cache.write().await;
        cache.entry(address.to_string()).or_default().private = Some(armored.clone());
        Ok(armored)
    }

    /// Store a peer's armored public key. Rejects text that does not parse
    /// as a PEM public key.
    pub async fn import_public_key(&self, address: &str, armored: &str) -> Result<()> {
        envelope::validate_public_key(armored)
            .map_err(|_| MtpError::Crypto(format!("malformed public key for {address}")))?;

        fs::create_dir_all(&self.key_dir).await?;
        fs::write(self.public_path(address), armored).await?;

        let mut cache = self.cache.write().await;
        cache.entry(address.to_string()).or_default().public = Some(armored.to_string());
        info!("Registered public key for {}", address);
        Ok(())
    }

    /// Generate and persist a key pair for `address`, bound to a human name
    /// and an email-shaped identity derived from the address parts.
    /// Returns the armored public key.
    pub async fn generate_key_pair(&self, address: &str, name: &str) -> Result<String> {
        let (local, domain) = split_address(address)
            .ok_or_else(|| MtpError::Format(format!("invalid address: {address}")))?;
        let identity = format!("{name} <{local}@{domain}>");

        let bits = self.rsa_bits;
        let (public_pem, private_pem) = tokio::task::spawn_blocking(move || {
            envelope::generate_key_pair(bits)
        })
        .await
        .map_err(|e| MtpError::Crypto(format!("key generation task failed: {e}")))??;

        fs::create_dir_all(&self.key_dir).await?;
        fs::write(self.public_path(address), &public_pem).await?;
        fs::write(self.private_path(address), &private_pem).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            address.to_string(),
            KeyRecord {
                public: Some(public_pem.clone()),
                private: Some(private_pem),
            },
        );
        info!("Generated {}-bit key pair for {}", bits, identity);
        Ok(public_pem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_BITS: usize = 2048;

    #[tokio::test]
    async fn generate_persists_and_caches() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path(), TEST_BITS);

        let public = store
            .generate_key_pair("(alice)%(example.com)", "Alice")
            .await
            .unwrap();
        assert!(public.contains("BEGIN PUBLIC KEY"));

        assert!(dir.path().join("(alice)%(example.com).pub.asc").exists());
        assert!(dir.path().join("(alice)%(example.com).priv.asc").exists());

        let fetched = store.get_public_key("(alice)%(example.com)").await.unwrap();
        assert_eq!(fetched, public);
        assert!(store
            .get_private_key("(alice)%(example.com)")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_key_is_a_crypto_error() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path(), TEST_BITS);
        let err = store.get_public_key("(ghost)%(example.com)").await;
        assert!(matches!(err, Err(MtpError::Crypto(_))));
    }

    #[tokio::test]
    async fn import_rejects_garbage_and_accepts_pem() {
        let dir = tempdir().unwrap();
        let store = KeyStore::new(dir.path(), TEST_BITS);

        assert!(store
            .import_public_key("(bob)%(example.com)", "not a key")
            .await
            .is_err());

        let (public_pem, _) = envelope::generate_key_pair(TEST_BITS).unwrap();
        store
            .import_public_key("(bob)%(example.com)", &public_pem)
            .await
            .unwrap();
        let fetched = store.get_public_key("(bob)%(example.com)").await.unwrap();
        assert_eq!(fetched, public_pem);
    }

    #[tokio::test]
    async fn file_read_populates_cache() {
        let dir = tempdir().unwrap();
        let (public_pem, _) = envelope::generate_key_pair(TEST_BITS).unwrap();
        std::fs::write(dir.path().join("(carol)%(example.com).pub.asc"), &public_pem).unwrap();

        let store = KeyStore::new(dir.path(), TEST_BITS);
        let first = store.get_public_key("(carol)%(example.com)").await.unwrap();
        assert_eq!(first, public_pem);

        // Remove the file; a cache hit must still answer.
        std::fs::remove_file(dir.path().join("(carol)%(example.com).pub.asc")).unwrap();
        let second = store.get_public_key("(carol)%(example.com)").await.unwrap();
        assert_eq!(second, public_pem);
    }
}
