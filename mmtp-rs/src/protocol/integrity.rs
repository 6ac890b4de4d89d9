//! Content-integrity hashing.
//!
//! The message hash is SHA-256 over the canonical JSON rendering of the
//! plaintext content, always `{"subject":...,"body":...}` in that field
//! order. It is computed before any encryption; once a packet is marked
//! encrypted, verification is vacuously true. That is a deliberate trust
//! boundary (the hash covers what the sender saw), not something to patch
//! at verification time.

use crate::error::Result;
use crate::protocol::packet::{Content, MessagePacket};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Owned plaintext content in canonical field order. Also the shape the
/// envelope encrypts and restores on decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalContent {
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct CanonicalContentRef<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Canonical JSON for the given plaintext content.
pub fn canonical_json(subject: &str, body: &str) -> Result<String> {
    Ok(serde_json::to_string(&CanonicalContentRef { subject, body })?)
}

/// SHA-256 hex digest of the canonical content.
pub fn content_hash(subject: &str, body: &str) -> Result<String> {
    let canonical = canonical_json(subject, body)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute and compare the message hash for unencrypted packets;
/// vacuously true for encrypted ones.
pub fn verify(packet: &MessagePacket) -> bool {
    if packet.meta.encrypted {
        return true;
    }
    match &packet.content {
        Content::Plain { subject, body } => match content_hash(subject, body) {
            Ok(hash) => hash == packet.verification.message_hash,
            Err(_) => false,
        },
        // Ciphertext without the encrypted flag cannot be checked.
        Content::Encrypted { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_field_ordered() {
        let a = content_hash("Hi", "Yo").unwrap();
        let b = content_hash("Hi", "Yo").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            canonical_json("Hi", "Yo").unwrap(),
            r#"{"subject":"Hi","body":"Yo"}"#
        );
    }

    #[test]
    fn any_byte_change_alters_the_hash() {
        let a = content_hash("Hi", "Yo").unwrap();
        assert_ne!(a, content_hash("Hi", "Y o").unwrap());
        assert_ne!(a, content_hash("hi", "Yo").unwrap());
    }
}
