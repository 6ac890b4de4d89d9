//! Cryptographic envelope: hybrid encryption and detached signatures.
//!
//! Content is encrypted with a fresh AES-256-GCM key; the key is wrapped
//! with the recipient's RSA public key (OAEP/SHA-256). The sealed envelope
//! travels as base64 of a small JSON document. Signatures are RSA PKCS#1
//! v1.5 over a SHA-256 digest of the canonical plaintext content, detached
//! from the content itself.
//!
//! The protocol engine only feeds plaintext/ciphertext and armored keys in
//! here and catches failures; nothing in this module touches packets.

use crate::error::{MtpError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    key: String,
    nonce: String,
    ciphertext: String,
}

fn parse_public_key(armored: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(armored)
        .map_err(|e| MtpError::Crypto(format!("invalid public key: {e}")))
}

fn parse_private_key(armored: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(armored)
        .map_err(|e| MtpError::Crypto(format!("invalid private key: {e}")))
}

/// Check that armored text parses as a PEM public key.
pub fn validate_public_key(armored: &str) -> Result<()> {
    parse_public_key(armored).map(|_| ())
}

/// Generate an RSA key pair, returned as PEM-armored (public, private) text.
///
/// Key generation is CPU-heavy at 4096 bits; async callers go through the
/// key store which offloads to a blocking task.
pub fn generate_key_pair(bits: usize) -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| MtpError::Crypto(format!("key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| MtpError::Crypto(format!("public key encoding failed: {e}")))?;
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| MtpError::Crypto(format!("private key encoding failed: {e}")))?;

    Ok((public_pem, private_pem.to_string()))
}

/// Encrypt plaintext for the holder of `public_key_pem`.
pub fn encrypt(plaintext: &[u8], public_key_pem: &str) -> Result<String> {
    let public_key = parse_public_key(public_key_pem)?;

    let aes_key = Aes256Gcm::generate_key(OsRng);
    let cipher = Aes256Gcm::new(&aes_key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| MtpError::Crypto(format!("content encryption failed: {e}")))?;

    let mut rng = rand::thread_rng();
    let wrapped_key = public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), aes_key.as_slice())
        .map_err(|e| MtpError::Crypto(format!("key wrapping failed: {e}")))?;

    let envelope = SealedEnvelope {
        key: BASE64.encode(wrapped_key),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    };
    Ok(BASE64.encode(serde_json::to_vec(&envelope)?))
}

/// Decrypt a sealed envelope with the recipient's private key.
pub fn decrypt(sealed: &str, private_key_pem: &str) -> Result<Vec<u8>> {
    let private_key = parse_private_key(private_key_pem)?;

    let raw = BASE64
        .decode(sealed)
        .map_err(|e| MtpError::Crypto(format!("malformed envelope: {e}")))?;
    let envelope: SealedEnvelope = serde_json::from_slice(&raw)
        .map_err(|e| MtpError::Crypto(format!("malformed envelope: {e}")))?;

    let wrapped_key = BASE64
        .decode(&envelope.key)
        .map_err(|e| MtpError::Crypto(format!("malformed envelope key: {e}")))?;
    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| MtpError::Crypto(format!("malformed envelope nonce: {e}")))?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| MtpError::Crypto(format!("malformed envelope ciphertext: {e}")))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(MtpError::Crypto("malformed envelope nonce".to_string()));
    }

    let aes_key = private_key
        .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
        .map_err(|e| MtpError::Crypto(format!("key unwrapping failed: {e}")))?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|e| MtpError::Crypto(format!("bad session key: {e}")))?;

    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|e| MtpError::Crypto(format!("content decryption failed: {e}")))
}

/// Detached signature over `data`, base64-encoded.
pub fn sign(data: &[u8], private_key_pem: &str) -> Result<String> {
    let private_key = parse_private_key(private_key_pem)?;

    let mut hasher = Sha256::new();
    hasher.update(data);
    let hashed = hasher.finalize();

    let mut rng = rand::thread_rng();
    let signature = private_key
        .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha256>(), &hashed)
        .map_err(|e| MtpError::Crypto(format!("signing failed: {e}")))?;

    Ok(BASE64.encode(signature))
}

/// Check a detached signature; false for bad signatures or malformed input.
pub fn verify(data: &[u8], signature_b64: &str, public_key_pem: &str) -> bool {
    let Ok(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(signature) = BASE64.decode(signature_b64) else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(data);
    let hashed = hasher.finalize();

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BITS: usize = 2048;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (public_pem, private_pem) = generate_key_pair(TEST_BITS).unwrap();
        let sealed = encrypt(b"hello envelope", &public_pem).unwrap();
        let plaintext = decrypt(&sealed, &private_pem).unwrap();
        assert_eq!(plaintext, b"hello envelope");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let (public_pem, _) = generate_key_pair(TEST_BITS).unwrap();
        let (_, other_private) = generate_key_pair(TEST_BITS).unwrap();
        let sealed = encrypt(b"secret", &public_pem).unwrap();
        assert!(decrypt(&sealed, &other_private).is_err());
    }

    #[test]
    fn sign_verify_round_trip() {
        let (public_pem, private_pem) = generate_key_pair(TEST_BITS).unwrap();
        let signature = sign(b"signed content", &private_pem).unwrap();
        assert!(verify(b"signed content", &signature, &public_pem));
        assert!(!verify(b"tampered content", &signature, &public_pem));
    }

    #[test]
    fn verify_with_wrong_key_is_false_not_error() {
        let (_, private_pem) = generate_key_pair(TEST_BITS).unwrap();
        let (other_public, _) = generate_key_pair(TEST_BITS).unwrap();
        let signature = sign(b"content", &private_pem).unwrap();
        assert!(!verify(b"content", &signature, &other_public));
        assert!(!verify(b"content", "not-base64!!!", &other_public));
    }
}
