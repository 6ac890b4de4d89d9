//! HashCash proof-of-work tokens.
//!
//! A token is the exact string
//! `"{version}:{difficulty}:{timestamp}:{sender}:{recipient}:{timestamp}::{counter}:"`
//! whose SHA-256 hex digest carries at least `difficulty` leading `'0'`
//! characters. The resource segment `{sender}:{recipient}:{timestamp}` is
//! embedded once; the timestamp appears a second time as a top-level field
//! of the historical format.
//!
//! Verification re-hashes the *stored* token string only. It does not
//! re-derive the token from the packet's own sender/recipient/timestamp, so
//! a token minted for unrelated resource values still passes as long as its
//! own digest meets the target. This binding gap is part of the wire
//! protocol as deployed and is kept as-is; tightening it would be a
//! trust-model change, not a bug fix.

use crate::error::{MtpError, Result};
use crate::protocol::packet::HashCashToken;
use sha2::{Digest, Sha256};

pub const VERSION: u32 = 1;

/// Upper bound on the counter search. At difficulty 6 the expected number
/// of attempts is 16^6 ≈ 1.7e7, well inside this cap.
pub const MAX_ITERATIONS: u64 = 1 << 27;

fn token_string(
    version: u32,
    difficulty: u32,
    timestamp: &str,
    sender: &str,
    recipient: &str,
    counter: u64,
) -> String {
    format!("{version}:{difficulty}:{timestamp}:{sender}:{recipient}:{timestamp}::{counter}:")
}

fn digest_hex(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn meets_difficulty(token: &str, difficulty: u32) -> bool {
    digest_hex(token)
        .bytes()
        .take_while(|b| *b == b'0')
        .count()
        >= difficulty as usize
}

/// Brute-force search over an incrementing counter starting at 0.
///
/// CPU-bound; callers on an async path should run it under
/// `tokio::task::spawn_blocking`. The search is bounded by
/// [`MAX_ITERATIONS`] and fails with an anti-spam error on exhaustion
/// rather than spinning forever.
pub fn generate(
    sender: &str,
    recipient: &str,
    timestamp: &str,
    difficulty: u32,
) -> Result<HashCashToken> {
    for counter in 0..MAX_ITERATIONS {
        let token = token_string(VERSION, difficulty, timestamp, sender, recipient, counter);
        if meets_difficulty(&token, difficulty) {
            return Ok(HashCashToken { token, counter });
        }
    }
    Err(MtpError::AntiSpam(format!(
        "no hashcash solution at difficulty {difficulty} within {MAX_ITERATIONS} iterations"
    )))
}

/// Check the stored token string against the difficulty target.
pub fn verify(token: &HashCashToken, difficulty: u32) -> bool {
    meets_difficulty(&token.token, difficulty)
}
