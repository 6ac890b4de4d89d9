//! MMTP address syntax: `(local)%(domain)`.
//!
//! Validation is purely syntactic; no network or key-store access.

use regex::Regex;
use std::sync::OnceLock;

static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();

fn address_regex() -> &'static Regex {
    ADDRESS_RE.get_or_init(|| {
        Regex::new(r"^\(([a-zA-Z0-9._-]+)\)%\(([a-zA-Z0-9.-]+)\)$").expect("address regex")
    })
}

/// Check the `(local)%(domain)` address form.
pub fn validate_address(addr: &str) -> bool {
    address_regex().is_match(addr)
}

/// Split a valid address into its local part and domain,
/// without the surrounding parentheses.
pub fn split_address(addr: &str) -> Option<(String, String)> {
    let caps = address_regex().captures(addr)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}
