//! Wire-level packet model.
//!
//! Everything here serializes to the camelCase JSON documents exchanged on
//! the wire; the server stores packets in this form as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Category name to tag values.
pub type TagSet = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Mail,
    Reply,
}

/// Proof-of-work token: the exact string that was hashed, plus the counter
/// that satisfied the difficulty target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashCashToken {
    pub token: String,
    pub counter: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketMeta {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    /// Fresh random 128-bit value per packet.
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub hashcash_token: HashCashToken,
    pub encrypted: bool,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrypted: Option<bool>,
    #[serde(default)]
    pub tags: TagSet,
}

/// Packet content. Encryption replaces the plaintext form wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Plain { subject: String, body: String },
    Encrypted { encrypted: String },
}

impl Content {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Content::Encrypted { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    /// SHA-256 hex digest of the canonical plaintext content, computed
    /// before any encryption and never recomputed afterwards.
    pub message_hash: String,
    /// Detached signature over the canonical plaintext content, base64.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePacket {
    pub meta: PacketMeta,
    pub sender: String,
    pub recipient: String,
    pub content: Content,
    pub verification: Verification,
}

impl MessagePacket {
    /// Plaintext subject, if the content is readable.
    pub fn subject(&self) -> Option<&str> {
        match &self.content {
            Content::Plain { subject, .. } => Some(subject),
            Content::Encrypted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_round_trips_as_untagged_json() {
        let plain = Content::Plain {
            subject: "Hi".to_string(),
            body: "Yo".to_string(),
        };
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json["subject"], "Hi");
        let back: Content = serde_json::from_value(json).unwrap();
        assert_eq!(back, plain);

        let sealed = Content::Encrypted {
            encrypted: "deadbeef".to_string(),
        };
        let json = serde_json::to_value(&sealed).unwrap();
        assert_eq!(json["encrypted"], "deadbeef");
        let back: Content = serde_json::from_value(json).unwrap();
        assert!(back.is_encrypted());
    }

    #[test]
    fn meta_uses_camel_case_on_the_wire() {
        let meta = PacketMeta {
            packet_type: PacketType::Mail,
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            hashcash_token: HashCashToken {
                token: "1:2:ts:a:b:ts::0:".to_string(),
                counter: 0,
            },
            encrypted: false,
            signed: false,
            signature_verified: None,
            decrypted: None,
            tags: TagSet::new(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("messageId").is_some());
        assert!(json.get("hashcashToken").is_some());
        assert_eq!(json["type"], "mail");
        // Optional flags stay off the wire until set.
        assert!(json.get("signatureVerified").is_none());
        assert!(json.get("decrypted").is_none());
    }
}
