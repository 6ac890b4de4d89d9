//! Per-address mailboxes.
//!
//! Each address owns an ordered FIFO queue behind its own async lock, so
//! read-modify-write sequences (drain, filtered take) are serialized per
//! address while different addresses proceed concurrently. A mailbox is
//! created on first delivery; draining empties the queue but the mapping
//! persists for the process lifetime. Nothing here survives a restart.

use crate::protocol::engine::ProtocolEngine;
use crate::protocol::packet::{MessagePacket, TagSet};
use crate::protocol::tags;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type Queue = Arc<Mutex<Vec<MessagePacket>>>;

#[derive(Debug, Clone)]
pub struct MailboxStats {
    pub total: usize,
    pub filtered: Option<usize>,
    pub tag_counts: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Default)]
pub struct MailboxStore {
    boxes: RwLock<HashMap<String, Queue>>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivery-path lookup: creates the mailbox on first use.
    async fn queue_or_create(&self, address: &str) -> Queue {
        {
            let boxes = self.boxes.read().await;
            if let Some(queue) = boxes.get(address) {
                return queue.clone();
            }
        }
        let mut boxes = self.boxes.write().await;
        boxes.entry(address.to_string()).or_default().clone()
    }

    /// Read-path lookup: never materializes a mailbox, so probing arbitrary
    /// addresses cannot grow the map.
    async fn existing_queue(&self, address: &str) -> Option<Queue> {
        let boxes = self.boxes.read().await;
        boxes.get(address).cloned()
    }

    /// Append a validated packet to the recipient's mailbox, creating the
    /// mailbox if absent.
    pub async fn deliver(&self, packet: MessagePacket) {
        let queue = self.queue_or_create(&packet.recipient).await;
        let mut guard = queue.lock().await;
        debug!(recipient = %packet.recipient, message_id = %packet.meta.message_id, "Queued message");
        guard.push(packet);
    }

    /// Full drain: decrypt every still-encrypted entry best effort, return
    /// the whole queue, leave the mailbox empty. The per-address lock is
    /// held across the decrypt pass so concurrent drains cannot split a
    /// delivery.
    pub async fn drain(&self, address: &str, engine: &ProtocolEngine) -> Vec<MessagePacket> {
        let Some(queue) = self.existing_queue(address).await else {
            return Vec::new();
        };
        let mut guard = queue.lock().await;
        let mut messages = std::mem::take(&mut *guard);
        for message in &mut messages {
            if message.content.is_encrypted() {
                engine.decrypt_in_place(message, address).await;
            }
        }
        messages
    }

    /// Filtered take: decrypt pass over the whole queue, then remove and
    /// return only the entries matching the tag filters; the rest stay
    /// queued in arrival order.
    pub async fn take_filtered(
        &self,
        address: &str,
        filters: &TagSet,
        engine: &ProtocolEngine,
    ) -> Vec<MessagePacket> {
        let Some(queue) = self.existing_queue(address).await else {
            return Vec::new();
        };
        let mut guard = queue.lock().await;
        for message in guard.iter_mut() {
            if message.content.is_encrypted() {
                engine.decrypt_in_place(message, address).await;
            }
        }
        let (matching, rest) = tags::partition_by_tags(std::mem::take(&mut *guard), filters);
        *guard = rest;
        matching
    }

    /// Read-only mailbox summary; never mutates the queue.
    pub async fn stats(&self, address: &str, filters: Option<&TagSet>) -> MailboxStats {
        let Some(queue) = self.existing_queue(address).await else {
            return MailboxStats {
                total: 0,
                filtered: filters.map(|_| 0),
                tag_counts: BTreeMap::new(),
            };
        };
        let guard = queue.lock().await;
        let total = guard.len();
        let tag_counts = tags::tag_histogram(&guard);
        let filtered = filters.map(|f| {
            guard
                .iter()
                .filter(|m| tags::matches_filters(&m.meta.tags, f))
                .count()
        });
        MailboxStats {
            total,
            filtered,
            tag_counts,
        }
    }
}
