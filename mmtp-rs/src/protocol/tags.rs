//! Tag taxonomy and filtering.
//!
//! Three closed categories (`priority`, `category`, `status`) plus an open
//! `custom` category. Closed-category values are filtered to the vocabulary
//! at packet-build time; unknown values are silently dropped, never errors.

use crate::protocol::packet::{MessagePacket, TagSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

pub const PRIORITY_TAGS: &[&str] = &["urgent", "high", "normal", "low"];
pub const CATEGORY_TAGS: &[&str] = &["personal", "work", "social", "promotion", "notification"];
pub const STATUS_TAGS: &[&str] = &["unread", "read", "archived", "flagged"];

pub const CUSTOM_CATEGORY: &str = "custom";

fn vocabulary(category: &str) -> Option<&'static [&'static str]> {
    match category {
        "priority" => Some(PRIORITY_TAGS),
        "category" => Some(CATEGORY_TAGS),
        "status" => Some(STATUS_TAGS),
        _ => None,
    }
}

/// Caller-facing tag input: either a bare list (which becomes the `custom`
/// category verbatim) or a category-to-values map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagInput {
    List(Vec<String>),
    Map(TagSet),
}

/// Normalize caller tags into a packet [`TagSet`].
pub fn process_tags(input: Option<TagInput>) -> TagSet {
    let mut out = TagSet::new();
    match input {
        None => {}
        Some(TagInput::List(list)) => {
            if !list.is_empty() {
                out.insert(CUSTOM_CATEGORY.to_string(), list);
            }
        }
        Some(TagInput::Map(map)) => {
            for (category, values) in map {
                if category == CUSTOM_CATEGORY {
                    if !values.is_empty() {
                        out.insert(category, values);
                    }
                } else if let Some(vocab) = vocabulary(&category) {
                    let kept: Vec<String> = values
                        .into_iter()
                        .filter(|v| vocab.contains(&v.as_str()))
                        .collect();
                    if !kept.is_empty() {
                        out.insert(category, kept);
                    }
                }
                // Unknown categories are dropped.
            }
        }
    }
    out
}

/// A message matches iff for every filter category it shares at least one
/// tag with the filter values: OR within a category, AND across categories.
/// An untagged message matches no non-empty filter set.
pub fn matches_filters(tags: &TagSet, filters: &TagSet) -> bool {
    if filters.is_empty() {
        return true;
    }
    if tags.is_empty() {
        return false;
    }
    filters.iter().all(|(category, wanted)| {
        tags.get(category)
            .map(|have| wanted.iter().any(|w| have.contains(w)))
            .unwrap_or(false)
    })
}

/// Split messages into (matching, rest), preserving arrival order.
pub fn partition_by_tags(
    messages: Vec<MessagePacket>,
    filters: &TagSet,
) -> (Vec<MessagePacket>, Vec<MessagePacket>) {
    let mut matching = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if matches_filters(&message.meta.tags, filters) {
            matching.push(message);
        } else {
            rest.push(message);
        }
    }
    (matching, rest)
}

/// Per-category, per-tag counts over a set of queued messages.
pub fn tag_histogram(messages: &[MessagePacket]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut histogram: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for message in messages {
        for (category, values) in &message.meta.tags {
            let bucket = histogram.entry(category.clone()).or_default();
            for value in values {
                *bucket.entry(value.clone()).or_insert(0) += 1;
            }
        }
    }
    histogram
}

/// The static taxonomy plus registered custom tags.
///
/// One instance lives on the server (surfaced by GET_TAG_CATEGORIES) and one
/// on each client for local composition.
#[derive(Debug, Default)]
pub struct TagTaxonomy {
    custom: RwLock<BTreeSet<String>>,
}

impl TagTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_custom_tag(&self, tag: &str) {
        if tag.is_empty() {
            return;
        }
        let mut custom = self.custom.write().expect("taxonomy lock");
        custom.insert(tag.to_string());
    }

    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let custom = self.custom.read().expect("taxonomy lock");
        let mut out = BTreeMap::new();
        out.insert(
            "priority".to_string(),
            PRIORITY_TAGS.iter().map(|t| t.to_string()).collect(),
        );
        out.insert(
            "category".to_string(),
            CATEGORY_TAGS.iter().map(|t| t.to_string()).collect(),
        );
        out.insert(
            "status".to_string(),
            STATUS_TAGS.iter().map(|t| t.to_string()).collect(),
        );
        out.insert(
            CUSTOM_CATEGORY.to_string(),
            custom.iter().cloned().collect(),
        );
        out
    }
}
