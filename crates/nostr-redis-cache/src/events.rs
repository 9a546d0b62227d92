use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// Replaceable relay list metadata (NIP-65).
pub const KIND_RELAY_LIST: u16 = 10002;

/// Tag marker for relay records inside a relay list event.
pub const RELAY_TAG: &str = "r";

/// A single event tag, serialized as a flat string array (`["r", "wss://..."]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct NostrTag {
    pub name: String,
    pub values: Vec<String>,
}

impl NostrTag {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn from_sdk_tag(tag: &nostr_sdk::Tag) -> Self {
        Self::from(tag.clone().to_vec())
    }
}

impl From<Vec<String>> for NostrTag {
    fn from(parts: Vec<String>) -> Self {
        let mut parts = parts.into_iter();
        let name = parts.next().unwrap_or_default();
        Self {
            name,
            values: parts.collect(),
        }
    }
}

impl From<NostrTag> for Vec<String> {
    fn from(tag: NostrTag) -> Self {
        let mut parts = Vec::with_capacity(1 + tag.values.len());
        parts.push(tag.name);
        parts.extend(tag.values);
        parts
    }
}

/// Signed, content-addressed event in its NIP-01 wire form.
///
/// The cache never mutates an event; it stores and replays the exact
/// serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<NostrTag>,
    pub content: String,
    pub sig: String,
}

impl NostrEvent {
    pub fn from_event(event: &nostr_sdk::Event) -> Self {
        let tags = event.tags.iter().map(NostrTag::from_sdk_tag).collect();

        Self {
            id: event.id.to_string(),
            pubkey: event.pubkey.to_string(),
            created_at: event.created_at.as_secs(),
            kind: event.kind.as_u16(),
            tags,
            content: event.content.clone(),
            sig: event.sig.to_string(),
        }
    }

    /// Recompute the event id from the remaining fields.
    pub fn compute_id(&self) -> Result<String, Error> {
        let commitment = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let data = serde_json::to_vec(&commitment)?;
        Ok(hex::encode(Sha256::digest(&data)))
    }

    /// True when the id is 64 lowercase hex characters, the only shape the
    /// cache accepts as a bare key.
    pub fn has_hex_id(&self) -> bool {
        self.id.len() == 64
            && self
                .id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn has_valid_id(&self) -> bool {
        self.compute_id().map(|id| id == self.id).unwrap_or(false)
    }

    pub fn matching_tags<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NostrTag> + 'a {
        self.tags.iter().filter(move |tag| tag.name == name)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}
