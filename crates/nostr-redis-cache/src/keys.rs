//! Key namespace for everything the cache writes.
//!
//! | Key | Rendered as | Value |
//! |-----|-------------|-------|
//! | `Event` | `<event id>` | serialized event (string, TTL) |
//! | `AuthorKind` | `ak:<author>:<kind>` | hash `{ event: <event id> }` (TTL) |
//! | `RelayList` | `rl:<pubkey>` | set of serialized relay tags |
//!
//! `record` only accepts ids of 64 lowercase hex chars, so an event key never
//! collides with the prefixed families, and the prefixed families are
//! disjoint from each other for every kind number.

use std::fmt;

/// Field of the author/kind hash holding the latest event id.
pub const EVENT_FIELD: &str = "event";

const AUTHOR_KIND_PREFIX: &str = "ak";
const RELAY_LIST_PREFIX: &str = "rl";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey<'a> {
    Event(&'a str),
    AuthorKind { author: &'a str, kind: u16 },
    RelayList { pubkey: &'a str },
}

impl<'a> CacheKey<'a> {
    pub fn event(id: &'a str) -> Self {
        CacheKey::Event(id)
    }

    pub fn author_kind(author: &'a str, kind: u16) -> Self {
        CacheKey::AuthorKind { author, kind }
    }

    pub fn relay_list(pubkey: &'a str) -> Self {
        CacheKey::RelayList { pubkey }
    }
}

impl fmt::Display for CacheKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Event(id) => f.write_str(id),
            CacheKey::AuthorKind { author, kind } => {
                write!(f, "{AUTHOR_KIND_PREFIX}:{author}:{kind}")
            }
            CacheKey::RelayList { pubkey } => write!(f, "{RELAY_LIST_PREFIX}:{pubkey}"),
        }
    }
}
