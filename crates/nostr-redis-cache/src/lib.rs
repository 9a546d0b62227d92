//! Redis-backed secondary cache for Nostr events and relay lists.
//!
//! Events fetched from relays are written to a key-value store with a fixed
//! expiration, and later subscriptions are answered from that store before
//! (or instead of) asking relays again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       NOSTR-REDIS-CACHE                          │
//! │                                                                  │
//! │  ┌─────────────────────┐       ┌─────────────────────┐          │
//! │  │   record            │       │   resolve           │          │
//! │  │   (write path)      │       │   (read path)       │          │
//! │  │                     │       │                     │          │
//! │  │ - SET id EX ttl     │       │ - authors × kinds   │          │
//! │  │ - HSET ak:.. event  │       │ - HGETALL ak:..     │          │
//! │  │ - EXPIRE ak:.. ttl  │       │ - GET id -> sink    │          │
//! │  └──────────┬──────────┘       └──────────┬──────────┘          │
//! │             │                             │                      │
//! │             ▼                             ▼                      │
//! │                     KvStore (Redis / memory)                     │
//! │             ▲                                                    │
//! │             │   save_relay_list / get_relay_list                 │
//! │             └── SADD / SMEMBERS rl:<pubkey>                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The author/kind index holds only the most recently recorded event id for
//! each pair. An index entry whose event has expired or was never written is
//! a miss, not an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use nostr_redis_cache::{CacheAdapter, CacheConfig, Filter, RedisCache};
//!
//! let cache = RedisCache::connect(CacheConfig::from_env()?).await?;
//! cache.record(&event, &Filter::new()).await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let filter = Filter::new().authors([event.pubkey.clone()]).kinds([event.kind]);
//! cache.resolve(&filter, &tx).await?;
//! ```
//!
//! # Traits
//!
//! - [`CacheAdapter`] - Resolve, record, and relay-list operations
//! - [`KvStore`] - The key-value primitives the cache runs on
//! - [`EventSink`] - Receiver of resolved events

mod cache;
mod config;
mod error;
mod events;
mod filter;
mod keys;
mod sink;
mod store;

pub use cache::{CacheAdapter, NostrCache, RedisCache};
pub use config::{CacheConfig, WriteMode, DEFAULT_EXPIRATION, DEFAULT_REDIS_URL};
pub use error::Error;
pub use events::{NostrEvent, NostrTag, KIND_RELAY_LIST, RELAY_TAG};
pub use filter::Filter;
pub use keys::{CacheKey, EVENT_FIELD};
pub use sink::{EventOrigin, EventSink, ReceivedEvent};
pub use store::{KvStore, MemoryStore, OpCounts, RedisStore, WriteOp};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
