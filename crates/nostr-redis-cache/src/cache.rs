use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::config::{CacheConfig, WriteMode};
use crate::events::{NostrEvent, NostrTag, RELAY_TAG};
use crate::filter::Filter;
use crate::keys::{CacheKey, EVENT_FIELD};
use crate::sink::{EventOrigin, EventSink};
use crate::store::{KvStore, RedisStore, WriteOp};
use crate::Error;

#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Emit every cached event matching the filter's authors × kinds to `sink`.
    ///
    /// Returns the number of events emitted. Filters without both an author
    /// set and a kind set are a miss by construction.
    async fn resolve(&self, filter: &Filter, sink: &dyn EventSink) -> Result<usize, Error>;
    /// Store an event and point its author/kind index entry at it.
    async fn record(&self, event: &NostrEvent, filter: &Filter) -> Result<(), Error>;
    async fn get_relay_list(&self, subject: &str) -> Result<Vec<NostrTag>, Error>;
    /// Add the relay tags of `event` to the subject's relay set.
    ///
    /// Returns the number of relay tags written.
    async fn save_relay_list(&self, subject: &str, event: &NostrEvent) -> Result<usize, Error>;
}

/// Event cache over any [`KvStore`].
///
/// Holds no state besides the injected store handle and its configuration.
#[derive(Clone)]
pub struct NostrCache<S> {
    store: S,
    config: CacheConfig,
}

pub type RedisCache = NostrCache<RedisStore>;

impl NostrCache<RedisStore> {
    pub async fn connect(config: CacheConfig) -> Result<Self, Error> {
        let store = RedisStore::connect(&config.redis_url).await?;
        Ok(Self::new(store, config))
    }
}

impl<S: KvStore> NostrCache<S> {
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resolve one author/kind pair. Every kind of miss is `Ok(None)`.
    async fn lookup(&self, author: &str, kind: u16) -> Result<Option<NostrEvent>, Error> {
        let index_key = CacheKey::author_kind(author, kind).to_string();
        let fields = self.store.hash_get_all(&index_key).await?;
        let Some(event_id) = fields.get(EVENT_FIELD) else {
            return Ok(None);
        };

        let Some(body) = self.store.get(&CacheKey::event(event_id).to_string()).await? else {
            debug!(key = %index_key, event_id = %event_id, "Dangling author/kind index entry");
            return Ok(None);
        };

        match serde_json::from_str::<NostrEvent>(&body) {
            Ok(event) => Ok(Some(event)),
            Err(err) => {
                warn!(event_id = %event_id, error = %err, "Malformed cached event");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S: KvStore> CacheAdapter for NostrCache<S> {
    async fn resolve(&self, filter: &Filter, sink: &dyn EventSink) -> Result<usize, Error> {
        let Some(pairs) = filter.author_kind_pairs() else {
            debug!("Filter lacks authors or kinds, skipping cache");
            return Ok(0);
        };
        debug!(lookups = pairs.len(), "Resolving filter from cache");

        let mut lookups: FuturesUnordered<_> = pairs
            .into_iter()
            .map(|(author, kind)| self.lookup(author, kind))
            .collect();

        let mut hits = 0;
        while let Some(result) = lookups.next().await {
            if let Some(event) = result? {
                debug!(event_id = %event.id, "Cache hit");
                sink.event_received(event, EventOrigin::Cache);
                hits += 1;
            }
        }
        Ok(hits)
    }

    // The index is keyed by the event's own author and kind; the filter it
    // was fetched under does not shape the key.
    async fn record(&self, event: &NostrEvent, _filter: &Filter) -> Result<(), Error> {
        // Event ids are written as bare keys; anything but hex could land in
        // a prefixed family.
        if !event.has_hex_id() {
            return Err(Error::InvalidEventId(event.id.clone()));
        }

        let body = event.to_json()?;
        let event_key = CacheKey::event(&event.id).to_string();
        let index_key = CacheKey::author_kind(&event.pubkey, event.kind).to_string();
        let ttl_secs = self.config.expiration_secs();

        debug!(event_id = %event.id, key = %index_key, "Recording event");

        match self.config.write_mode {
            WriteMode::Concurrent => {
                // Polled in order, so on one multiplexed connection EXPIRE
                // reaches the server after HSET has created the key.
                let (stored, indexed, refreshed) = futures::join!(
                    self.store.set_ex(&event_key, &body, ttl_secs),
                    self.store.hash_set(&index_key, EVENT_FIELD, &event.id),
                    self.store.expire(&index_key, ttl_secs),
                );
                stored?;
                indexed?;
                refreshed?;
            }
            WriteMode::Atomic => {
                self.store
                    .apply_atomic(vec![
                        WriteOp::SetEx {
                            key: event_key,
                            value: body,
                            ttl_secs,
                        },
                        WriteOp::HashSet {
                            key: index_key.clone(),
                            field: EVENT_FIELD.to_string(),
                            value: event.id.clone(),
                        },
                        WriteOp::Expire {
                            key: index_key,
                            ttl_secs,
                        },
                    ])
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_relay_list(&self, subject: &str) -> Result<Vec<NostrTag>, Error> {
        let key = CacheKey::relay_list(subject).to_string();
        let members = self.store.set_members(&key).await?;

        let tags = members
            .into_iter()
            .filter_map(|member| match serde_json::from_str::<NostrTag>(&member) {
                Ok(tag) => Some(tag),
                Err(err) => {
                    warn!(key = %key, error = %err, "Malformed relay list member");
                    None
                }
            })
            .collect();
        Ok(tags)
    }

    async fn save_relay_list(&self, subject: &str, event: &NostrEvent) -> Result<usize, Error> {
        let key = CacheKey::relay_list(subject).to_string();
        let members = event
            .matching_tags(RELAY_TAG)
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(key = %key, relays = members.len(), "Saving relay list");

        let written = members.len();
        if written == 0 {
            return Ok(0);
        }
        let ttl_secs = self.config.relay_list_ttl.map(|ttl| ttl.as_secs().max(1));

        match self.config.write_mode {
            WriteMode::Concurrent => {
                let results =
                    join_all(members.iter().map(|member| self.store.set_add(&key, member))).await;
                for result in results {
                    result?;
                }
                if let Some(ttl_secs) = ttl_secs {
                    self.store.expire(&key, ttl_secs).await?;
                }
            }
            WriteMode::Atomic => {
                let mut ops: Vec<WriteOp> = members
                    .into_iter()
                    .map(|member| WriteOp::SetAdd {
                        key: key.clone(),
                        member,
                    })
                    .collect();
                if let Some(ttl_secs) = ttl_secs {
                    ops.push(WriteOp::Expire { key, ttl_secs });
                }
                self.store.apply_atomic(ops).await?;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use redis::{ErrorKind, RedisError};
    use tokio::sync::mpsc;

    use super::*;
    use crate::events::KIND_RELAY_LIST;
    use crate::sink::ReceivedEvent;
    use crate::store::MemoryStore;

    const ALICE: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
    const BOB: &str = "b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2";

    fn event(pubkey: &str, kind: u16, content: &str, tags: Vec<NostrTag>) -> NostrEvent {
        let mut event = NostrEvent {
            id: String::new(),
            pubkey: pubkey.to_string(),
            created_at: 1_700_000_000,
            kind,
            tags,
            content: content.to_string(),
            sig: "00".repeat(64),
        };
        event.id = event.compute_id().unwrap();
        event
    }

    fn relay_tag(url: &str) -> NostrTag {
        NostrTag::new("r", vec![url.to_string()])
    }

    fn memory_cache(config: CacheConfig) -> (Arc<MemoryStore>, NostrCache<Arc<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let cache = NostrCache::new(Arc::clone(&store), config);
        (store, cache)
    }

    async fn resolve_all<S: KvStore>(
        cache: &NostrCache<S>,
        filter: &Filter,
    ) -> Result<Vec<ReceivedEvent>, Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hits = cache.resolve(filter, &tx).await?;
        drop(tx);

        let mut received = Vec::new();
        while let Some(item) = rx.recv().await {
            received.push(item);
        }
        assert_eq!(received.len(), hits);
        Ok(received)
    }

    fn connection_refused() -> Error {
        Error::Redis(RedisError::from((ErrorKind::IoError, "connection refused")))
    }

    /// Delegates to a [`MemoryStore`] but can fail selected primitives.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_set_ex: bool,
        fail_reads: bool,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            if self.fail_reads {
                return Err(connection_refused());
            }
            self.inner.get(key).await
        }

        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
            if self.fail_set_ex {
                return Err(connection_refused());
            }
            self.inner.set_ex(key, value, ttl_secs).await
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error> {
            if self.fail_reads {
                return Err(connection_refused());
            }
            self.inner.hash_get_all(key).await
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), Error> {
            self.inner.hash_set(key, field, value).await
        }

        async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), Error> {
            self.inner.expire(key, ttl_secs).await
        }

        async fn set_add(&self, key: &str, member: &str) -> Result<bool, Error> {
            self.inner.set_add(key, member).await
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>, Error> {
            self.inner.set_members(key).await
        }

        async fn apply_atomic(&self, ops: Vec<WriteOp>) -> Result<(), Error> {
            self.inner.apply_atomic(ops).await
        }
    }

    #[tokio::test]
    async fn test_record_then_resolve_emits_cached_event() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let note = event(ALICE, 1, "hello", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        cache.record(&note, &filter).await.unwrap();
        let received = resolve_all(&cache, &filter).await.unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, note);
        assert_eq!(received[0].origin, EventOrigin::Cache);
        assert!(received[0].origin.is_cached());
    }

    #[tokio::test]
    async fn test_record_sets_ttl_on_event_and_index() {
        let config = CacheConfig::default().with_expiration(Duration::from_secs(90));
        let (store, cache) = memory_cache(config);
        let note = event(ALICE, 1, "hello", vec![]);

        cache.record(&note, &Filter::new()).await.unwrap();

        let index_key = CacheKey::author_kind(ALICE, 1).to_string();
        assert!(store.ttl(&note.id).unwrap().is_some());
        assert!(store.ttl(&index_key).unwrap().is_some());
        let counts = store.op_counts();
        assert_eq!((counts.set_ex, counts.hash_set, counts.expire), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_underspecified_filter_does_no_lookups() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let note = event(ALICE, 1, "hello", vec![]);
        cache.record(&note, &Filter::new()).await.unwrap();

        for filter in [
            Filter::new().authors([ALICE]),
            Filter::new().kinds([1]),
            Filter::new(),
        ] {
            assert!(resolve_all(&cache, &filter).await.unwrap().is_empty());
        }

        let counts = store.op_counts();
        assert_eq!(counts.hash_get_all, 0);
        assert_eq!(counts.get, 0);
    }

    #[tokio::test]
    async fn test_dangling_index_entry_is_a_miss() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let note = event(ALICE, 1, "hello", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);
        cache.record(&note, &filter).await.unwrap();

        assert!(store.remove(&note.id).unwrap());

        let received = resolve_all(&cache, &filter).await.unwrap();
        assert!(received.is_empty());
        assert!(store.contains_key(&CacheKey::author_kind(ALICE, 1).to_string()).unwrap());
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let note = event(ALICE, 1, "hello", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        cache.record(&note, &filter).await.unwrap();
        cache.record(&note, &filter).await.unwrap();

        assert_eq!(store.key_count().unwrap(), 2);
        let received = resolve_all(&cache, &filter).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, note);
    }

    #[tokio::test]
    async fn test_last_write_wins_per_author_kind() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let first = event(ALICE, 0, "old profile", vec![]);
        let second = event(ALICE, 0, "new profile", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([0]);

        cache.record(&first, &filter).await.unwrap();
        cache.record(&second, &filter).await.unwrap();

        let received = resolve_all(&cache, &filter).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event.content, "new profile");
    }

    #[tokio::test]
    async fn test_only_recorded_kind_is_returned() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let note = event(ALICE, 1, "kind one", vec![]);
        cache.record(&note, &Filter::new()).await.unwrap();

        let filter = Filter::new().authors([ALICE]).kinds([1, 2]);
        let received = resolve_all(&cache, &filter).await.unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event.kind, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_event_is_not_resolved() {
        let config = CacheConfig::default().with_expiration(Duration::from_secs(1));
        let (store, cache) = memory_cache(config);
        let note = event(ALICE, 1, "short lived", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        cache.record(&note, &filter).await.unwrap();
        assert_eq!(resolve_all(&cache, &filter).await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert!(resolve_all(&cache, &filter).await.unwrap().is_empty());
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookups_scale_with_cross_product() {
        let (store, cache) = memory_cache(CacheConfig::default());
        cache
            .record(&event(BOB, 2, "bob", vec![]), &Filter::new())
            .await
            .unwrap();

        let filter = Filter::new().authors([ALICE, BOB]).kinds([1, 2]);
        let received = resolve_all(&cache, &filter).await.unwrap();

        assert_eq!(received.len(), 1);
        let counts = store.op_counts();
        assert_eq!(counts.hash_get_all, 4);
        assert_eq!(counts.get, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_abort_batch() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let note = event(BOB, 1, "fine", vec![]);
        cache.record(&note, &Filter::new()).await.unwrap();

        let bogus_id = "ff".repeat(32);
        store.set_ex(&bogus_id, "{not json", 60).await.unwrap();
        store
            .hash_set(&CacheKey::author_kind(ALICE, 1).to_string(), EVENT_FIELD, &bogus_id)
            .await
            .unwrap();

        let filter = Filter::new().authors([ALICE, BOB]).kinds([1]);
        let received = resolve_all(&cache, &filter).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, note);
    }

    #[tokio::test]
    async fn test_partial_write_leaves_a_miss() {
        let store = Arc::new(FlakyStore {
            fail_set_ex: true,
            ..Default::default()
        });
        let cache = NostrCache::new(Arc::clone(&store), CacheConfig::default());
        let note = event(ALICE, 1, "lost", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        assert!(matches!(cache.record(&note, &filter).await, Err(Error::Redis(_))));

        // The index entry landed even though the event body did not.
        let fields = store
            .inner
            .hash_get_all(&CacheKey::author_kind(ALICE, 1).to_string())
            .await
            .unwrap();
        assert_eq!(fields.get(EVENT_FIELD), Some(&note.id));

        assert!(resolve_all(&cache, &filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_fails_resolve() {
        let store = FlakyStore {
            fail_reads: true,
            ..Default::default()
        };
        let cache = NostrCache::new(store, CacheConfig::default());
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        assert!(resolve_all(&cache, &filter).await.is_err());
    }

    #[tokio::test]
    async fn test_atomic_write_mode() {
        let config = CacheConfig::default().with_write_mode(WriteMode::Atomic);
        let (store, cache) = memory_cache(config);
        let note = event(ALICE, 1, "atomic", vec![]);
        let filter = Filter::new().authors([ALICE]).kinds([1]);

        cache.record(&note, &filter).await.unwrap();

        let counts = store.op_counts();
        assert_eq!(counts.atomic_batches, 1);
        assert_eq!(counts.set_ex + counts.hash_set + counts.expire, 0);
        assert!(store.ttl(&CacheKey::author_kind(ALICE, 1).to_string()).unwrap().is_some());
        assert_eq!(resolve_all(&cache, &filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relay_list_set_semantics() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let first = event(
            ALICE,
            KIND_RELAY_LIST,
            "",
            vec![relay_tag("wss://relay.one"), NostrTag::new("p", vec![BOB.to_string()])],
        );

        assert_eq!(cache.save_relay_list(ALICE, &first).await.unwrap(), 1);
        cache.save_relay_list(ALICE, &first).await.unwrap();
        assert_eq!(cache.get_relay_list(ALICE).await.unwrap().len(), 1);

        let second = event(ALICE, KIND_RELAY_LIST, "", vec![relay_tag("wss://relay.two")]);
        cache.save_relay_list(ALICE, &second).await.unwrap();

        let mut relays = cache.get_relay_list(ALICE).await.unwrap();
        relays.sort_by(|a, b| a.values.cmp(&b.values));
        assert_eq!(relays, vec![relay_tag("wss://relay.one"), relay_tag("wss://relay.two")]);
        assert!(cache.get_relay_list(BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relay_list_uniqueness_is_byte_level() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let list = event(ALICE, KIND_RELAY_LIST, "", vec![relay_tag("wss://relay.one")]);
        cache.save_relay_list(ALICE, &list).await.unwrap();

        let key = CacheKey::relay_list(ALICE).to_string();
        store.set_add(&key, r#"["r", "wss://relay.one"]"#).await.unwrap();
        store.set_add(&key, "not a tag").await.unwrap();

        let relays = cache.get_relay_list(ALICE).await.unwrap();
        assert_eq!(relays, vec![relay_tag("wss://relay.one"), relay_tag("wss://relay.one")]);
    }

    #[tokio::test]
    async fn test_relay_list_kind_does_not_collide_with_index() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let list = event(ALICE, KIND_RELAY_LIST, "", vec![relay_tag("wss://relay.one")]);

        cache.record(&list, &Filter::new()).await.unwrap();
        cache.save_relay_list(ALICE, &list).await.unwrap();

        let filter = Filter::new().authors([ALICE]).kinds([KIND_RELAY_LIST]);
        assert_eq!(resolve_all(&cache, &filter).await.unwrap().len(), 1);
        assert_eq!(cache.get_relay_list(ALICE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_rejects_non_hex_id() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let mut forged = event(ALICE, 1, "forged", vec![]);
        forged.id = CacheKey::relay_list(ALICE).to_string();

        assert!(matches!(
            cache.record(&forged, &Filter::new()).await,
            Err(Error::InvalidEventId(id)) if id == forged.id
        ));
        assert_eq!(store.key_count().unwrap(), 0);

        let list = event(ALICE, KIND_RELAY_LIST, "", vec![relay_tag("wss://relay.one")]);
        assert_eq!(cache.save_relay_list(ALICE, &list).await.unwrap(), 1);
        assert_eq!(cache.get_relay_list(ALICE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_atomic_relay_list_save() {
        let config = CacheConfig::default()
            .with_write_mode(WriteMode::Atomic)
            .with_relay_list_ttl(Duration::from_secs(600));
        let (store, cache) = memory_cache(config);
        let list = event(
            ALICE,
            KIND_RELAY_LIST,
            "",
            vec![relay_tag("wss://relay.one"), relay_tag("wss://relay.two")],
        );

        assert_eq!(cache.save_relay_list(ALICE, &list).await.unwrap(), 2);
        let empty = event(ALICE, KIND_RELAY_LIST, "none", vec![]);
        assert_eq!(cache.save_relay_list(ALICE, &empty).await.unwrap(), 0);

        let counts = store.op_counts();
        assert_eq!(counts.atomic_batches, 1);
        assert_eq!((counts.set_add, counts.expire), (0, 0));
        assert!(store.ttl(&CacheKey::relay_list(ALICE).to_string()).unwrap().is_some());
        assert_eq!(cache.get_relay_list(ALICE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_relay_list_ttl() {
        let (store, cache) = memory_cache(CacheConfig::default());
        let list = event(ALICE, KIND_RELAY_LIST, "", vec![relay_tag("wss://relay.one")]);
        cache.save_relay_list(ALICE, &list).await.unwrap();
        let key = CacheKey::relay_list(ALICE).to_string();
        assert_eq!(store.ttl(&key).unwrap(), None);

        let config = CacheConfig::default().with_relay_list_ttl(Duration::from_secs(600));
        let cache = NostrCache::new(Arc::clone(&store), config);
        cache.save_relay_list(ALICE, &list).await.unwrap();
        assert!(store.ttl(&key).unwrap().is_some());
    }
}
