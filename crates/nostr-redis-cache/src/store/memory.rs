//! In-process [`KvStore`] with Redis semantics for expiry and value types.
//!
//! Deadlines use the tokio clock, so paused-time tests can step past a TTL
//! without sleeping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::{ErrorKind, RedisError};
use tokio::time::Instant;
use tracing::trace;

use super::{KvStore, WriteOp};
use crate::Error;

#[derive(Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

/// Snapshot of how many times each primitive was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub get: usize,
    pub set_ex: usize,
    pub hash_get_all: usize,
    pub hash_set: usize,
    pub expire: usize,
    pub set_add: usize,
    pub set_members: usize,
    pub atomic_batches: usize,
}

#[derive(Debug, Default)]
struct OpCounters {
    get: AtomicUsize,
    set_ex: AtomicUsize,
    hash_get_all: AtomicUsize,
    hash_set: AtomicUsize,
    expire: AtomicUsize,
    set_add: AtomicUsize,
    set_members: AtomicUsize,
    atomic_batches: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn wrong_type(key: &str) -> Error {
    Error::Redis(RedisError::from((
        ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
        key.to_string(),
    )))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    counters: OpCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op_counts(&self) -> OpCounts {
        let c = &self.counters;
        OpCounts {
            get: c.get.load(Ordering::SeqCst),
            set_ex: c.set_ex.load(Ordering::SeqCst),
            hash_get_all: c.hash_get_all.load(Ordering::SeqCst),
            hash_set: c.hash_set.load(Ordering::SeqCst),
            expire: c.expire.load(Ordering::SeqCst),
            set_add: c.set_add.load(Ordering::SeqCst),
            set_members: c.set_members.load(Ordering::SeqCst),
            atomic_batches: c.atomic_batches.load(Ordering::SeqCst),
        }
    }

    /// Remaining lifetime of a live key; `None` if absent or without expiry.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(live(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, Error> {
        let mut entries = self.lock()?;
        Ok(live(&mut entries, key, Instant::now()).is_some())
    }

    /// Drop a key as if the store had evicted it.
    pub fn remove(&self, key: &str) -> Result<bool, Error> {
        Ok(self.lock()?.remove(key).is_some())
    }

    pub fn key_count(&self) -> Result<usize, Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, Error> {
        self.entries.lock().map_err(|_| Error::MutexPoisoned)
    }
}

fn prune(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        trace!(key, "Expired key dropped");
        entries.remove(key);
    }
}

/// Live entry for `key`, dropping it first if its deadline has passed.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    prune(entries, key, now);
    entries.get_mut(key)
}

fn apply(entries: &mut HashMap<String, Entry>, op: WriteOp, now: Instant) -> Result<(), Error> {
    match op {
        WriteOp::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            entries.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: Some(now + Duration::from_secs(ttl_secs)),
                },
            );
        }
        WriteOp::HashSet { key, field, value } => {
            prune(entries, &key, now);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(fields) => {
                    fields.insert(field, value);
                }
                _ => return Err(wrong_type(&key)),
            }
        }
        WriteOp::Expire { key, ttl_secs } => {
            if ttl_secs == 0 {
                entries.remove(&key);
            } else if let Some(entry) = live(entries, &key, now) {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
            }
        }
        WriteOp::SetAdd { key, member } => {
            set_add(entries, &key, member, now)?;
        }
    }
    Ok(())
}

fn set_add(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    member: String,
    now: Instant,
) -> Result<bool, Error> {
    prune(entries, key, now);
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Set(HashSet::new()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Set(members) => Ok(members.insert(member)),
        _ => Err(wrong_type(key)),
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        bump(&self.counters.get);
        let mut entries = self.lock()?;
        match live(&mut entries, key, Instant::now()) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        bump(&self.counters.set_ex);
        let op = WriteOp::SetEx {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs,
        };
        let mut entries = self.lock()?;
        apply(&mut entries, op, Instant::now())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        bump(&self.counters.hash_get_all);
        let mut entries = self.lock()?;
        match live(&mut entries, key, Instant::now()) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), Error> {
        bump(&self.counters.hash_set);
        let op = WriteOp::HashSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        };
        let mut entries = self.lock()?;
        apply(&mut entries, op, Instant::now())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), Error> {
        bump(&self.counters.expire);
        let op = WriteOp::Expire {
            key: key.to_string(),
            ttl_secs,
        };
        let mut entries = self.lock()?;
        apply(&mut entries, op, Instant::now())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, Error> {
        bump(&self.counters.set_add);
        let mut entries = self.lock()?;
        set_add(&mut entries, key, member.to_string(), Instant::now())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, Error> {
        bump(&self.counters.set_members);
        let mut entries = self.lock()?;
        match live(&mut entries, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> Result<(), Error> {
        bump(&self.counters.atomic_batches);
        let now = Instant::now();
        let mut entries = self.lock()?;
        for op in ops {
            apply(&mut entries, op, now)?;
        }
        Ok(())
    }
}
