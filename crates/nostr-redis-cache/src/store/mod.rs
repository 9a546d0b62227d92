mod memory;
mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;

pub use memory::{MemoryStore, OpCounts};
pub use redis_store::RedisStore;

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    SetEx {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    Expire {
        key: String,
        ttl_secs: u64,
    },
    SetAdd {
        key: String,
        member: String,
    },
}

/// The key-value primitives the cache is built on.
///
/// Every method is a single round trip. Absent keys are empty results, never
/// errors; errors mean the store could not be reached or rejected the command.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), Error>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), Error>;
    /// Returns `true` when the member was not already present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, Error>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, Error>;
    /// Apply all writes as one transaction.
    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> Result<(), Error>;
}

#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        (**self).get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        (**self).set_ex(key, value, ttl_secs).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        (**self).hash_get_all(key).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), Error> {
        (**self).hash_set(key, field, value).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), Error> {
        (**self).expire(key, ttl_secs).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, Error> {
        (**self).set_add(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, Error> {
        (**self).set_members(key).await
    }

    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> Result<(), Error> {
        (**self).apply_atomic(ops).await
    }
}
