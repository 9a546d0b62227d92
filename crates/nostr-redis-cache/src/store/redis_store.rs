use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::{KvStore, WriteOp};
use crate::Error;

/// [`KvStore`] backed by a Redis connection.
///
/// Clones share one multiplexed connection that reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to redis");
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn expire_arg(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs).unwrap_or(i64::MAX)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, expire_arg(ttl_secs)).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, Error> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn apply_atomic(&self, ops: Vec<WriteOp>) -> Result<(), Error> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                WriteOp::SetEx {
                    key,
                    value,
                    ttl_secs,
                } => {
                    pipe.set_ex(key, value, ttl_secs).ignore();
                }
                WriteOp::HashSet { key, field, value } => {
                    pipe.hset(key, field, value).ignore();
                }
                WriteOp::Expire { key, ttl_secs } => {
                    pipe.expire(key, expire_arg(ttl_secs)).ignore();
                }
                WriteOp::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
