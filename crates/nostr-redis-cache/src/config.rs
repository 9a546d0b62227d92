//! Configuration for the event cache.

use std::env;
use std::time::Duration;

use crate::Error;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";

/// Default lifetime of cached events and author/kind index entries.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(3600);

/// How the three writes of a recorded event reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Independent concurrent writes; a partial failure can leave a dangling
    /// index entry, which readers treat as a miss.
    #[default]
    Concurrent,
    /// One MULTI/EXEC transaction.
    Atomic,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub expiration: Duration,
    /// Optional lifetime for relay-list sets, refreshed on every save.
    pub relay_list_ttl: Option<Duration>,
    pub write_mode: WriteMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            expiration: DEFAULT_EXPIRATION,
            relay_list_ttl: None,
            write_mode: WriteMode::default(),
        }
    }
}

impl CacheConfig {
    /// Create configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `NOSTR_CACHE_REDIS_URL` - Redis URL (default: redis://127.0.0.1:6379/)
    /// - `NOSTR_CACHE_EXPIRATION_SECS` - Event lifetime in seconds (default: 3600)
    /// - `NOSTR_CACHE_RELAY_LIST_TTL_SECS` - Relay list lifetime (default: none)
    /// - `NOSTR_CACHE_ATOMIC_WRITES` - `1` or `true` to write in one transaction
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(url) = non_empty_var("NOSTR_CACHE_REDIS_URL") {
            config.redis_url = url;
        }

        if let Some(secs) = parse_secs("NOSTR_CACHE_EXPIRATION_SECS")? {
            if secs == 0 {
                return Err(Error::InvalidEnv {
                    var: "NOSTR_CACHE_EXPIRATION_SECS",
                    value: "0".to_string(),
                });
            }
            config.expiration = Duration::from_secs(secs);
        }

        config.relay_list_ttl = parse_secs("NOSTR_CACHE_RELAY_LIST_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        if let Some(value) = non_empty_var("NOSTR_CACHE_ATOMIC_WRITES") {
            config.write_mode = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => WriteMode::Atomic,
                "0" | "false" | "no" => WriteMode::Concurrent,
                _ => {
                    return Err(Error::InvalidEnv {
                        var: "NOSTR_CACHE_ATOMIC_WRITES",
                        value,
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_relay_list_ttl(mut self, ttl: Duration) -> Self {
        self.relay_list_ttl = Some(ttl);
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Expiration in whole seconds, never below one.
    pub(crate) fn expiration_secs(&self) -> u64 {
        self.expiration.as_secs().max(1)
    }
}

fn non_empty_var(var: &'static str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

fn parse_secs(var: &'static str) -> Result<Option<u64>, Error> {
    match non_empty_var(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
