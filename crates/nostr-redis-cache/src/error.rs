use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid event id: {0:?}")]
    InvalidEventId(String),
    #[error("mutex poisoned")]
    MutexPoisoned,
}
