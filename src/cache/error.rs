use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Cache payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Cache store did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cache store unavailable: {0}")]
    Unavailable(String),
}
