use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// Consumer loops and the trimmer catch these internally and log them; only
/// construction-time configuration errors and the publisher surface them to
/// callers (see `RivulexError::Config` and the publisher's `publish`/
/// `publish_batch`).
#[derive(Debug, Error)]
pub enum RivulexError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to decode stream record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
