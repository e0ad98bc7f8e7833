use thiserror::Error;

/// Unified error type for the Quill pipeline.
///
/// Infrastructure faults only — a step failing against the model is workflow
/// DATA (an [`crate::state::ErrorInfo`] on the run state), not an `Err`.
#[derive(Error, Debug)]
pub enum QuillError {
    // ── Gateway errors ─────────────────────────────────────────
    #[error("model gateway error: {0}")]
    Gateway(String),

    #[error("gateway rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // ── Run / supervision errors ───────────────────────────────
    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("run cancelled")]
    Cancelled,

    #[error("progress channel closed")]
    ChannelClosed,

    // ── Persistence errors ─────────────────────────────────────
    #[error("persistence error: {0}")]
    Persistence(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QuillError>;
