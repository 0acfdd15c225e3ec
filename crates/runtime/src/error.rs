//! Error taxonomy for the fact-checking runtime (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("reservation of {requested} exceeds bucket capacity {capacity}")]
    ReservationTooLarge { requested: u64, capacity: u64 },

    #[error("llm call failed: {0}")]
    LlmCallFailure(String),

    #[error("rerank call failed: {0}")]
    RerankCallFailure(String),

    #[error("failed to parse model output: {0}")]
    ParseFailure(String),

    #[error("search daemon unavailable: {0}")]
    DaemonLost(String),

    #[error("tool invocation failed: {tool}: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
