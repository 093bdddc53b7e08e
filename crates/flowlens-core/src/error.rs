use thiserror::Error;

/// Top-level error type for flowlens.
///
/// The reconstruction engine itself never fails; these errors come from the
/// edges: decoding raw events, session bookkeeping and artifact recall.
#[derive(Debug, Error)]
pub enum FlowLensError {
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event is not a JSON object")]
    NotAnObject,

    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no active run")]
    NoActiveRun,

    #[error("session is frozen: {0}")]
    Frozen(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact source not configured")]
    NotConfigured,

    #[error("invalid artifact url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}")]
    Status { status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, FlowLensError>;
