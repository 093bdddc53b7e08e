pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod timestamp;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{LedgerConfig, AGENT_KIND, DEFAULT_MAX_DEPTH};
    pub use crate::control::{ControlAction, ControlMessage};
    pub use crate::error::{ArtifactError, EventError, FlowLensError, Result, SessionError};
    pub use crate::event::{decode_events, DecodedBatch, FlowEvent};
}
