use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowlens_core::control::ControlMessage;
use flowlens_ledger::catalog::NodeCatalog;
use flowlens_ledger::interpret::OutputPreview;
use flowlens_ledger::session::{ConnectionState, WatchSession};
use flowlens_ledger::step::StepId;
use flowlens_ledger::view::{RunView, ViewStatus};

use crate::artifacts::Artifact;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub target: String,
    /// Node id → node kind.
    #[serde(default)]
    pub node_kinds: Option<NodeCatalog>,
    /// Workflow graph (`{"nodes": [{"id", "type"}]}`) to read node kinds from.
    #[serde(default)]
    pub graph: Option<Value>,
}

impl CreateSessionRequest {
    /// Explicit `node_kinds` entries override kinds read from `graph`.
    pub fn catalog(&self) -> NodeCatalog {
        let mut catalog = self.graph.as_ref().map(NodeCatalog::from_graph).unwrap_or_default();
        if let Some(kinds) = &self.node_kinds {
            for (node_id, kind) in kinds.iter() {
                catalog.insert(node_id, kind);
            }
        }
        catalog
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub target: Option<String>,
    pub root_run_id: Option<String>,
    pub status: ViewStatus,
    pub event_count: usize,
    pub pending_messages: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    /// Events that could not be decoded.
    pub skipped: usize,
    /// Events refused because the view is frozen.
    pub rejected: usize,
    pub resets: usize,
}

/// What clients render: the derived view plus per-session UI state.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub view: RunView,
    pub selected: Option<StepId>,
    pub expanded: Vec<StepId>,
    pub connection: ConnectionState,
    pub generation: u64,
}

impl ViewSnapshot {
    pub fn of(session: &WatchSession) -> Self {
        Self {
            view: session.view().clone(),
            selected: session.selected().map(str::to_string),
            expanded: session.expanded_ids(),
            connection: session.connection().clone(),
            generation: session.generation(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub step_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpandRequest {
    pub step_id: String,
    /// Absent means toggle.
    #[serde(default)]
    pub expanded: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpandResponse {
    pub step_id: String,
    pub expanded: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub connected: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub queued: ControlMessage,
    pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub messages: Vec<ControlMessage>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub step_id: String,
    pub preview: Option<OutputPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_merges_catalogs() {
        let req: CreateSessionRequest = serde_json::from_value(json!({
            "target": "wf",
            "graph": {"nodes": [{"id": "a", "type": "llm"}, {"id": "b", "type": "agent"}]},
            "node_kinds": {"a": "agent"}
        }))
        .unwrap();
        let catalog = req.catalog();
        assert_eq!(catalog.kind_of("a"), Some("agent"));
        assert_eq!(catalog.kind_of("b"), Some("agent"));
    }

    #[test]
    fn create_request_minimal() {
        let req: CreateSessionRequest = serde_json::from_value(json!({"target": "wf"})).unwrap();
        assert!(req.catalog().is_empty());
    }

    #[test]
    fn expand_request_defaults_to_toggle() {
        let req: ExpandRequest = serde_json::from_value(json!({"step_id": "r:a:0"})).unwrap();
        assert!(req.expanded.is_none());
    }

    #[test]
    fn snapshot_serializes() {
        let session = WatchSession::new(NodeCatalog::new(), Default::default());
        let json = serde_json::to_value(ViewSnapshot::of(&session)).unwrap();
        assert_eq!(json["view"]["status"], "idle");
        assert_eq!(json["connection"]["connected"], true);
        assert_eq!(json["expanded"], json!([]));
    }
}
