use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node id → node kind lookup taken from the workflow graph being watched.
///
/// Events only carry a `node_type` for some node kinds, so the graph is the
/// primary source; the event's own `node_type` is the fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeCatalog {
    kinds: HashMap<String, String>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node_id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.insert(node_id, kind);
        self
    }

    pub fn insert(&mut self, node_id: impl Into<String>, kind: impl Into<String>) {
        self.kinds.insert(node_id.into(), kind.into());
    }

    pub fn kind_of(&self, node_id: &str) -> Option<&str> {
        self.kinds.get(node_id).map(String::as_str)
    }

    /// Catalog kind first, then the kind reported on the event.
    pub fn resolve(&self, node_id: &str, reported: Option<&str>) -> Option<String> {
        self.kind_of(node_id)
            .or(reported.filter(|k| !k.is_empty()))
            .map(str::to_string)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.kinds.iter().map(|(id, kind)| (id.as_str(), kind.as_str()))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Build a catalog from a graph definition of the form
    /// `{"nodes": [{"id": "...", "type": "..."}]}`. Nodes without both
    /// fields are skipped.
    pub fn from_graph(graph: &Value) -> Self {
        let mut catalog = Self::new();
        let nodes = graph.get("nodes").and_then(Value::as_array);
        for node in nodes.into_iter().flatten() {
            let id = node.get("id").and_then(Value::as_str);
            let kind = node
                .get("type")
                .and_then(Value::as_str)
                .or_else(|| node.get("data").and_then(|d| d.get("type")).and_then(Value::as_str));
            if let (Some(id), Some(kind)) = (id, kind) {
                catalog.insert(id, kind);
            }
        }
        catalog
    }
}

impl FromIterator<(String, String)> for NodeCatalog {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_wins_over_reported_kind() {
        let catalog = NodeCatalog::new().with_node("planner", "agent");
        assert_eq!(catalog.resolve("planner", Some("llm")).as_deref(), Some("agent"));
        assert_eq!(catalog.resolve("other", Some("llm")).as_deref(), Some("llm"));
        assert_eq!(catalog.resolve("other", Some("")), None);
        assert_eq!(catalog.resolve("other", None), None);
    }

    #[test]
    fn from_graph_reads_nodes() {
        let graph = json!({
            "nodes": [
                {"id": "a", "type": "agent"},
                {"id": "b", "data": {"type": "subworkflow"}},
                {"id": "c"},
                {"type": "llm"}
            ],
            "edges": []
        });
        let catalog = NodeCatalog::from_graph(&graph);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.kind_of("a"), Some("agent"));
        assert_eq!(catalog.kind_of("b"), Some("subworkflow"));
        assert!(NodeCatalog::from_graph(&json!({})).is_empty());
    }

    #[test]
    fn deserializes_as_plain_map() {
        let catalog: NodeCatalog = serde_json::from_value(json!({"x": "agent"})).unwrap();
        assert_eq!(catalog.kind_of("x"), Some("agent"));
    }
}
