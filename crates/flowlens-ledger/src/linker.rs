use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowlens_core::event::FlowEvent;

/// A node within a run: the parent side of a sub-run link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub run_id: String,
    pub node_id: String,
}

impl NodeKey {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.run_id, self.node_id)
    }
}

/// Parent → child run relationships observed in the event stream.
#[derive(Debug, Clone, Default)]
pub struct SubRunLinks {
    /// From `subworkflow_update`; last write wins per parent node.
    explicit: HashMap<NodeKey, String>,
    /// Agent sub-runs announced through `trace_update`.
    agent_runs: HashMap<NodeKey, String>,
    parents: HashMap<String, NodeKey>,
    /// Runs whose `flow_start` declared a parent.
    declared_children: HashSet<String>,
}

/// Scan the whole stream for sub-run linkage.
pub fn link(events: &[FlowEvent]) -> SubRunLinks {
    let mut links = SubRunLinks::default();
    for event in events {
        links.record(event);
    }
    links
}

impl SubRunLinks {
    /// Fold one event into the link tables.
    pub fn record(&mut self, event: &FlowEvent) {
        match event {
            FlowEvent::SubworkflowUpdate {
                run_id,
                node_id,
                sub_run_id,
            } => {
                if run_id.is_empty() || node_id.is_empty() || sub_run_id.is_empty() {
                    return;
                }
                let key = NodeKey::new(run_id.as_str(), node_id.as_str());
                if let Some(previous) = self.explicit.insert(key.clone(), sub_run_id.clone()) {
                    if previous != *sub_run_id {
                        tracing::debug!(parent = %key, %previous, child = %sub_run_id, "sub-run link replaced");
                    }
                }
                self.parents.insert(sub_run_id.clone(), key);
            }
            FlowEvent::TraceUpdate {
                run_id,
                node_id,
                parent_run_id: Some(parent),
                ..
            } => {
                if run_id.is_empty() || node_id.is_empty() || parent.is_empty() || parent == run_id {
                    return;
                }
                let key = NodeKey::new(parent.as_str(), node_id.as_str());
                self.agent_runs.insert(key.clone(), run_id.clone());
                self.parents.entry(run_id.clone()).or_insert(key);
            }
            FlowEvent::FlowStart {
                run_id,
                parent_run_id: Some(parent),
                ..
            } if !run_id.is_empty() && !parent.is_empty() => {
                self.declared_children.insert(run_id.clone());
            }
            _ => {}
        }
    }

    /// Child run spawned by `node_id` in `run_id` (explicit links only).
    pub fn child_of(&self, run_id: &str, node_id: &str) -> Option<&str> {
        self.explicit
            .get(&NodeKey::new(run_id, node_id))
            .map(String::as_str)
    }

    /// Active agent sub-run for `node_id` in `run_id`, as seen in traces.
    pub fn agent_run_of(&self, run_id: &str, node_id: &str) -> Option<&str> {
        self.agent_runs
            .get(&NodeKey::new(run_id, node_id))
            .map(String::as_str)
    }

    /// Parent node of a child run, when known.
    pub fn parent_of(&self, child_run_id: &str) -> Option<&NodeKey> {
        self.parents.get(child_run_id)
    }

    /// Whether `run_id` is known to have been spawned by another run.
    pub fn is_child(&self, run_id: &str) -> bool {
        self.parents.contains_key(run_id) || self.declared_children.contains(run_id)
    }

    /// Explicit links in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &str)> {
        self.explicit.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.explicit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty()
    }
}

/// Infer a child run from the shape of a node's output.
///
/// An output is treated as a sub-workflow invocation result when it carries
/// a `sub_run_id` together with a `child_output` or `output` key, either at
/// the top level or under `result`.
pub fn infer_sub_run(output: &Value) -> Option<&str> {
    fn handle(value: &Value) -> Option<&str> {
        let obj = value.as_object()?;
        let id = obj
            .get("sub_run_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?;
        (obj.contains_key("child_output") || obj.contains_key("output")).then_some(id)
    }
    handle(output).or_else(|| output.get("result").and_then(handle))
}
