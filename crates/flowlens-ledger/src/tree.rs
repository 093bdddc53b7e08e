//! Step tree: a run's steps with the steps of their sub-runs nested inline.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use flowlens_core::config::LedgerConfig;

use crate::linker::{infer_sub_run, SubRunLinks};
use crate::parser::Ledger;
use crate::step::{Step, StepId, StepStatus};

/// One row of the step tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTreeNode {
    pub step_id: StepId,
    pub depth: usize,
    #[serde(default)]
    pub children: Vec<StepTreeNode>,
    /// The linked child run, reported even when it was not expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_run_id: Option<String>,
}

/// Child run of a step: inferred from its output first, then the explicit
/// link. Agent-kind steps are never inferred from output; their nested
/// activity is shown through the agent trace instead.
pub fn child_run_of<'a>(step: &'a Step, links: &'a SubRunLinks, config: &LedgerConfig) -> Option<&'a str> {
    let inferred = if config.is_agent_kind(step.node_kind.as_deref()) {
        None
    } else {
        step.output.as_ref().and_then(infer_sub_run)
    };
    inferred.or_else(|| links.child_of(&step.run_id, &step.node_id))
}

/// Build the tree rooted at `root_run_id`.
///
/// A child run is expanded when it has steps, the current depth is below
/// `config.max_depth`, and it has not been expanded elsewhere in the tree.
/// The root run counts as expanded, so a link back to it is never followed.
pub fn build_step_tree(
    root_run_id: &str,
    ledger: &Ledger,
    links: &SubRunLinks,
    config: &LedgerConfig,
) -> Vec<StepTreeNode> {
    let mut visited = HashSet::from([root_run_id.to_string()]);
    build_level(root_run_id, 0, ledger, links, config, &mut visited)
}

fn build_level(
    run_id: &str,
    depth: usize,
    ledger: &Ledger,
    links: &SubRunLinks,
    config: &LedgerConfig,
    visited: &mut HashSet<String>,
) -> Vec<StepTreeNode> {
    ledger
        .steps_for_run(run_id)
        .into_iter()
        .map(|step| {
            let child_run_id = child_run_of(step, links, config).map(str::to_string);
            let mut children = Vec::new();
            if let Some(child) = child_run_id.as_deref() {
                if ledger.has_steps(child) && depth < config.max_depth && visited.insert(child.to_string()) {
                    children = build_level(child, depth + 1, ledger, links, config, visited);
                }
            }
            StepTreeNode {
                step_id: step.id.clone(),
                depth,
                children,
                child_run_id,
            }
        })
        .collect()
}

/// Nodes in display order (pre-order), regardless of expansion.
pub fn flatten(tree: &[StepTreeNode]) -> Vec<&StepTreeNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&StepTreeNode> = tree.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}

/// Every run reachable from `root_run_id` through links, root first.
///
/// Follows the same child resolution as the tree but without the depth
/// bound; each run is visited once.
pub fn tree_run_ids(
    root_run_id: &str,
    ledger: &Ledger,
    links: &SubRunLinks,
    config: &LedgerConfig,
) -> Vec<String> {
    let mut seen = HashSet::from([root_run_id.to_string()]);
    let mut order = vec![root_run_id.to_string()];
    let mut cursor = 0;
    while cursor < order.len() {
        let run_id = order[cursor].clone();
        cursor += 1;
        for step in ledger.steps_for_run(&run_id) {
            let agent = links.agent_run_of(&step.run_id, &step.node_id);
            let children = child_run_of(step, links, config).into_iter().chain(agent);
            for child in children {
                if seen.insert(child.to_string()) {
                    order.push(child.to_string());
                }
            }
        }
    }
    order
}

/// Expanded/collapsed state of tree rows.
///
/// An explicit choice recorded for a step id always wins. Without one, a
/// depth-0 row whose step is running or waiting is expanded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpansionState {
    explicit: HashMap<StepId, bool>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, node: &StepTreeNode, status: Option<StepStatus>) -> bool {
        match self.explicit.get(&node.step_id) {
            Some(&choice) => choice,
            None => node.depth == 0 && status.is_some_and(|s| s.is_open()),
        }
    }

    pub fn set(&mut self, step_id: impl Into<StepId>, expanded: bool) {
        self.explicit.insert(step_id.into(), expanded);
    }

    /// Flip the current state of a row and record it as an explicit choice.
    pub fn toggle(&mut self, node: &StepTreeNode, status: Option<StepStatus>) -> bool {
        let expanded = !self.is_expanded(node, status);
        self.set(node.step_id.clone(), expanded);
        expanded
    }

    /// The explicit choice for a step, if any.
    pub fn choice(&self, step_id: &str) -> Option<bool> {
        self.explicit.get(step_id).copied()
    }

    pub fn clear(&mut self) {
        self.explicit.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::event::FlowEvent;
    use serde_json::{json, Value};

    use crate::catalog::NodeCatalog;
    use crate::linker::link;

    fn ev(value: Value) -> FlowEvent {
        FlowEvent::from_value(value).unwrap()
    }

    fn derive(events: &[FlowEvent], config: &LedgerConfig) -> (Ledger, SubRunLinks) {
        (Ledger::parse(events, &NodeCatalog::new(), config), link(events))
    }

    /// run0 → run1 → ... → run{levels}, each run with one `call` node.
    fn chain(levels: usize) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        for i in 0..=levels {
            let run = format!("run{i}");
            events.push(ev(json!({"type": "node_start", "run_id": run, "node_id": "call"})));
            if i < levels {
                events.push(ev(json!({
                    "type": "subworkflow_update", "run_id": run, "node_id": "call",
                    "sub_run_id": format!("run{}", i + 1)
                })));
            }
        }
        events
    }

    fn max_depth(nodes: &[StepTreeNode]) -> usize {
        flatten(nodes).iter().map(|n| n.depth).max().unwrap_or(0)
    }

    #[test]
    fn nests_linked_child_steps() {
        let events = vec![
            ev(json!({"type": "node_start", "run_id": "root", "node_id": "call"})),
            ev(json!({"type": "subworkflow_update", "run_id": "root", "node_id": "call", "sub_run_id": "child"})),
            ev(json!({"type": "node_start", "run_id": "child", "node_id": "inner"})),
            ev(json!({"type": "node_complete", "run_id": "child", "node_id": "inner"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("root", &ledger, &links, &config);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].child_run_id.as_deref(), Some("child"));
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].step_id, "child:inner:2");
        assert_eq!(tree[0].children[0].depth, 1);
    }

    #[test]
    fn depth_is_bounded() {
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&chain(5), &config);
        let tree = build_step_tree("run0", &ledger, &links, &config);
        assert_eq!(max_depth(&tree), 3);
        let deepest = flatten(&tree).into_iter().find(|n| n.depth == 3).unwrap();
        assert!(deepest.children.is_empty());
        assert_eq!(deepest.child_run_id.as_deref(), Some("run4"));
    }

    #[test]
    fn custom_depth_limit() {
        let config = LedgerConfig::default().with_max_depth(1);
        let (ledger, links) = derive(&chain(5), &config);
        let tree = build_step_tree("run0", &ledger, &links, &config);
        assert_eq!(max_depth(&tree), 1);
    }

    #[test]
    fn cyclic_links_terminate() {
        let events = vec![
            ev(json!({"type": "node_start", "run_id": "x", "node_id": "a"})),
            ev(json!({"type": "node_start", "run_id": "y", "node_id": "b"})),
            ev(json!({"type": "subworkflow_update", "run_id": "x", "node_id": "a", "sub_run_id": "y"})),
            ev(json!({"type": "subworkflow_update", "run_id": "y", "node_id": "b", "sub_run_id": "x"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("x", &ledger, &links, &config);
        assert_eq!(flatten(&tree).len(), 2);
        assert_eq!(tree[0].children[0].child_run_id.as_deref(), Some("x"));
        assert!(tree[0].children[0].children.is_empty());
        assert_eq!(tree_run_ids("x", &ledger, &links, &config), vec!["x", "y"]);
    }

    #[test]
    fn run_expands_once_per_tree() {
        let events = vec![
            ev(json!({"type": "node_start", "run_id": "r", "node_id": "a"})),
            ev(json!({"type": "node_start", "run_id": "r", "node_id": "b"})),
            ev(json!({"type": "subworkflow_update", "run_id": "r", "node_id": "a", "sub_run_id": "c"})),
            ev(json!({"type": "subworkflow_update", "run_id": "r", "node_id": "b", "sub_run_id": "c"})),
            ev(json!({"type": "node_start", "run_id": "c", "node_id": "inner"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("r", &ledger, &links, &config);
        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[1].children.is_empty());
        assert_eq!(tree[1].child_run_id.as_deref(), Some("c"));
    }

    #[test]
    fn child_without_steps_is_not_expanded() {
        let events = vec![
            ev(json!({"type": "node_start", "run_id": "r", "node_id": "a"})),
            ev(json!({"type": "subworkflow_update", "run_id": "r", "node_id": "a", "sub_run_id": "empty"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("r", &ledger, &links, &config);
        assert!(tree[0].children.is_empty());
        assert_eq!(tree[0].child_run_id.as_deref(), Some("empty"));
    }

    #[test]
    fn output_shape_link_beats_explicit_link() {
        let events = vec![
            ev(json!({"type": "node_start", "run_id": "r", "node_id": "a"})),
            ev(json!({"type": "subworkflow_update", "run_id": "r", "node_id": "a", "sub_run_id": "old"})),
            ev(json!({"type": "node_complete", "run_id": "r", "node_id": "a",
                      "result": {"sub_run_id": "new", "child_output": {}}})),
            ev(json!({"type": "node_start", "run_id": "new", "node_id": "x"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("r", &ledger, &links, &config);
        assert_eq!(tree[0].child_run_id.as_deref(), Some("new"));
        assert_eq!(tree[0].children.len(), 1);
    }

    #[test]
    fn agent_output_is_not_inferred() {
        let events = vec![
            ev(json!({"type": "node_complete", "run_id": "r", "node_id": "a", "node_type": "agent",
                      "result": {"sub_run_id": "inner", "output": "x"}})),
            ev(json!({"type": "node_start", "run_id": "inner", "node_id": "x"})),
            ev(json!({"type": "trace_update", "run_id": "inner", "node_id": "a", "parent_run_id": "r"})),
        ];
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&events, &config);
        let tree = build_step_tree("r", &ledger, &links, &config);
        assert!(tree[0].child_run_id.is_none());
        // The agent run is still part of the run tree for scoping.
        assert_eq!(tree_run_ids("r", &ledger, &links, &config), vec!["r", "inner"]);
    }

    #[test]
    fn flatten_is_pre_order() {
        let config = LedgerConfig::default();
        let (ledger, links) = derive(&chain(2), &config);
        let tree = build_step_tree("run0", &ledger, &links, &config);
        let ids: Vec<_> = flatten(&tree).iter().map(|n| n.step_id.as_str()).collect();
        assert_eq!(ids, vec!["run0:call:0", "run1:call:2", "run2:call:4"]);
    }

    #[test]
    fn auto_expand_and_explicit_choice() {
        let node = StepTreeNode {
            step_id: "r:a:0".into(),
            depth: 0,
            children: vec![],
            child_run_id: None,
        };
        let nested = StepTreeNode { depth: 1, ..node.clone() };
        let mut state = ExpansionState::new();

        assert!(state.is_expanded(&node, Some(StepStatus::Running)));
        assert!(state.is_expanded(&node, Some(StepStatus::Waiting)));
        assert!(!state.is_expanded(&node, Some(StepStatus::Completed)));
        assert!(!state.is_expanded(&nested, Some(StepStatus::Running)));

        assert!(!state.toggle(&node, Some(StepStatus::Running)));
        assert!(!state.is_expanded(&node, Some(StepStatus::Running)));
        assert_eq!(state.choice("r:a:0"), Some(false));

        state.set("r:a:0", true);
        assert!(state.is_expanded(&node, Some(StepStatus::Completed)));
        state.clear();
        assert!(state.is_empty());
    }
}
