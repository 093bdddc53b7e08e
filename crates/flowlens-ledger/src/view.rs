//! The derived view of one watched stream: root run, its scoped steps and
//! the nested step tree.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use flowlens_core::config::LedgerConfig;
use flowlens_core::event::FlowEvent;

use crate::catalog::NodeCatalog;
use crate::interpret::{interpret, OutputPreview};
use crate::linker::{link, SubRunLinks};
use crate::parser::{Ledger, RunStatus, RunSummary};
use crate::step::{Step, StepId, StepStatus};
use crate::tree::{build_step_tree, child_run_of, flatten, tree_run_ids, ExpansionState, StepTreeNode};

/// Overall state shown in the panel header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewStatus {
    #[default]
    Idle,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl ViewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step plus the links the panel needs to render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_run_id: Option<String>,
    /// Agent sub-run seen in traces, available before the agent completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_run_id: Option<String>,
}

/// Everything derived from the current event list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunView {
    pub root_run_id: Option<String>,
    pub status: ViewStatus,
    pub summary: Option<RunSummary>,
    /// Steps of the root run and its linked descendants, in arrival order.
    pub steps: Vec<StepView>,
    pub tree: Vec<StepTreeNode>,
    pub event_count: usize,
    #[serde(skip)]
    ledger: Ledger,
    #[serde(skip)]
    links: SubRunLinks,
}

/// The root run: most recent `flow_start` without a parent that is not a
/// known child run. Falls back to the first run id in the stream.
pub fn root_run_id<'a>(events: &'a [FlowEvent], links: &SubRunLinks) -> Option<&'a str> {
    events
        .iter()
        .rev()
        .filter(|e| e.is_root_start())
        .filter_map(FlowEvent::run_id)
        .find(|run| !links.is_child(run))
        .or_else(|| {
            events
                .iter()
                .filter_map(FlowEvent::run_id)
                .find(|run| !links.is_child(run))
        })
}

impl RunView {
    /// Full re-derivation from the event list.
    pub fn derive(events: &[FlowEvent], catalog: &NodeCatalog, config: &LedgerConfig) -> Self {
        let ledger = Ledger::parse(events, catalog, config);
        let links = link(events);
        let Some(root) = root_run_id(events, &links).map(str::to_string) else {
            return Self {
                event_count: events.len(),
                ledger,
                links,
                ..Default::default()
            };
        };

        let tree = build_step_tree(&root, &ledger, &links, config);
        let scope: HashSet<String> = tree_run_ids(&root, &ledger, &links, config).into_iter().collect();
        let steps: Vec<StepView> = ledger
            .steps()
            .iter()
            .filter(|s| scope.contains(&s.run_id))
            .map(|s| StepView {
                step: s.clone(),
                child_run_id: child_run_of(s, &links, config).map(str::to_string),
                agent_run_id: links.agent_run_of(&s.run_id, &s.node_id).map(str::to_string),
            })
            .collect();
        let summary = ledger.run_summary(&root).cloned();
        let status = view_status(summary.as_ref(), &ledger, &root, &steps);

        Self {
            root_run_id: Some(root),
            status,
            summary,
            steps,
            tree,
            event_count: events.len(),
            ledger,
            links,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepView> {
        self.steps.iter().find(|s| s.step.id == step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.step(step_id).is_some()
    }

    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.step(step_id).map(|s| s.step.status)
    }

    /// Last step of the root run itself.
    pub fn last_root_step(&self) -> Option<&StepView> {
        let root = self.root_run_id.as_deref()?;
        self.steps.iter().rev().find(|s| s.step.run_id == root)
    }

    /// Output preview of a step, when it has an interpretable output.
    pub fn preview(&self, step_id: &str) -> Option<OutputPreview> {
        self.step(step_id)?.step.output.as_ref().and_then(interpret)
    }

    /// Tree node by step id.
    pub fn tree_node(&self, step_id: &str) -> Option<&StepTreeNode> {
        flatten(&self.tree).into_iter().find(|n| n.step_id == step_id)
    }

    /// Ids of tree rows with children that are currently expanded.
    pub fn expanded_ids(&self, expansion: &ExpansionState) -> Vec<StepId> {
        flatten(&self.tree)
            .into_iter()
            .filter(|n| !n.children.is_empty())
            .filter(|n| expansion.is_expanded(n, self.status_of(&n.step_id)))
            .map(|n| n.step_id.clone())
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn links(&self) -> &SubRunLinks {
        &self.links
    }
}

fn view_status(summary: Option<&RunSummary>, ledger: &Ledger, root: &str, steps: &[StepView]) -> ViewStatus {
    match summary.map(|s| s.status) {
        Some(RunStatus::Completed) => ViewStatus::Completed,
        Some(RunStatus::Failed) => ViewStatus::Failed,
        Some(RunStatus::Cancelled) => ViewStatus::Cancelled,
        Some(RunStatus::Running) | None => {
            if steps.iter().any(|s| s.step.status == StepStatus::Waiting) {
                ViewStatus::Waiting
            } else if summary.is_some() || ledger.has_steps(root) {
                ViewStatus::Running
            } else {
                ViewStatus::Idle
            }
        }
    }
}

/// Keep `selected` while it still exists, otherwise fall back to the last
/// step of the root run.
pub fn resolve_selection(view: &RunView, selected: Option<&str>) -> Option<StepId> {
    match selected {
        Some(id) if view.contains(id) => Some(id.to_string()),
        _ => view.last_root_step().map(|s| s.step.id.clone()),
    }
}
