//! Event ledger: folds the chronological event stream into per-run step
//! lists.
//!
//! Terminal events are matched to their start through `open_by_node`, keyed
//! by `(run_id, node_id)`. A second start for the same key before its
//! completion replaces the open entry, so the next terminal event resolves
//! the most recently opened step. `flow_waiting` keeps the entry open so a
//! later completion still lands on the same step.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowlens_core::config::LedgerConfig;
use flowlens_core::event::FlowEvent;

use crate::catalog::NodeCatalog;
use crate::linker::NodeKey;
use crate::metrics::merge_metrics_prefer_longer;
use crate::step::{
    provider_model, step_id, sub_run_id_of, Step, StepId, StepMetrics, StepStatus, WaitingInfo,
};

/// Terminal state of a run as reported by run-level events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level information kept beside the steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    #[serde(default)]
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub metrics: Option<StepMetrics>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Reconstructed steps for every run seen in a stream.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    steps: Vec<Step>,
    by_run: HashMap<String, Vec<usize>>,
    by_id: HashMap<StepId, usize>,
    open_by_node: HashMap<NodeKey, usize>,
    runs: Vec<String>,
    summaries: HashMap<String, RunSummary>,
    catalog: NodeCatalog,
    config: LedgerConfig,
    arrival: usize,
}

impl Ledger {
    pub fn new(catalog: NodeCatalog, config: LedgerConfig) -> Self {
        Self {
            catalog,
            config,
            ..Default::default()
        }
    }

    /// Fold a complete event list.
    pub fn parse(events: &[FlowEvent], catalog: &NodeCatalog, config: &LedgerConfig) -> Self {
        let mut ledger = Self::new(catalog.clone(), config.clone());
        for event in events {
            ledger.apply(event);
        }
        ledger
    }

    /// Fold one event. Events must be applied in arrival order.
    pub fn apply(&mut self, event: &FlowEvent) {
        let index = self.arrival;
        self.arrival += 1;

        match event {
            FlowEvent::FlowStart {
                run_id,
                parent_run_id,
                ts,
            } => {
                if run_id.is_empty() {
                    return;
                }
                let summary = self.summary_mut(run_id);
                if let Some(parent) = parent_run_id.as_ref().filter(|p| !p.is_empty()) {
                    summary.parent_run_id = Some(parent.clone());
                }
                summary.started_at = ts.or(summary.started_at);
            }
            FlowEvent::FlowComplete { run_id, meta, ts } => {
                if run_id.is_empty() {
                    return;
                }
                let summary = self.summary_mut(run_id);
                summary.status = RunStatus::Completed;
                summary.metrics = meta.as_ref().and_then(StepMetrics::from_meta);
                summary.meta = meta.clone();
                summary.ended_at = ts.or(summary.ended_at);
            }
            FlowEvent::FlowCancelled { run_id, ts } => {
                if run_id.is_empty() {
                    return;
                }
                let summary = self.summary_mut(run_id);
                summary.status = RunStatus::Cancelled;
                summary.ended_at = ts.or(summary.ended_at);
            }
            FlowEvent::NodeStart {
                run_id,
                node_id,
                node_type,
                ts,
            } => {
                if run_id.is_empty() || node_id.is_empty() {
                    tracing::debug!(index, "node_start without run or node id ignored");
                    return;
                }
                self.start_step(index, run_id, node_id, node_type.as_deref(), *ts);
            }
            FlowEvent::NodeComplete {
                run_id,
                node_id,
                node_type,
                result,
                meta,
                ts,
            } => {
                if run_id.is_empty() || node_id.is_empty() {
                    tracing::debug!(index, "node_complete without run or node id ignored");
                    return;
                }
                self.complete_step(
                    index,
                    run_id,
                    node_id,
                    node_type.as_deref(),
                    result.as_ref(),
                    meta.as_ref(),
                    *ts,
                );
            }
            FlowEvent::FlowWaiting {
                run_id,
                node_id,
                prompt,
                choices,
                allow_free_text,
                wait_key,
                reason,
                ts,
            } => {
                if run_id.is_empty() {
                    return;
                }
                let waiting = WaitingInfo {
                    prompt: prompt.clone(),
                    choices: choices.clone(),
                    allow_free_text: *allow_free_text,
                    wait_key: wait_key.clone(),
                    reason: reason.clone(),
                };
                let node = node_id.as_deref().filter(|n| !n.is_empty());
                self.wait_step(index, run_id, node, waiting, *ts);
            }
            FlowEvent::FlowError { run_id, node_id, ts, .. } => {
                let message = event.error_message().unwrap_or_default();
                let node = node_id.as_deref().filter(|n| !n.is_empty());
                self.fail_step(index, run_id, node, message, *ts);
            }
            FlowEvent::SubworkflowUpdate { .. } | FlowEvent::TraceUpdate { .. } | FlowEvent::Unknown => {}
        }
    }

    fn start_step(
        &mut self,
        index: usize,
        run_id: &str,
        node_id: &str,
        node_type: Option<&str>,
        ts: Option<DateTime<Utc>>,
    ) {
        let kind = self.catalog.resolve(node_id, node_type);
        let step = Step::running(step_id(run_id, node_id, index), run_id, node_id, kind, ts);
        let idx = self.push_step(step);
        if let Some(previous) = self.open_by_node.insert(NodeKey::new(run_id, node_id), idx) {
            tracing::debug!(
                run_id,
                node_id,
                superseded = %self.steps[previous].id,
                "overlapping start, latest start resolves next terminal event"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn complete_step(
        &mut self,
        index: usize,
        run_id: &str,
        node_id: &str,
        node_type: Option<&str>,
        result: Option<&Value>,
        meta: Option<&Value>,
        ts: Option<DateTime<Utc>>,
    ) {
        let metrics = meta.and_then(StepMetrics::from_meta);
        let (provider, model) = provider_model(meta);

        if let Some(idx) = self.open_by_node.remove(&NodeKey::new(run_id, node_id)) {
            let step = &mut self.steps[idx];
            step.status = StepStatus::Completed;
            step.output = result.cloned();
            step.metrics = metrics;
            step.provider = provider;
            step.model = model;
            step.ended_at = ts;
            if step.node_kind.is_none() {
                step.node_kind = self.catalog.resolve(node_id, node_type);
            }
            return;
        }

        let kind = self.catalog.resolve(node_id, node_type);
        if self.config.is_dedup_kind(kind.as_deref()) {
            let sub_run = result.and_then(sub_run_id_of);
            if let Some(sub_run) = sub_run {
                if let Some(idx) = self.find_duplicate(run_id, node_id, sub_run) {
                    tracing::debug!(run_id, node_id, sub_run, step = %self.steps[idx].id, "merging duplicate completion");
                    let step = &mut self.steps[idx];
                    if let Some(output) = result {
                        step.output = Some(output.clone());
                    }
                    step.metrics = merge_metrics_prefer_longer(step.metrics.as_ref(), metrics.as_ref());
                    step.provider = provider.or(step.provider.take());
                    step.model = model.or(step.model.take());
                    step.ended_at = ts.or(step.ended_at);
                    return;
                }
            }
        }

        tracing::debug!(run_id, node_id, index, "completion without open start, synthesizing step");
        let mut step = Step::running(step_id(run_id, node_id, index), run_id, node_id, kind, None);
        step.status = StepStatus::Completed;
        step.output = result.cloned();
        step.metrics = metrics;
        step.provider = provider;
        step.model = model;
        step.ended_at = ts;
        self.push_step(step);
    }

    /// Most recent completed step of `node_id` whose output carries `sub_run`.
    fn find_duplicate(&self, run_id: &str, node_id: &str, sub_run: &str) -> Option<usize> {
        self.by_run.get(run_id)?.iter().rev().copied().find(|&idx| {
            let step = &self.steps[idx];
            step.node_id == node_id
                && step.status == StepStatus::Completed
                && step.output_sub_run_id() == Some(sub_run)
        })
    }

    fn wait_step(
        &mut self,
        index: usize,
        run_id: &str,
        node_id: Option<&str>,
        waiting: WaitingInfo,
        ts: Option<DateTime<Utc>>,
    ) {
        let Some(node_id) = node_id else {
            let target = self.by_run.get(run_id).and_then(|idxs| {
                idxs.iter()
                    .rev()
                    .copied()
                    .find(|&i| self.steps[i].status == StepStatus::Running)
            });
            match target {
                Some(idx) => {
                    let step = &mut self.steps[idx];
                    step.status = StepStatus::Waiting;
                    step.waiting = Some(waiting);
                }
                None => tracing::debug!(run_id, "flow_waiting without node context and no running step"),
            }
            return;
        };

        let key = NodeKey::new(run_id, node_id);
        if let Some(&idx) = self.open_by_node.get(&key) {
            let step = &mut self.steps[idx];
            step.status = StepStatus::Waiting;
            step.waiting = Some(waiting);
            return;
        }

        tracing::debug!(run_id, node_id, index, "waiting without open start, synthesizing step");
        let kind = self.catalog.resolve(node_id, None);
        let mut step = Step::running(step_id(run_id, node_id, index), run_id, node_id, kind, ts);
        step.status = StepStatus::Waiting;
        step.waiting = Some(waiting);
        let idx = self.push_step(step);
        self.open_by_node.insert(key, idx);
    }

    fn fail_step(
        &mut self,
        index: usize,
        run_id: &str,
        node_id: Option<&str>,
        message: String,
        ts: Option<DateTime<Utc>>,
    ) {
        if let Some(node_id) = node_id {
            if run_id.is_empty() {
                tracing::debug!(node_id, "flow_error without run id ignored");
                return;
            }
            match self.open_by_node.remove(&NodeKey::new(run_id, node_id)) {
                Some(idx) => {
                    let step = &mut self.steps[idx];
                    step.status = StepStatus::Failed;
                    step.error = Some(message);
                    step.ended_at = ts;
                }
                None => {
                    let kind = self.catalog.resolve(node_id, None);
                    let mut step = Step::running(step_id(run_id, node_id, index), run_id, node_id, kind, None);
                    step.status = StepStatus::Failed;
                    step.error = Some(message);
                    step.ended_at = ts;
                    self.push_step(step);
                }
            }
            return;
        }

        // Flow-level error: annotate the most recent step as a best effort.
        if !run_id.is_empty() {
            let summary = self.summary_mut(run_id);
            summary.status = RunStatus::Failed;
            summary.error = Some(message.clone());
            summary.ended_at = ts.or(summary.ended_at);
        }
        let target = self
            .by_run
            .get(run_id)
            .and_then(|idxs| idxs.last().copied())
            .or_else(|| self.steps.len().checked_sub(1));
        let Some(idx) = target else {
            return;
        };
        let step = &mut self.steps[idx];
        step.error = Some(message);
        if step.status.is_open() {
            step.status = StepStatus::Failed;
            step.ended_at = ts.or(step.ended_at);
            self.open_by_node.retain(|_, open| *open != idx);
        }
    }

    fn push_step(&mut self, step: Step) -> usize {
        let idx = self.steps.len();
        self.touch_run(&step.run_id);
        self.by_run.entry(step.run_id.clone()).or_default().push(idx);
        self.by_id.insert(step.id.clone(), idx);
        self.steps.push(step);
        idx
    }

    fn touch_run(&mut self, run_id: &str) {
        self.summary_mut(run_id);
    }

    fn summary_mut(&mut self, run_id: &str) -> &mut RunSummary {
        if !self.summaries.contains_key(run_id) {
            self.runs.push(run_id.to_string());
        }
        self.summaries
            .entry(run_id.to_string())
            .or_insert_with(|| RunSummary {
                run_id: run_id.to_string(),
                ..Default::default()
            })
    }

    /// Steps of one run in arrival order.
    pub fn steps_for_run(&self, run_id: &str) -> Vec<&Step> {
        self.by_run
            .get(run_id)
            .map(|idxs| idxs.iter().map(|&i| &self.steps[i]).collect())
            .unwrap_or_default()
    }

    /// Whether any step has been recorded for `run_id`.
    pub fn has_steps(&self, run_id: &str) -> bool {
        self.by_run.get(run_id).is_some_and(|idxs| !idxs.is_empty())
    }

    /// Step lookup by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.by_id.get(id).map(|&i| &self.steps[i])
    }

    /// All steps in arrival order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step lists keyed by run id.
    pub fn steps_by_run(&self) -> HashMap<&str, Vec<&Step>> {
        self.by_run
            .iter()
            .map(|(run, idxs)| (run.as_str(), idxs.iter().map(|&i| &self.steps[i]).collect()))
            .collect()
    }

    /// Run ids in order of first appearance.
    pub fn runs(&self) -> &[String] {
        &self.runs
    }

    pub fn run_summary(&self, run_id: &str) -> Option<&RunSummary> {
        self.summaries.get(run_id)
    }

    /// Step currently open (running or waiting) for a node.
    pub fn open_step(&self, run_id: &str, node_id: &str) -> Option<&Step> {
        self.open_by_node
            .get(&NodeKey::new(run_id, node_id))
            .map(|&i| &self.steps[i])
    }

    pub fn last_step_for_run(&self, run_id: &str) -> Option<&Step> {
        self.by_run
            .get(run_id)
            .and_then(|idxs| idxs.last())
            .map(|&i| &self.steps[i])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}
