//! Live state for one watched target.
//!
//! The session owns the event list and re-derives the [`RunView`] whenever
//! it changes. It resets at run boundaries so a previous run never shows up
//! under a new root.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowlens_core::config::LedgerConfig;
use flowlens_core::control::{ControlAction, ControlMessage};
use flowlens_core::error::SessionError;
use flowlens_core::event::FlowEvent;

use crate::catalog::NodeCatalog;
use crate::step::StepId;
use crate::tree::ExpansionState;
use crate::view::{resolve_selection, RunView};

/// Transport state as reported by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }
}

/// What happened to an ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted,
    /// Accepted after discarding the previous run.
    AcceptedAfterReset,
}

/// Totals for a batch ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub resets: usize,
}

#[derive(Debug, Clone)]
pub struct WatchSession {
    target: Option<String>,
    catalog: NodeCatalog,
    config: LedgerConfig,
    events: Vec<FlowEvent>,
    view: RunView,
    dirty: bool,
    selected: Option<StepId>,
    expansion: ExpansionState,
    connection: ConnectionState,
    generation: u64,
}

impl WatchSession {
    pub fn new(catalog: NodeCatalog, config: LedgerConfig) -> Self {
        Self {
            target: None,
            catalog,
            config,
            events: Vec::new(),
            view: RunView::default(),
            dirty: false,
            selected: None,
            expansion: ExpansionState::new(),
            connection: ConnectionState::default(),
            generation: 0,
        }
    }

    /// Switch to another target. All events and derived state are dropped.
    pub fn watch(&mut self, target: impl Into<String>) {
        let target = target.into();
        tracing::info!(watch_target = %target, previous = ?self.target, "watching new target");
        self.target = Some(target);
        self.connection = ConnectionState::default();
        self.reset();
    }

    /// The operator started a new run: drop everything accumulated so far.
    pub fn begin_run(&mut self) {
        tracing::info!(watch_target = ?self.target, "new run requested, resetting session");
        self.reset();
    }

    fn reset(&mut self) {
        self.events.clear();
        self.view = RunView::default();
        self.dirty = false;
        self.selected = None;
        self.expansion.clear();
        self.generation += 1;
    }

    /// Append one event and re-derive the view.
    ///
    /// Rejected while the transport is marked disconnected so the last view
    /// stays as it was.
    pub fn ingest(&mut self, event: FlowEvent) -> Result<IngestOutcome, SessionError> {
        let outcome = self.push(event)?;
        self.refresh();
        Ok(outcome)
    }

    /// Append a batch, deriving once at the end.
    pub fn ingest_all(&mut self, events: impl IntoIterator<Item = FlowEvent>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for event in events {
            match self.push(event) {
                Ok(IngestOutcome::Accepted) => summary.accepted += 1,
                Ok(IngestOutcome::AcceptedAfterReset) => {
                    summary.accepted += 1;
                    summary.resets += 1;
                }
                Err(_) => summary.rejected += 1,
            }
        }
        self.refresh();
        summary
    }

    fn push(&mut self, event: FlowEvent) -> Result<IngestOutcome, SessionError> {
        if !self.connection.connected {
            let reason = self
                .connection
                .error
                .clone()
                .unwrap_or_else(|| "disconnected".to_string());
            tracing::warn!(kind = event.kind(), %reason, "event rejected, view is frozen");
            return Err(SessionError::Frozen(reason));
        }

        let mut outcome = IngestOutcome::Accepted;
        if self.is_run_boundary(&event) {
            tracing::info!(
                previous = ?self.view.root_run_id,
                next = ?event.run_id(),
                "run boundary, resetting session"
            );
            self.reset();
            outcome = IngestOutcome::AcceptedAfterReset;
        }
        self.events.push(event);
        self.dirty = true;
        Ok(outcome)
    }

    /// A parentless `flow_start` for a different run while the current root
    /// has already finished.
    fn is_run_boundary(&mut self, event: &FlowEvent) -> bool {
        if !event.is_root_start() {
            return false;
        }
        self.refresh();
        match (self.view.root_run_id.as_deref(), event.run_id()) {
            (Some(current), Some(next)) => {
                current != next && self.view.is_terminal() && !self.view.links().is_child(next)
            }
            _ => false,
        }
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        self.view = RunView::derive(&self.events, &self.catalog, &self.config);
        self.dirty = false;
        let selected = resolve_selection(&self.view, self.selected.as_deref());
        if selected != self.selected {
            tracing::debug!(from = ?self.selected, to = ?selected, "selection moved");
        }
        self.selected = selected;
    }

    pub fn mark_disconnected(&mut self, error: Option<String>) {
        tracing::warn!(error = ?error, "transport disconnected, freezing view");
        self.connection = ConnectionState {
            connected: false,
            error,
        };
    }

    pub fn mark_connected(&mut self) {
        self.connection = ConnectionState::default();
    }

    /// Select a step. Unknown ids are refused and leave the selection as is.
    pub fn select(&mut self, step_id: &str) -> bool {
        if !self.view.contains(step_id) {
            return false;
        }
        self.selected = Some(step_id.to_string());
        true
    }

    /// Flip a tree row. Returns the new state, or `None` for an unknown step.
    pub fn toggle_expanded(&mut self, step_id: &str) -> Option<bool> {
        let node = self.view.tree_node(step_id)?.clone();
        let status = self.view.status_of(step_id);
        Some(self.expansion.toggle(&node, status))
    }

    pub fn set_expanded(&mut self, step_id: &str, expanded: bool) -> bool {
        if self.view.tree_node(step_id).is_none() {
            return false;
        }
        self.expansion.set(step_id, expanded);
        true
    }

    pub fn run_message(&self, input_data: Value) -> ControlMessage {
        ControlMessage::Run { input_data }
    }

    pub fn resume_message(&self, response: Value) -> ControlMessage {
        ControlMessage::Resume { response }
    }

    /// Pause, resume or cancel the current root run.
    pub fn control_message(&self, action: ControlAction) -> Result<ControlMessage, SessionError> {
        let run_id = self.view.root_run_id.clone().ok_or(SessionError::NoActiveRun)?;
        Ok(ControlMessage::Control { action, run_id })
    }

    pub fn view(&self) -> &RunView {
        &self.view
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn expanded_ids(&self) -> Vec<StepId> {
        self.view.expanded_ids(&self.expansion)
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn events(&self) -> &[FlowEvent] {
        &self.events
    }

    /// Bumped on every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn set_catalog(&mut self, catalog: NodeCatalog) {
        self.catalog = catalog;
        self.dirty = true;
        self.refresh();
    }
}
