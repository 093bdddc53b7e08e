use serde::{Deserialize, Serialize};

/// Default nesting limit for sub-run trees.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Node kind used for agent nodes by the runtime.
pub const AGENT_KIND: &str = "agent";

/// Knobs for step reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Maximum depth of nested sub-run expansion.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Node kinds whose duplicate completions (same `sub_run_id`) are merged.
    #[serde(default = "default_kinds")]
    pub dedup_kinds: Vec<String>,

    /// Node kinds that get a dedicated agent display instead of nested rows
    /// inferred from their output.
    #[serde(default = "default_kinds")]
    pub agent_kinds: Vec<String>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_kinds() -> Vec<String> {
    vec![AGENT_KIND.to_string()]
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            dedup_kinds: default_kinds(),
            agent_kinds: default_kinds(),
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_dedup_kind(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        if !self.dedup_kinds.contains(&kind) {
            self.dedup_kinds.push(kind);
        }
        self
    }

    pub fn with_dedup_kinds(mut self, kinds: Vec<String>) -> Self {
        self.dedup_kinds = kinds;
        self
    }

    pub fn with_agent_kinds(mut self, kinds: Vec<String>) -> Self {
        self.agent_kinds = kinds;
        self
    }

    pub fn is_dedup_kind(&self, kind: Option<&str>) -> bool {
        kind.is_some_and(|k| self.dedup_kinds.iter().any(|d| d == k))
    }

    pub fn is_agent_kind(&self, kind: Option<&str>) -> bool {
        kind.is_some_and(|k| self.agent_kinds.iter().any(|a| a == k))
    }
}
