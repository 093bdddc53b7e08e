use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable step identifier: `"{run_id}:{node_id}:{arrival_index}"`.
pub type StepId = String;

/// Build the id of a step created by the event at `arrival_index`.
pub fn step_id(run_id: &str, node_id: &str, arrival_index: usize) -> StepId {
    format!("{run_id}:{node_id}:{arrival_index}")
}

/// Lifecycle status of a single node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Waiting,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Waiting => "waiting",
            Self::Failed => "failed",
        }
    }

    /// Running or waiting: the step can still receive a terminal event.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "waiting" => Ok(Self::Waiting),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown step status: '{other}'")),
        }
    }
}

/// Payload of a `flow_waiting` event attached to the paused step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitingInfo {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub allow_free_text: bool,
    #[serde(default)]
    pub wait_key: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Timing and token metrics reported with a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, alias = "prompt_tokens", skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, alias = "completion_tokens", skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl StepMetrics {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.duration_ms.is_none()
            && self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.total_tokens.is_none()
            && self.cost.is_none()
    }

    /// Read metrics from an event `meta` object.
    ///
    /// Token counts may sit at the top level or inside a `usage`/`tokens`
    /// object. Returns `None` when nothing usable is present.
    pub fn from_meta(meta: &Value) -> Option<Self> {
        let obj = meta.as_object()?;
        let nested = obj
            .get("usage")
            .or_else(|| obj.get("tokens"))
            .and_then(Value::as_object);
        let tokens = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(as_count))
                .or_else(|| nested.and_then(|n| keys.iter().find_map(|k| n.get(*k).and_then(as_count))))
        };
        let metrics = Self {
            duration_ms: obj
                .get("duration_ms")
                .and_then(Value::as_f64)
                .or_else(|| obj.get("duration").and_then(Value::as_f64).map(|s| s * 1000.0)),
            input_tokens: tokens(&["input_tokens", "prompt_tokens"]),
            output_tokens: tokens(&["output_tokens", "completion_tokens"]),
            total_tokens: tokens(&["total_tokens"]),
            cost: obj.get("cost").and_then(Value::as_f64),
        };
        (!metrics.is_empty()).then_some(metrics)
    }
}

fn as_count(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn meta_str(meta: Option<&Value>, key: &str) -> Option<String> {
    meta?
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Provider and model named in an event `meta` object.
pub fn provider_model(meta: Option<&Value>) -> (Option<String>, Option<String>) {
    (meta_str(meta, "provider"), meta_str(meta, "model"))
}

/// One node invocation within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub run_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_kind: Option<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub waiting: Option<WaitingInfo>,
    #[serde(default)]
    pub metrics: Option<StepMetrics>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    /// A freshly started step.
    pub fn running(
        id: StepId,
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        node_kind: Option<String>,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            run_id: run_id.into(),
            node_id: node_id.into(),
            node_kind,
            status: StepStatus::Running,
            output: None,
            error: None,
            waiting: None,
            metrics: None,
            provider: None,
            model: None,
            started_at,
            ended_at: None,
        }
    }

    /// The `sub_run_id` carried by this step's output, if any.
    pub fn output_sub_run_id(&self) -> Option<&str> {
        self.output.as_ref().and_then(sub_run_id_of)
    }
}

/// `sub_run_id` string at the top level of an output payload.
pub fn sub_run_id_of(output: &Value) -> Option<&str> {
    output
        .get("sub_run_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
