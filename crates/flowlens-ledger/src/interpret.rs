//! Normalized preview of a step's raw output payload.
//!
//! Node kinds produce differently shaped outputs. Each preview field tries a
//! fixed list of locations and takes the first hit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts in the shape the panel displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Accepts both `input/output` and `prompt/completion` naming.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let count = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64));
        let usage = Self {
            input_tokens: count(&["input_tokens", "prompt_tokens"]),
            output_tokens: count(&["output_tokens", "completion_tokens"]),
            total_tokens: count(&["total_tokens"]),
        };
        let empty = usage.input_tokens.is_none() && usage.output_tokens.is_none() && usage.total_tokens.is_none();
        (!empty).then_some(usage)
    }
}

/// Output of a benchmark-evaluation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub mode: String,
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_answer: Option<String>,
}

impl BenchmarkRecord {
    /// An object with string `mode` and `prompt_id` plus at least one of
    /// `metrics`, `correct` or `signature`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mode = obj.get("mode").and_then(Value::as_str)?;
        let prompt_id = obj.get("prompt_id").and_then(Value::as_str)?;
        if !["metrics", "correct", "signature"].iter().any(|k| obj.contains_key(*k)) {
            return None;
        }
        Some(Self {
            mode: mode.to_string(),
            prompt_id: prompt_id.to_string(),
            correct: obj.get("correct").and_then(Value::as_bool),
            signature: obj.get("signature").and_then(Value::as_str).map(str::to_string),
            metrics: obj.get("metrics").cloned(),
            raw_answer: obj
                .get("debug")
                .and_then(|d| d.get("raw_answer"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Display-ready fields pulled out of a step output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratchpad: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
}

impl OutputPreview {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    at(value, path).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|p| str_at(value, p)).map(str::to_string)
}

/// Last `llm_call` entry of an agent scratchpad trace.
fn last_llm_call(scratchpad: Option<&Value>) -> Option<&Value> {
    scratchpad?
        .get("steps")?
        .as_array()?
        .iter()
        .rev()
        .find(|entry| entry.get("type").and_then(Value::as_str) == Some("llm_call"))
}

fn llm_call_str(call: Option<&Value>, key: &str) -> Option<String> {
    let call = call?;
    str_at(call, &[key])
        .or_else(|| str_at(call, &["meta", key]))
        .map(str::to_string)
}

/// Extract a preview from a raw output. `None` when nothing was found.
pub fn interpret(output: &Value) -> Option<OutputPreview> {
    let benchmark = BenchmarkRecord::from_value(output)
        .or_else(|| output.get("result").and_then(BenchmarkRecord::from_value));

    let preview_text = first_str(
        output,
        &[
            &["result", "result"],
            &["result", "message"],
            &["result", "response"],
            &["message"],
            &["response"],
            &["result"],
        ],
    )
    .or_else(|| benchmark.as_ref().and_then(|b| b.raw_answer.clone()));

    let scratchpad = output
        .get("scratchpad")
        .or_else(|| at(output, &["result", "scratchpad"]))
        .filter(|v| !v.is_null())
        .cloned();
    let llm_call = last_llm_call(scratchpad.as_ref());

    let provider = first_str(output, &[&["provider"], &["result", "provider"], &["raw", "provider"]])
        .or_else(|| llm_call_str(llm_call, "provider"));
    let model = first_str(output, &[&["model"], &["result", "model"], &["raw", "model"]])
        .or_else(|| llm_call_str(llm_call, "model"));
    let usage = [&["usage"][..], &["result", "usage"], &["raw", "usage"]]
        .iter()
        .find_map(|p| at(output, p).and_then(TokenUsage::from_value))
        .or_else(|| {
            let call = llm_call?;
            call.get("usage")
                .or_else(|| at(call, &["meta", "usage"]))
                .and_then(TokenUsage::from_value)
        });

    let task = [&["task"][..], &["result", "task"], &["input", "task"]]
        .iter()
        .find_map(|p| at(output, p).filter(|v| !v.is_null()))
        .and_then(|v| match v {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

    let preview = OutputPreview {
        task,
        preview_text,
        scratchpad,
        provider,
        model,
        usage,
        benchmark,
        sub_run_id: first_str(output, &[&["sub_run_id"], &["result", "sub_run_id"]]),
        artifact_id: first_str(output, &[&["artifact_id"], &["result", "artifact_id"]]),
    };
    (!preview.is_empty()).then_some(preview)
}
