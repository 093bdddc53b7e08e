use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EventError;

/// Execution events pushed by the workflow runtime.
///
/// Every field besides the `type` discriminant is optional on the wire so a
/// partial event still decodes; missing identifiers become empty strings.
/// Unknown `type` values decode to [`FlowEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A run (root or sub-run) began.
    FlowStart {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_run_id: Option<String>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A run finished; `meta` carries aggregate metrics.
    FlowComplete {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A run was cancelled by the operator.
    FlowCancelled {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A node within `run_id` began executing.
    NodeStart {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_type: Option<String>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A node finished.
    NodeComplete {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A node (and transitively its run) is paused awaiting input.
    FlowWaiting {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        choices: Vec<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        allow_free_text: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// A node or the whole run failed.
    FlowError {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        #[serde(default, with = "crate::timestamp", skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    /// Node `node_id` in `run_id` spawned child run `sub_run_id`.
    SubworkflowUpdate {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        node_id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        sub_run_id: String,
    },
    /// Fine-grained agent sub-steps. `run_id` is the agent's own run.
    TraceUpdate {
        #[serde(default, deserialize_with = "null_as_default")]
        run_id: String,
        #[serde(default, deserialize_with = "null_as_default")]
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_run_id: Option<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        steps: Vec<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl FlowEvent {
    /// Decode a single event.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        if !value.is_object() {
            return Err(EventError::NotAnObject);
        }
        serde_json::from_value(value).map_err(|e| EventError::Decode(e.to_string()))
    }

    /// The wire discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FlowStart { .. } => "flow_start",
            Self::FlowComplete { .. } => "flow_complete",
            Self::FlowCancelled { .. } => "flow_cancelled",
            Self::NodeStart { .. } => "node_start",
            Self::NodeComplete { .. } => "node_complete",
            Self::FlowWaiting { .. } => "flow_waiting",
            Self::FlowError { .. } => "flow_error",
            Self::SubworkflowUpdate { .. } => "subworkflow_update",
            Self::TraceUpdate { .. } => "trace_update",
            Self::Unknown => "unknown",
        }
    }

    /// The run this event belongs to. Empty run ids count as absent.
    pub fn run_id(&self) -> Option<&str> {
        let id = match self {
            Self::FlowStart { run_id, .. }
            | Self::FlowComplete { run_id, .. }
            | Self::FlowCancelled { run_id, .. }
            | Self::NodeStart { run_id, .. }
            | Self::NodeComplete { run_id, .. }
            | Self::FlowWaiting { run_id, .. }
            | Self::FlowError { run_id, .. }
            | Self::SubworkflowUpdate { run_id, .. }
            | Self::TraceUpdate { run_id, .. } => run_id.as_str(),
            Self::Unknown => return None,
        };
        (!id.is_empty()).then_some(id)
    }

    /// The node this event refers to, if any.
    pub fn node_id(&self) -> Option<&str> {
        let id = match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeComplete { node_id, .. }
            | Self::SubworkflowUpdate { node_id, .. }
            | Self::TraceUpdate { node_id, .. } => node_id.as_str(),
            Self::FlowWaiting { node_id, .. } | Self::FlowError { node_id, .. } => {
                node_id.as_deref()?
            }
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    }

    /// True for a `flow_start` that declares no parent run.
    pub fn is_root_start(&self) -> bool {
        matches!(
            self,
            Self::FlowStart { run_id, parent_run_id, .. }
                if !run_id.is_empty() && parent_run_id.as_deref().is_none_or(str::is_empty)
        )
    }

    /// Normalised error text for `flow_error` events.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::FlowError { error, .. } => Some(error_text(error.as_ref())),
            _ => None,
        }
    }
}

/// Missing and `null` both decode to the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn error_text(error: Option<&Value>) -> String {
    match error {
        None | Some(Value::Null) => "unknown error".into(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => match map.get("message").and_then(Value::as_str) {
            Some(msg) => msg.to_string(),
            None => Value::Object(map.clone()).to_string(),
        },
        Some(other) => other.to_string(),
    }
}

/// Result of decoding a batch of raw events.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub events: Vec<FlowEvent>,
    pub skipped: usize,
}

/// Decode a batch of raw JSON events, skipping (and logging) the ones that
/// cannot be decoded.
pub fn decode_events(raw: Vec<Value>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for (index, value) in raw.into_iter().enumerate() {
        match FlowEvent::from_value(value) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping undecodable event");
                batch.skipped += 1;
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_node_start() {
        let ev = FlowEvent::from_value(json!({
            "type": "node_start",
            "run_id": "r1",
            "node_id": "n1",
            "ts": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(ev.kind(), "node_start");
        assert_eq!(ev.run_id(), Some("r1"));
        assert_eq!(ev.node_id(), Some("n1"));
        assert!(matches!(ev, FlowEvent::NodeStart { ts: Some(_), .. }));
    }

    #[test]
    fn decode_waiting_payload() {
        let ev = FlowEvent::from_value(json!({
            "type": "flow_waiting",
            "run_id": "r1",
            "node_id": "ask",
            "prompt": "Proceed?",
            "choices": ["y", "n"],
            "allow_free_text": true,
            "wait_key": "k1"
        }))
        .unwrap();
        match ev {
            FlowEvent::FlowWaiting {
                prompt,
                choices,
                allow_free_text,
                wait_key,
                reason,
                ..
            } => {
                assert_eq!(prompt.as_deref(), Some("Proceed?"));
                assert_eq!(choices, vec!["y", "n"]);
                assert!(allow_free_text);
                assert_eq!(wait_key.as_deref(), Some("k1"));
                assert!(reason.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn missing_fields_default() {
        let ev = FlowEvent::from_value(json!({"type": "node_complete"})).unwrap();
        assert_eq!(ev.run_id(), None);
        assert_eq!(ev.node_id(), None);
    }

    #[test]
    fn bad_timestamp_is_tolerated() {
        let ev = FlowEvent::from_value(json!({
            "type": "node_start", "run_id": "r", "node_id": "n", "ts": "not a time"
        }))
        .unwrap();
        assert!(matches!(ev, FlowEvent::NodeStart { ts: None, .. }));
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let ev = FlowEvent::from_value(json!({"type": "heartbeat", "run_id": "r"})).unwrap();
        assert_eq!(ev, FlowEvent::Unknown);
        assert_eq!(ev.run_id(), None);
    }

    #[test]
    fn null_fields_decode_to_defaults() {
        let waiting = FlowEvent::from_value(json!({
            "type": "flow_waiting",
            "run_id": "r",
            "node_id": "ask",
            "prompt": "Proceed?",
            "choices": null,
            "allow_free_text": null,
            "wait_key": null,
            "reason": null
        }))
        .unwrap();
        match waiting {
            FlowEvent::FlowWaiting {
                prompt,
                choices,
                allow_free_text,
                ..
            } => {
                assert_eq!(prompt.as_deref(), Some("Proceed?"));
                assert!(choices.is_empty());
                assert!(!allow_free_text);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let error = FlowEvent::from_value(json!({"type": "flow_error", "run_id": null, "error": "boom"})).unwrap();
        assert_eq!(error.run_id(), None);
        assert_eq!(error.error_message().as_deref(), Some("boom"));

        let trace = FlowEvent::from_value(json!({
            "type": "trace_update", "run_id": "a", "node_id": null, "steps": null
        }))
        .unwrap();
        assert!(matches!(trace, FlowEvent::TraceUpdate { ref steps, .. } if steps.is_empty()));

        let link = FlowEvent::from_value(json!({
            "type": "subworkflow_update", "run_id": "r", "node_id": "n", "sub_run_id": null
        }))
        .unwrap();
        assert!(matches!(link, FlowEvent::SubworkflowUpdate { ref sub_run_id, .. } if sub_run_id.is_empty()));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            FlowEvent::from_value(json!("node_start")),
            Err(EventError::NotAnObject)
        ));
    }

    #[test]
    fn wrong_field_type_is_a_decode_error() {
        let err = FlowEvent::from_value(json!({"type": "node_start", "run_id": 7})).unwrap_err();
        assert!(matches!(err, EventError::Decode(_)));
    }

    #[test]
    fn root_start_detection() {
        let root = FlowEvent::from_value(json!({"type": "flow_start", "run_id": "r"})).unwrap();
        let child = FlowEvent::from_value(
            json!({"type": "flow_start", "run_id": "c", "parent_run_id": "r"}),
        )
        .unwrap();
        let blank_parent = FlowEvent::from_value(
            json!({"type": "flow_start", "run_id": "r2", "parent_run_id": ""}),
        )
        .unwrap();
        assert!(root.is_root_start());
        assert!(!child.is_root_start());
        assert!(blank_parent.is_root_start());
    }

    #[test]
    fn error_message_shapes() {
        let plain = FlowEvent::from_value(json!({"type": "flow_error", "error": "boom"})).unwrap();
        let object = FlowEvent::from_value(
            json!({"type": "flow_error", "error": {"message": "bad input", "code": 3}}),
        )
        .unwrap();
        let missing = FlowEvent::from_value(json!({"type": "flow_error"})).unwrap();
        assert_eq!(plain.error_message().as_deref(), Some("boom"));
        assert_eq!(object.error_message().as_deref(), Some("bad input"));
        assert_eq!(missing.error_message().as_deref(), Some("unknown error"));
    }

    #[test]
    fn decode_batch_skips_bad_entries() {
        let batch = decode_events(vec![
            json!({"type": "flow_start", "run_id": "r"}),
            json!(42),
            json!({"type": "node_start", "run_id": "r", "node_id": {"nested": true}}),
            json!({"type": "node_start", "run_id": "r", "node_id": "a"}),
        ]);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.skipped, 2);
    }

    #[test]
    fn serialize_uses_wire_tag() {
        let ev = FlowEvent::SubworkflowUpdate {
            run_id: "r".into(),
            node_id: "n".into(),
            sub_run_id: "c".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "subworkflow_update");
        assert_eq!(json["sub_run_id"], "c");
    }
}
