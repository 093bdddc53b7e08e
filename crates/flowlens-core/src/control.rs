use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operator action on a live run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown control action: '{other}'")),
        }
    }
}

/// Messages sent back to the runtime over the same connection the events
/// arrive on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Start a new run of the watched workflow.
    Run {
        #[serde(default)]
        input_data: Value,
    },
    /// Answer a `flow_waiting` prompt.
    Resume {
        #[serde(default)]
        response: Value,
    },
    /// Pause, resume or cancel a run.
    Control { action: ControlAction, run_id: String },
}

impl ControlMessage {
    /// Whether sending this message begins a new run.
    pub fn starts_run(&self) -> bool {
        matches!(self, Self::Run { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_action_from_str() {
        assert_eq!("pause".parse::<ControlAction>().unwrap(), ControlAction::Pause);
        assert_eq!("cancel".parse::<ControlAction>().unwrap(), ControlAction::Cancel);
        assert!("stop".parse::<ControlAction>().is_err());
    }

    #[test]
    fn run_message_wire_shape() {
        let msg = ControlMessage::Run {
            input_data: json!({"topic": "rust"}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "run", "input_data": {"topic": "rust"}}));
        assert!(msg.starts_run());
    }

    #[test]
    fn control_message_wire_shape() {
        let msg = ControlMessage::Control {
            action: ControlAction::Cancel,
            run_id: "r1".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "control", "action": "cancel", "run_id": "r1"}));
        assert!(!msg.starts_run());
    }

    #[test]
    fn resume_message_decodes() {
        let msg: ControlMessage =
            serde_json::from_value(json!({"type": "resume", "response": "y"})).unwrap();
        assert_eq!(msg, ControlMessage::Resume { response: json!("y") });
    }
}
