//! Mission events - the only way mission state changes.

use serde::{Deserialize, Serialize};

/// An event addressed to one run. `run_id`, `at` and `origin` are filled in
/// by the runtime; callers only supply the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionEvent {
    pub run_id: String,

    /// Epoch milliseconds
    pub at: i64,

    /// Runtime instance that produced the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    pub event: MissionEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MissionEventKind {
    #[serde(rename = "mission/start")]
    MissionStart,

    #[serde(rename = "mission/pause")]
    MissionPause,

    #[serde(rename = "mission/resume")]
    MissionResume,

    #[serde(rename = "mission/abort")]
    MissionAbort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "mission/complete")]
    MissionComplete,

    #[serde(rename = "step/activate", rename_all = "camelCase")]
    StepActivate { step_id: String },

    #[serde(rename = "step/complete", rename_all = "camelCase")]
    StepComplete { step_id: String },

    #[serde(rename = "step/skip", rename_all = "camelCase")]
    StepSkip { step_id: String },

    #[serde(rename = "tool/open", rename_all = "camelCase")]
    ToolOpen { tool_id: String },

    #[serde(rename = "tool/close", rename_all = "camelCase")]
    ToolClose { tool_id: String },

    /// Interaction reported from inside a tool, e.g. `practice/submitted`
    #[serde(rename = "tool/event", rename_all = "camelCase")]
    ToolEvent {
        tool_id: String,
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },

    #[serde(rename = "checkpoint/open", rename_all = "camelCase")]
    CheckpointOpen { checkpoint_id: String },

    #[serde(rename = "checkpoint/ack", rename_all = "camelCase")]
    CheckpointAck { checkpoint_id: String },

    #[serde(rename = "timer/tick", rename_all = "camelCase")]
    TimerTick { delta_ms: u64 },

    /// Any event type this build does not know about
    #[serde(other)]
    Unknown,
}

impl MissionEventKind {
    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MissionStart => "mission/start",
            Self::MissionPause => "mission/pause",
            Self::MissionResume => "mission/resume",
            Self::MissionAbort { .. } => "mission/abort",
            Self::MissionComplete => "mission/complete",
            Self::StepActivate { .. } => "step/activate",
            Self::StepComplete { .. } => "step/complete",
            Self::StepSkip { .. } => "step/skip",
            Self::ToolOpen { .. } => "tool/open",
            Self::ToolClose { .. } => "tool/close",
            Self::ToolEvent { .. } => "tool/event",
            Self::CheckpointOpen { .. } => "checkpoint/open",
            Self::CheckpointAck { .. } => "checkpoint/ack",
            Self::TimerTick { .. } => "timer/tick",
            Self::Unknown => "unknown",
        }
    }

    pub fn step_activate(step_id: impl Into<String>) -> Self {
        Self::StepActivate {
            step_id: step_id.into(),
        }
    }

    pub fn step_complete(step_id: impl Into<String>) -> Self {
        Self::StepComplete {
            step_id: step_id.into(),
        }
    }

    pub fn step_skip(step_id: impl Into<String>) -> Self {
        Self::StepSkip {
            step_id: step_id.into(),
        }
    }

    pub fn tool_open(tool_id: impl Into<String>) -> Self {
        Self::ToolOpen {
            tool_id: tool_id.into(),
        }
    }

    pub fn tool_close(tool_id: impl Into<String>) -> Self {
        Self::ToolClose {
            tool_id: tool_id.into(),
        }
    }

    pub fn tool_event(tool_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolEvent {
            tool_id: tool_id.into(),
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn checkpoint_open(checkpoint_id: impl Into<String>) -> Self {
        Self::CheckpointOpen {
            checkpoint_id: checkpoint_id.into(),
        }
    }

    pub fn checkpoint_ack(checkpoint_id: impl Into<String>) -> Self {
        Self::CheckpointAck {
            checkpoint_id: checkpoint_id.into(),
        }
    }

    pub fn tick(delta_ms: u64) -> Self {
        Self::TimerTick { delta_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        let kind = MissionEventKind::tool_event("t1", "answered");
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "tool/event");
        assert_eq!(json["toolId"], "t1");
        assert_eq!(kind.name(), "tool/event");

        let parsed: MissionEventKind =
            serde_json::from_str(r#"{"type":"step/activate","stepId":"s1"}"#).unwrap();
        assert_eq!(parsed, MissionEventKind::step_activate("s1"));

        let abort: MissionEventKind = serde_json::from_str(r#"{"type":"mission/abort"}"#).unwrap();
        assert_eq!(abort, MissionEventKind::MissionAbort { reason: None });
    }

    #[test]
    fn unknown_types_decode_to_unknown() {
        let parsed: MissionEventKind =
            serde_json::from_str(r#"{"type":"hint/reveal","hintId":"h1"}"#).unwrap();
        assert_eq!(parsed, MissionEventKind::Unknown);
    }
}
