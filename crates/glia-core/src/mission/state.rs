//! Mission run state.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::definition::MissionDefinition;
use super::event::MissionEvent;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    #[default]
    Idle,
    Active,
    Paused,
    Completed,
    Aborted,
}

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionPhase {
    #[default]
    Briefing,
    Running,
    Checkpoint,
    Debrief,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Locked,
    Available,
    Active,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default)]
    pub activated_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Time spent active in the running phase
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Keyed by `tool_event_key(tool_id, name)`
    #[serde(default)]
    pub tool_events: BTreeMap<String, u32>,
}

pub fn tool_event_key(tool_id: &str, name: &str) -> String {
    format!("{tool_id}:{name}")
}

impl StepState {
    pub fn tool_event_count(&self, tool_id: &str, name: &str) -> u32 {
        self.tool_events
            .get(&tool_event_key(tool_id, name))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionMetrics {
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Active run time, excluding pauses
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub paused_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionState {
    pub run_id: String,
    pub definition_id: String,
    pub status: MissionStatus,
    pub phase: MissionPhase,

    pub step_order: Vec<String>,
    pub steps: BTreeMap<String, StepState>,
    #[serde(default)]
    pub active_step_id: Option<String>,
    /// Step to activate once the open checkpoint is acknowledged
    #[serde(default)]
    pub pending_step_id: Option<String>,

    #[serde(default)]
    pub open_tool_ids: Vec<String>,
    #[serde(default)]
    pub active_tool_id: Option<String>,

    #[serde(default)]
    pub active_checkpoint_id: Option<String>,
    #[serde(default)]
    pub acknowledged_checkpoints: Vec<String>,

    #[serde(default)]
    pub metrics: MissionMetrics,

    /// Bumped on every applied event
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub updated_at: Option<i64>,

    #[serde(default)]
    pub event_log: VecDeque<MissionEvent>,
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

fn default_event_log_capacity() -> usize {
    DEFAULT_EVENT_LOG_CAPACITY
}

impl MissionState {
    /// Fresh idle state for a run of `definition`.
    pub fn new(run_id: impl Into<String>, definition: &MissionDefinition) -> Self {
        let step_order = definition.step_ids();
        let steps = step_order
            .iter()
            .map(|id| (id.clone(), StepState::default()))
            .collect();
        Self {
            run_id: run_id.into(),
            definition_id: definition.id.clone(),
            status: MissionStatus::Idle,
            phase: MissionPhase::Briefing,
            step_order,
            steps,
            active_step_id: None,
            pending_step_id: None,
            open_tool_ids: Vec::new(),
            active_tool_id: None,
            active_checkpoint_id: None,
            acknowledged_checkpoints: Vec::new(),
            metrics: MissionMetrics::default(),
            revision: 0,
            updated_at: None,
            event_log: VecDeque::new(),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self.trim_log();
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepState> {
        self.steps.get(id)
    }

    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.steps.get(id).map(|s| s.status)
    }

    pub fn active_step(&self) -> Option<&StepState> {
        self.active_step_id.as_ref().and_then(|id| self.steps.get(id))
    }

    /// Every step completed or skipped.
    pub fn all_steps_done(&self) -> bool {
        self.steps.values().all(|s| s.status.is_done())
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .values()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub(crate) fn record(&mut self, event: MissionEvent) {
        self.event_log.push_back(event);
        self.trim_log();
    }

    fn trim_log(&mut self) {
        while self.event_log.len() > self.event_log_capacity {
            self.event_log.pop_front();
        }
    }
}
