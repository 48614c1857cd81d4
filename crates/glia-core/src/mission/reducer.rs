//! Mission reducer - pure `(state, event) -> state`.
//!
//! Run status: `idle -> active <-> paused -> completed | aborted`.
//! Phase: `briefing -> running -> (checkpoint -> running)* -> debrief`.
//! Step status: `locked -> available -> active -> completed | skipped`,
//! with at most one active step.
//!
//! An event that is not valid for the current state leaves it untouched,
//! which makes terminal events idempotent.

use super::definition::{CheckpointTrigger, MissionDefinition};
use super::event::{MissionEvent, MissionEventKind};
use super::state::{tool_event_key, MissionPhase, MissionState, MissionStatus, StepStatus};

pub fn reduce(
    definition: &MissionDefinition,
    state: &MissionState,
    event: &MissionEvent,
) -> MissionState {
    if event.run_id != state.run_id {
        return state.clone();
    }

    let mut next = state.clone();
    if !apply(definition, &mut next, event) {
        return state.clone();
    }

    next.revision += 1;
    next.updated_at = Some(event.at);
    // Ticks are high-volume and fully reflected in metrics.
    if !matches!(event.event, MissionEventKind::TimerTick { .. }) {
        next.record(event.clone());
    }
    next
}

/// Returns whether the event had an effect. Guards run before any write so
/// a rejected event never leaves a partial update behind.
fn apply(def: &MissionDefinition, s: &mut MissionState, ev: &MissionEvent) -> bool {
    use MissionEventKind as K;

    if s.status.is_terminal() {
        return false;
    }

    let at = ev.at;
    match &ev.event {
        K::MissionStart => start(s, at),
        K::MissionPause => {
            if s.status != MissionStatus::Active {
                return false;
            }
            s.status = MissionStatus::Paused;
            true
        }
        K::MissionResume => {
            if s.status != MissionStatus::Paused {
                return false;
            }
            s.status = MissionStatus::Active;
            true
        }
        K::MissionAbort { .. } => {
            s.status = MissionStatus::Aborted;
            s.metrics.completed_at = Some(at);
            true
        }
        K::MissionComplete => {
            if s.status == MissionStatus::Idle {
                return false;
            }
            s.status = MissionStatus::Completed;
            s.phase = MissionPhase::Debrief;
            s.active_checkpoint_id = None;
            s.pending_step_id = None;
            s.metrics.completed_at = Some(at);
            true
        }
        K::StepActivate { step_id } => {
            if !can_drive_steps(s) {
                return false;
            }
            activate_step(def, s, step_id, at)
        }
        K::StepComplete { step_id } => {
            if !can_drive_steps(s) || s.active_step_id.as_deref() != Some(step_id.as_str()) {
                return false;
            }
            end_step(def, s, step_id, StepStatus::Completed, at);
            true
        }
        K::StepSkip { step_id } => {
            if !can_drive_steps(s) || s.active_step_id.as_deref() != Some(step_id.as_str()) {
                return false;
            }
            end_step(def, s, step_id, StepStatus::Skipped, at);
            true
        }
        K::ToolOpen { tool_id } => {
            if !is_live(s) {
                return false;
            }
            open_tool(s, tool_id)
        }
        K::ToolClose { tool_id } => {
            if !is_live(s) || !s.open_tool_ids.contains(tool_id) {
                return false;
            }
            s.open_tool_ids.retain(|t| t != tool_id);
            if s.active_tool_id.as_deref() == Some(tool_id.as_str()) {
                s.active_tool_id = s.open_tool_ids.last().cloned();
            }
            true
        }
        K::ToolEvent { tool_id, name, .. } => {
            if s.status != MissionStatus::Active {
                return false;
            }
            if s.phase == MissionPhase::Running {
                if let Some(active) = s.active_step_id.as_deref() {
                    if let Some(step) = s.steps.get_mut(active) {
                        *step
                            .tool_events
                            .entry(tool_event_key(tool_id, name))
                            .or_insert(0) += 1;
                    }
                }
                settle_active_step(def, s, at);
            }
            true
        }
        K::CheckpointOpen { checkpoint_id } => {
            if s.status != MissionStatus::Active
                || s.phase != MissionPhase::Running
                || def.checkpoint(checkpoint_id).is_none()
            {
                return false;
            }
            s.phase = MissionPhase::Checkpoint;
            s.active_checkpoint_id = Some(checkpoint_id.clone());
            true
        }
        K::CheckpointAck { checkpoint_id } => {
            if s.status != MissionStatus::Active
                || s.active_checkpoint_id.as_deref() != Some(checkpoint_id.as_str())
            {
                return false;
            }
            ack_checkpoint(def, s, at);
            true
        }
        K::TimerTick { delta_ms } => tick(def, s, *delta_ms, at),
        K::Unknown => false,
    }
}

fn is_live(s: &MissionState) -> bool {
    matches!(s.status, MissionStatus::Active | MissionStatus::Paused)
}

fn can_drive_steps(s: &MissionState) -> bool {
    s.status == MissionStatus::Active && s.phase == MissionPhase::Running
}

fn start(s: &mut MissionState, at: i64) -> bool {
    if s.status != MissionStatus::Idle {
        return false;
    }
    s.status = MissionStatus::Active;
    s.metrics.started_at = Some(at);

    match s.step_order.first().cloned() {
        Some(first) => {
            s.phase = MissionPhase::Running;
            if let Some(step) = s.steps.get_mut(&first) {
                step.status = StepStatus::Available;
            }
        }
        None => s.phase = MissionPhase::Debrief,
    }
    true
}

fn open_tool(s: &mut MissionState, tool_id: &str) -> bool {
    let already_active = s.active_tool_id.as_deref() == Some(tool_id);
    if already_active && s.open_tool_ids.iter().any(|t| t == tool_id) {
        return false;
    }
    if !s.open_tool_ids.iter().any(|t| t == tool_id) {
        s.open_tool_ids.push(tool_id.to_string());
    }
    s.active_tool_id = Some(tool_id.to_string());
    true
}

fn activate_step(def: &MissionDefinition, s: &mut MissionState, step_id: &str, at: i64) -> bool {
    if s.active_step_id.is_some() {
        return false;
    }
    let Some(step) = s.steps.get_mut(step_id) else {
        return false;
    };
    if step.status != StepStatus::Available {
        return false;
    }

    step.status = StepStatus::Active;
    step.activated_at = Some(at);
    s.active_step_id = Some(step_id.to_string());

    if let Some(tool_id) = def.step(step_id).and_then(|d| d.tool_id.as_deref()) {
        open_tool(s, tool_id);
    }
    true
}

/// Finish the active step, unlock its successor and run step-boundary rules.
fn end_step(def: &MissionDefinition, s: &mut MissionState, step_id: &str, outcome: StepStatus, at: i64) {
    let auto_advance = outcome == StepStatus::Completed
        && match (def.step(step_id), s.steps.get(step_id)) {
            (Some(step_def), Some(step)) => step_def.completion.auto_advances(step),
            _ => false,
        };

    if let Some(step) = s.steps.get_mut(step_id) {
        step.status = outcome;
        step.completed_at = Some(at);
    }
    s.active_step_id = None;

    let next = unlock_next(s, step_id);

    if s.all_steps_done() {
        s.phase = MissionPhase::Debrief;
    }

    let checkpoint = def.checkpoints.iter().find(|c| {
        matches!(&c.trigger, CheckpointTrigger::AfterStep { step_id: after } if after == step_id)
            && !s.acknowledged_checkpoints.contains(&c.id)
    });

    match (checkpoint, next) {
        (Some(checkpoint), next) => {
            s.phase = MissionPhase::Checkpoint;
            s.active_checkpoint_id = Some(checkpoint.id.clone());
            if auto_advance {
                s.pending_step_id = next;
            }
        }
        (None, Some(next)) if auto_advance => {
            activate_step(def, s, &next, at);
        }
        (None, _) => {}
    }
}

/// Make the first locked step after `step_id` available.
fn unlock_next(s: &mut MissionState, step_id: &str) -> Option<String> {
    let position = s.step_order.iter().position(|id| id == step_id)?;
    let next = s.step_order[position + 1..]
        .iter()
        .find(|id| s.steps.get(*id).map(|st| st.status) == Some(StepStatus::Locked))?
        .clone();
    if let Some(step) = s.steps.get_mut(&next) {
        step.status = StepStatus::Available;
    }
    Some(next)
}

fn ack_checkpoint(def: &MissionDefinition, s: &mut MissionState, at: i64) {
    if let Some(id) = s.active_checkpoint_id.take() {
        if !s.acknowledged_checkpoints.contains(&id) {
            s.acknowledged_checkpoints.push(id);
        }
    }
    s.phase = if s.all_steps_done() {
        MissionPhase::Debrief
    } else {
        MissionPhase::Running
    };

    if let Some(pending) = s.pending_step_id.take() {
        activate_step(def, s, &pending, at);
    }
}

/// Complete the active step if its rule is now satisfied.
fn settle_active_step(def: &MissionDefinition, s: &mut MissionState, at: i64) {
    let Some(step_id) = s.active_step_id.clone() else {
        return;
    };
    let satisfied = match (def.step(&step_id), s.steps.get(&step_id)) {
        (Some(step_def), Some(step)) => step_def.completion.is_satisfied(step),
        _ => false,
    };
    if satisfied {
        end_step(def, s, &step_id, StepStatus::Completed, at);
    }
}

fn tick(def: &MissionDefinition, s: &mut MissionState, delta_ms: u64, at: i64) -> bool {
    if delta_ms == 0 {
        return false;
    }
    match s.status {
        MissionStatus::Paused => {
            s.metrics.paused_ms += delta_ms;
            true
        }
        MissionStatus::Active => {
            s.metrics.elapsed_ms += delta_ms;

            if s.phase == MissionPhase::Running {
                if let Some(active) = s.active_step_id.as_deref() {
                    if let Some(step) = s.steps.get_mut(active) {
                        step.elapsed_ms += delta_ms;
                    }
                }
                settle_active_step(def, s, at);
            }

            if s.phase == MissionPhase::Running {
                let elapsed = s.metrics.elapsed_ms;
                let due = def.checkpoints.iter().find(|c| {
                    matches!(c.trigger, CheckpointTrigger::AtElapsed { seconds } if elapsed >= seconds.saturating_mul(1_000))
                        && !s.acknowledged_checkpoints.contains(&c.id)
                });
                if let Some(checkpoint) = due {
                    s.phase = MissionPhase::Checkpoint;
                    s.active_checkpoint_id = Some(checkpoint.id.clone());
                }
            }
            true
        }
        MissionStatus::Idle | MissionStatus::Completed | MissionStatus::Aborted => false,
    }
}
