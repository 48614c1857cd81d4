//! Mission definitions - the static shape of a guided flow.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::registry::{LayoutRegistry, ToolRegistry};
use super::state::StepState;

/// A mission: ordered steps, optional tool panels, checkpoint rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDefinition {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Layout preset id; `None` uses the shell's default arrangement
    #[serde(default)]
    pub layout: Option<String>,

    /// Tools made available for the whole mission
    #[serde(default)]
    pub tools: Vec<String>,

    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub checkpoints: Vec<CheckpointRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Tool panel opened when the step activates
    #[serde(default)]
    pub tool_id: Option<String>,

    #[serde(default)]
    pub completion: CompletionRule,
}

/// When a step counts as done.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionRule {
    /// Only an explicit `step/complete`
    #[default]
    Manual,

    /// Time spent active on the step reaches `seconds`
    #[serde(rename_all = "camelCase")]
    Time {
        seconds: u64,
        #[serde(default)]
        auto_advance: bool,
    },

    /// A tool reported event `name` at least `count` times during the step
    #[serde(rename_all = "camelCase")]
    ToolEvent {
        tool_id: String,
        name: String,
        #[serde(default = "default_event_count")]
        count: u32,
    },

    AllOf(Vec<CompletionRule>),

    AnyOf(Vec<CompletionRule>),
}

fn default_event_count() -> u32 {
    1
}

impl CompletionRule {
    /// Whether `step` satisfies this rule. Manual rules never auto-complete.
    pub fn is_satisfied(&self, step: &StepState) -> bool {
        match self {
            Self::Manual => false,
            Self::Time { seconds, .. } => step.elapsed_ms >= seconds.saturating_mul(1_000),
            Self::ToolEvent {
                tool_id,
                name,
                count,
            } => step.tool_event_count(tool_id, name) >= *count,
            Self::AllOf(rules) => !rules.is_empty() && rules.iter().all(|r| r.is_satisfied(step)),
            Self::AnyOf(rules) => rules.iter().any(|r| r.is_satisfied(step)),
        }
    }

    /// Whether `step` finishing now activates the next step directly. Only a
    /// reached `time` condition with `autoAdvance` counts; inside composites
    /// only satisfied branches are considered.
    pub fn auto_advances(&self, step: &StepState) -> bool {
        match self {
            Self::Time { auto_advance, .. } => *auto_advance && self.is_satisfied(step),
            Self::AllOf(rules) | Self::AnyOf(rules) => rules
                .iter()
                .any(|r| r.is_satisfied(step) && r.auto_advances(step)),
            Self::Manual | Self::ToolEvent { .. } => false,
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a CompletionRule)) {
        f(self);
        if let Self::AllOf(rules) | Self::AnyOf(rules) = self {
            for rule in rules {
                rule.visit(f);
            }
        }
    }
}

/// Interrupts the running phase until acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRule {
    pub id: String,

    #[serde(default)]
    pub prompt: String,

    pub trigger: CheckpointTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointTrigger {
    #[serde(rename_all = "camelCase")]
    AfterStep { step_id: String },

    /// Run time (excluding pauses) reaches `seconds`
    AtElapsed { seconds: u64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("mission {0} has no steps")]
    NoSteps(String),

    #[error("duplicate step id {0}")]
    DuplicateStep(String),

    #[error("duplicate checkpoint id {0}")]
    DuplicateCheckpoint(String),

    #[error("unknown tool {tool} referenced by {referrer}")]
    UnknownTool { tool: String, referrer: String },

    #[error("tool {tool} does not emit event {event} (step {step})")]
    UnknownToolEvent {
        tool: String,
        event: String,
        step: String,
    },

    #[error("unknown layout {0}")]
    UnknownLayout(String),

    #[error("checkpoint {checkpoint} references unknown step {step}")]
    UnknownStep { checkpoint: String, step: String },

    #[error("step {0} has an empty allOf/anyOf rule")]
    EmptyComposite(String),
}

impl MissionDefinition {
    /// Load a definition from a YAML or JSON file (by extension).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mission from {}", path.display()))?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let definition: Self = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse mission from {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse mission from {}", path.display()))?
        };
        Ok(definition)
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    pub fn checkpoint(&self, id: &str) -> Option<&CheckpointRule> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    /// Check internal consistency and that every referenced tool and layout
    /// is registered.
    pub fn validate(
        &self,
        tools: &ToolRegistry,
        layouts: &LayoutRegistry,
    ) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(self.id.clone()));
        }

        if let Some(layout) = &self.layout {
            if !layouts.has(layout) {
                return Err(DefinitionError::UnknownLayout(layout.clone()));
            }
        }

        let require_tool = |tool: &str, referrer: &str| {
            if tools.has(tool) {
                Ok(())
            } else {
                Err(DefinitionError::UnknownTool {
                    tool: tool.to_string(),
                    referrer: referrer.to_string(),
                })
            }
        };

        for tool in &self.tools {
            require_tool(tool, &format!("mission {}", self.id))?;
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(DefinitionError::DuplicateStep(step.id.clone()));
            }
            if let Some(tool) = &step.tool_id {
                require_tool(tool, &format!("step {}", step.id))?;
            }

            let mut problem = None;
            step.completion.visit(&mut |rule| {
                if problem.is_some() {
                    return;
                }
                match rule {
                    CompletionRule::AllOf(rules) | CompletionRule::AnyOf(rules)
                        if rules.is_empty() =>
                    {
                        problem = Some(DefinitionError::EmptyComposite(step.id.clone()));
                    }
                    CompletionRule::ToolEvent { tool_id, name, .. } => {
                        problem = match tools.get(tool_id) {
                            None => Some(DefinitionError::UnknownTool {
                                tool: tool_id.clone(),
                                referrer: format!("step {}", step.id),
                            }),
                            Some(tool) if !tool.events.is_empty() && !tool.events.contains(name) => {
                                Some(DefinitionError::UnknownToolEvent {
                                    tool: tool_id.clone(),
                                    event: name.clone(),
                                    step: step.id.clone(),
                                })
                            }
                            Some(_) => None,
                        };
                    }
                    _ => {}
                }
            });
            if let Some(problem) = problem {
                return Err(problem);
            }
        }

        let mut seen_checkpoints = HashSet::new();
        for checkpoint in &self.checkpoints {
            if !seen_checkpoints.insert(checkpoint.id.as_str()) {
                return Err(DefinitionError::DuplicateCheckpoint(checkpoint.id.clone()));
            }
            if let CheckpointTrigger::AfterStep { step_id } = &checkpoint.trigger {
                if !seen.contains(step_id.as_str()) {
                    return Err(DefinitionError::UnknownStep {
                        checkpoint: checkpoint.id.clone(),
                        step: step_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
