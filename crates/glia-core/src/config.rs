//! Shell configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mission::{LayoutDescriptor, LayoutRegistry, ToolDescriptor, ToolRegistry};

/// Main shell configuration, loaded from .glia/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Config version
    pub version: Option<String>,

    /// Durable key-value storage directory (relative to project root)
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Session store configuration
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Mission runtime configuration
    #[serde(default)]
    pub missions: MissionsConfig,

    /// Tool panels registered at startup
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,

    /// Layout presets registered at startup
    #[serde(default)]
    pub layouts: Vec<LayoutDescriptor>,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Key holding the persisted session blob
    #[serde(default = "default_sessions_key")]
    pub storage_key: String,

    /// Key holding the legacy recent-worlds array
    #[serde(default = "default_legacy_key")]
    pub legacy_key: String,

    /// App scope assigned to sessions migrated from legacy worlds
    #[serde(default = "default_legacy_app_id")]
    pub legacy_app_id: String,

    /// Quiet period before a mutation burst is written out
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Legacy recent-worlds polling period
    #[serde(default = "default_legacy_poll_ms")]
    pub legacy_poll_ms: u64,
}

/// Mission runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionsConfig {
    /// Key prefix for persisted mission runs
    #[serde(default = "default_mission_prefix")]
    pub storage_prefix: String,

    /// Maximum number of entries kept in a run's event log
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// Timer tick period
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".glia/storage")
}
fn default_sessions_key() -> String {
    "glia.sessions".to_string()
}
fn default_legacy_key() -> String {
    "glia.recentWorlds".to_string()
}
fn default_legacy_app_id() -> String {
    "worlds".to_string()
}
fn default_save_debounce_ms() -> u64 {
    500
}
fn default_legacy_poll_ms() -> u64 {
    1_000
}
fn default_mission_prefix() -> String {
    "glia.mission".to_string()
}
fn default_event_log_capacity() -> usize {
    200
}
fn default_tick_ms() -> u64 {
    1_000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            storage_key: default_sessions_key(),
            legacy_key: default_legacy_key(),
            legacy_app_id: default_legacy_app_id(),
            save_debounce_ms: default_save_debounce_ms(),
            legacy_poll_ms: default_legacy_poll_ms(),
        }
    }
}

impl Default for MissionsConfig {
    fn default() -> Self {
        Self {
            storage_prefix: default_mission_prefix(),
            event_log_capacity: default_event_log_capacity(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            version: None,
            storage_dir: default_storage_dir(),
            sessions: SessionsConfig::default(),
            missions: MissionsConfig::default(),
            tools: Vec::new(),
            layouts: Vec::new(),
        }
    }
}

impl MissionsConfig {
    /// Ticker period; zero is treated as one millisecond.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl ShellConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .glia/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".glia/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.storage_dir = project_root.join(&self.storage_dir);
    }

    /// Build the tool registry from the configured descriptors.
    pub fn tool_registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new("tool");
        registry.register_many(self.tools.iter().cloned().map(|t| (t.id.clone(), t)));
        registry
    }

    /// Build the layout registry from the configured descriptors.
    pub fn layout_registry(&self) -> LayoutRegistry {
        let mut registry = LayoutRegistry::new("layout");
        registry.register_many(self.layouts.iter().cloned().map(|l| (l.id.clone(), l)));
        registry
    }
}
