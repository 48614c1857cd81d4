//! Glia Core - state layer for the Glia shell
//!
//! This crate provides the session store (filtered, cached and persisted
//! workspace records with a legacy recent-worlds migration) and the mission
//! runtime (a pure reducer over typed mission events with tool and layout
//! registries and pluggable persistence and sync adapters).

pub mod clock;
pub mod config;
pub mod ids;
pub mod mission;
pub mod session;
pub mod storage;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ShellConfig;
pub use mission::{MissionDefinition, MissionRuntime, MissionState};
pub use session::{Session, SessionFilter, SessionStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use task::TaskHandle;
