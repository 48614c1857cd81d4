//! Mission runtime - guided step flows driven by a pure reducer.

mod definition;
mod event;
mod persistence;
mod reducer;
mod registry;
mod runtime;
mod state;
mod sync;

pub use definition::{
    CheckpointRule, CheckpointTrigger, CompletionRule, DefinitionError, MissionDefinition,
    StepDefinition,
};
pub use event::{MissionEvent, MissionEventKind};
pub use persistence::{
    MissionPersistence, NoopPersistence, PersistenceError, PersistenceResult, StoragePersistence,
};
pub use reducer::reduce;
pub use registry::{LayoutDescriptor, LayoutRegistry, Registry, ToolDescriptor, ToolRegistry};
pub use runtime::{spawn_ticker, MissionRuntime, RuntimeOptions};
pub use state::{
    tool_event_key, MissionMetrics, MissionPhase, MissionState, MissionStatus, StepState,
    StepStatus, DEFAULT_EVENT_LOG_CAPACITY,
};
pub use sync::{
    EventCallback, LoopbackPodSync, NoopPodSync, Participant, PodSync, SyncSubscription,
};
