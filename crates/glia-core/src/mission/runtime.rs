//! Mission runtime - owns one run and wires the reducer to its adapters.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ShellConfig;
use crate::ids::generate_id;
use crate::task::{spawn_periodic, TaskHandle};

use super::definition::MissionDefinition;
use super::event::{MissionEvent, MissionEventKind};
use super::persistence::{MissionPersistence, NoopPersistence};
use super::reducer::reduce;
use super::registry::ToolRegistry;
use super::state::{MissionState, DEFAULT_EVENT_LOG_CAPACITY};
use super::sync::{NoopPodSync, PodSync, SyncSubscription};

/// Adapters and knobs for a `MissionRuntime`.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub event_log_capacity: usize,
    /// Period of the background ticker and step size of `advance`
    pub tick_period: Duration,
    /// Registered tools; default-open ones are opened when the run starts
    pub tools: Arc<ToolRegistry>,
    pub persistence: Arc<dyn MissionPersistence>,
    pub sync: Arc<dyn PodSync>,
    pub clock: Arc<dyn Clock>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            tick_period: Duration::from_secs(1),
            tools: Arc::new(ToolRegistry::new("tool")),
            persistence: Arc::new(NoopPersistence),
            sync: Arc::new(NoopPodSync),
            clock: Arc::new(SystemClock),
        }
    }
}

impl RuntimeOptions {
    /// Options carrying the shell's mission settings and tool registry.
    pub fn from_config(config: &ShellConfig) -> Self {
        Self::default()
            .with_event_log_capacity(config.missions.event_log_capacity)
            .with_tick_period(config.missions.tick_period())
            .with_tools(config.tool_registry())
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn MissionPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_sync(mut self, sync: Arc<dyn PodSync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }
}

/// Drives one run of a mission.
///
/// Callers dispatch event kinds; the runtime stamps them with the run id,
/// the clock's time and its own instance id, reduces, persists and
/// publishes. Persistence failures are logged and never surface to the
/// caller. Timer ticks stay local so participants sharing a run through
/// `PodSync` each count their own time.
pub struct MissionRuntime {
    definition: Arc<MissionDefinition>,
    run_id: String,
    instance_id: String,
    options: RuntimeOptions,
    state: Mutex<Arc<MissionState>>,
    updates: watch::Sender<Arc<MissionState>>,
    subscription: Mutex<Option<SyncSubscription>>,
}

impl MissionRuntime {
    /// Fresh run with a generated id.
    pub fn start_new(definition: Arc<MissionDefinition>, options: RuntimeOptions) -> Self {
        let run_id = generate_id("run", options.clock.now_ms());
        Self::new(definition, run_id, options)
    }

    /// Pick up `run_id` from persistence, or start it fresh if nothing
    /// usable is stored.
    pub fn resume(
        definition: Arc<MissionDefinition>,
        run_id: impl Into<String>,
        options: RuntimeOptions,
    ) -> Self {
        let runtime = Self::new(definition, run_id.into(), options);
        runtime.restore();
        runtime
    }

    fn new(definition: Arc<MissionDefinition>, run_id: String, options: RuntimeOptions) -> Self {
        let initial = Arc::new(runtime_fresh_state(&definition, &run_id, &options));
        let (updates, _) = watch::channel(initial.clone());
        let instance_id = generate_id("rt", options.clock.now_ms());
        debug!(run_id = %run_id, mission = %definition.id, "Mission runtime created");
        Self {
            definition,
            run_id,
            instance_id,
            options,
            state: Mutex::new(initial),
            updates,
            subscription: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn definition(&self) -> &MissionDefinition {
        &self.definition
    }

    pub fn state(&self) -> Arc<MissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Receiver that sees every applied state.
    pub fn watch(&self) -> watch::Receiver<Arc<MissionState>> {
        self.updates.subscribe()
    }

    /// Replace the current state with the persisted one, if any.
    ///
    /// Returns whether a stored state was adopted. Unreadable state and
    /// state belonging to a different mission are ignored.
    pub fn restore(&self) -> bool {
        let stored = match self.options.persistence.load(&self.run_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => return false,
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "Failed to load mission run");
                return false;
            }
        };
        if stored.definition_id != self.definition.id {
            warn!(
                run_id = %self.run_id,
                stored = %stored.definition_id,
                expected = %self.definition.id,
                "Stored run belongs to another mission, ignoring"
            );
            return false;
        }

        let stored = Arc::new(stored);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = stored.clone();
        self.updates.send_replace(stored);
        info!(run_id = %self.run_id, "Restored mission run");
        true
    }

    /// Apply a locally produced event. Returns the resulting state.
    ///
    /// A successful `mission/start` is followed by `tool/open` for every
    /// mission tool registered as default-open.
    pub fn dispatch(&self, kind: MissionEventKind) -> Arc<MissionState> {
        let local_only = matches!(kind, MissionEventKind::TimerTick { .. });
        let starting = matches!(kind, MissionEventKind::MissionStart);
        let event = MissionEvent {
            run_id: self.run_id.clone(),
            at: self.options.clock.now_ms(),
            origin: Some(self.instance_id.clone()),
            event: kind,
        };

        match self.apply(&event) {
            Some(next) => {
                if !local_only {
                    self.options.sync.publish(&event);
                }
                if starting {
                    return self.open_default_tools(next);
                }
                next
            }
            None => self.state(),
        }
    }

    fn open_default_tools(&self, mut state: Arc<MissionState>) -> Arc<MissionState> {
        for tool_id in &self.definition.tools {
            let default_open = self
                .options
                .tools
                .get(tool_id)
                .is_some_and(|tool| tool.default_open);
            if default_open {
                state = self.dispatch(MissionEventKind::tool_open(tool_id.clone()));
            }
        }
        state
    }

    /// Dispatch ticks of the configured period until `elapsed` is covered;
    /// the last tick carries the remainder.
    pub fn advance(&self, elapsed: Duration) -> Arc<MissionState> {
        let period = duration_ms(self.options.tick_period).max(1);
        let mut remaining = duration_ms(elapsed);
        let mut state = self.state();
        while remaining > 0 {
            let delta = remaining.min(period);
            state = self.dispatch(MissionEventKind::tick(delta));
            remaining -= delta;
        }
        state
    }

    /// Background ticker at the configured period.
    pub fn start_ticker(self: &Arc<Self>) -> TaskHandle {
        spawn_ticker(self.clone(), self.options.tick_period)
    }

    /// Apply an event received from another participant. Our own echoes and
    /// events for other runs are dropped. Returns whether state changed.
    pub fn apply_remote(&self, event: &MissionEvent) -> bool {
        if event.run_id != self.run_id {
            return false;
        }
        if event.origin.as_deref() == Some(self.instance_id.as_str()) {
            return false;
        }
        self.apply(event).is_some()
    }

    fn apply(&self, event: &MissionEvent) -> Option<Arc<MissionState>> {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let next = reduce(&self.definition, &current, event);
        if next.revision == current.revision {
            debug!(run_id = %self.run_id, event = event.event.name(), "Event had no effect");
            return None;
        }

        if next.status != current.status {
            info!(
                run_id = %self.run_id,
                from = ?current.status,
                to = ?next.status,
                "Mission status changed"
            );
        }

        if let Err(err) = self.options.persistence.save(&next) {
            warn!(run_id = %self.run_id, error = %err, "Failed to persist mission run");
        }

        let next = Arc::new(next);
        *current = next.clone();
        self.updates.send_replace(next.clone());
        Some(next)
    }

    /// Start receiving other participants' events through the sync adapter.
    pub fn connect(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = self.options.sync.subscribe(
            &self.run_id,
            Arc::new(move |event: &MissionEvent| {
                if let Some(runtime) = weak.upgrade() {
                    runtime.apply_remote(event);
                }
            }),
        );
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(subscription);
        drop(previous);
    }

    pub fn disconnect(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Forget the persisted run and go back to a fresh idle state.
    pub fn clear(&self) {
        if let Err(err) = self.options.persistence.clear(&self.run_id) {
            warn!(run_id = %self.run_id, error = %err, "Failed to clear mission run");
        }
        let fresh = Arc::new(runtime_fresh_state(
            &self.definition,
            &self.run_id,
            &self.options,
        ));
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = fresh.clone();
        self.updates.send_replace(fresh);
    }
}

fn runtime_fresh_state(
    definition: &MissionDefinition,
    run_id: &str,
    options: &RuntimeOptions,
) -> MissionState {
    MissionState::new(run_id, definition).with_event_log_capacity(options.event_log_capacity)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Dispatch `timer/tick` every `period` until the handle is dropped.
pub fn spawn_ticker(runtime: Arc<MissionRuntime>, period: Duration) -> TaskHandle {
    let delta_ms = duration_ms(period);
    spawn_periodic("mission-ticker", period, move || {
        runtime.dispatch(MissionEventKind::tick(delta_ms));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mission::definition::{CompletionRule, StepDefinition};
    use crate::mission::persistence::StoragePersistence;
    use crate::mission::registry::ToolDescriptor;
    use crate::mission::state::{MissionStatus, StepStatus};
    use crate::storage::{KeyValueStore, MemoryStore};

    fn definition() -> Arc<MissionDefinition> {
        Arc::new(MissionDefinition {
            id: "intro".to_string(),
            title: "Intro".to_string(),
            description: String::new(),
            layout: None,
            tools: Vec::new(),
            steps: vec![StepDefinition {
                id: "s1".to_string(),
                title: "Read".to_string(),
                tool_id: None,
                completion: CompletionRule::Manual,
            }],
            checkpoints: Vec::new(),
        })
    }

    #[test]
    fn dispatch_stamps_events_and_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let persistence = Arc::new(StoragePersistence::new(store, "glia.mission"));
        let options = RuntimeOptions::default()
            .with_clock(Arc::new(ManualClock::new(42)))
            .with_persistence(persistence.clone());
        let runtime = MissionRuntime::start_new(definition(), options);

        let state = runtime.dispatch(MissionEventKind::MissionStart);
        assert_eq!(state.status, MissionStatus::Active);
        assert_eq!(state.event_log[0].at, 42);
        assert_eq!(state.event_log[0].run_id, runtime.run_id());

        let stored = persistence.load(runtime.run_id()).unwrap().unwrap();
        assert_eq!(stored, *state);
    }

    #[test]
    fn rejected_event_does_not_notify() {
        let runtime = MissionRuntime::start_new(definition(), RuntimeOptions::default());
        let mut rx = runtime.watch();

        runtime.dispatch(MissionEventKind::step_activate("s1"));
        assert!(!rx.has_changed().unwrap());

        runtime.dispatch(MissionEventKind::MissionStart);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().revision, 1);
    }

    #[test]
    fn resume_ignores_other_missions() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let persistence = Arc::new(StoragePersistence::new(store, "glia.mission"));
        let options = RuntimeOptions::default().with_persistence(persistence.clone());

        let mut other = (*definition()).clone();
        other.id = "other".to_string();
        persistence
            .save(&MissionState::new("run_x", &other))
            .unwrap();

        let runtime = MissionRuntime::resume(definition(), "run_x", options);
        assert_eq!(runtime.state().definition_id, "intro");
        assert_eq!(runtime.state().revision, 0);
    }

    #[test]
    fn clear_resets_run() {
        let runtime = MissionRuntime::start_new(definition(), RuntimeOptions::default());
        runtime.dispatch(MissionEventKind::MissionStart);
        runtime.dispatch(MissionEventKind::step_activate("s1"));
        assert_eq!(runtime.state().step_status("s1"), Some(StepStatus::Active));

        runtime.clear();
        assert_eq!(runtime.state().status, MissionStatus::Idle);
        assert_eq!(runtime.state().run_id, runtime.run_id());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_accumulates_elapsed_time() {
        let runtime = Arc::new(MissionRuntime::start_new(
            definition(),
            RuntimeOptions::default(),
        ));
        runtime.dispatch(MissionEventKind::MissionStart);

        let mut ticker = spawn_ticker(runtime.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        ticker.cancel();

        let state = runtime.state();
        assert_eq!(state.metrics.elapsed_ms, 3_000);
        assert_eq!(state.step("s1").unwrap().elapsed_ms, 0);
        assert_eq!(state.event_log.len(), 1);
    }

    #[test]
    fn default_open_tools_open_when_the_run_starts() {
        let mut tools = ToolRegistry::new("tool");
        tools.register("notes", ToolDescriptor::new("notes", "Notes").with_default_open());
        tools.register("map", ToolDescriptor::new("map", "Map"));
        tools.register("chat", ToolDescriptor::new("chat", "Chat").with_default_open());

        let mut def = (*definition()).clone();
        def.tools = vec!["map".to_string(), "notes".to_string()];
        let runtime = MissionRuntime::start_new(
            Arc::new(def),
            RuntimeOptions::default().with_tools(tools),
        );

        let state = runtime.dispatch(MissionEventKind::MissionStart);
        assert_eq!(state.open_tool_ids, vec!["notes".to_string()]);
        assert_eq!(state.active_tool_id.as_deref(), Some("notes"));
        assert_eq!(state.revision, 2);

        // A second start is rejected and opens nothing.
        let again = runtime.dispatch(MissionEventKind::MissionStart);
        assert_eq!(again.revision, 2);
    }

    #[test]
    fn advance_splits_time_into_configured_ticks() {
        let options = RuntimeOptions::default().with_tick_period(Duration::from_millis(400));
        let runtime = MissionRuntime::start_new(definition(), options);
        runtime.dispatch(MissionEventKind::MissionStart);
        let mut rx = runtime.watch();

        let state = runtime.advance(Duration::from_millis(1_000));
        assert_eq!(state.metrics.elapsed_ms, 1_000);
        // 400 + 400 + 200
        assert_eq!(state.revision, 4);
        assert!(rx.has_changed().unwrap());

        let same = runtime.advance(Duration::ZERO);
        assert_eq!(same.revision, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn started_ticker_uses_the_configured_period() {
        let options = RuntimeOptions::default().with_tick_period(Duration::from_millis(250));
        let runtime = Arc::new(MissionRuntime::start_new(definition(), options));
        runtime.dispatch(MissionEventKind::MissionStart);

        let mut ticker = runtime.start_ticker();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        ticker.cancel();

        assert_eq!(runtime.state().metrics.elapsed_ms, 1_000);
    }
}
