//! Session store - authoritative list of shell sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::SessionsConfig;
use crate::ids::generate_id;
use crate::storage::KeyValueStore;
use crate::task::Debounce;

use super::legacy::{parse_legacy_worlds, world_id_of, LegacySyncReport};
use super::model::{
    display_order, PersistedSessions, Session, SessionFilter, SessionPatch, SessionStatus,
    STORE_VERSION,
};

pub type ListenerId = u64;
type Listener = Arc<dyn Fn() + Send + Sync>;

/// In-memory session map with filtered views and debounced persistence.
///
/// Storage failures never surface to callers: they are logged and the store
/// carries on with whatever it has in memory.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: SessionsConfig,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    save_wake: Notify,
    // Held across a whole flush so snapshots reach storage in order
    // without blocking mutations on I/O.
    writer: Mutex<()>,
}

struct Inner {
    sessions: BTreeMap<String, Session>,
    active_session_id: Option<String>,
    active_app_id: Option<String>,
    cache: HashMap<SessionFilter, Arc<[Session]>>,
    save: Debounce,
    revision: u64,
    last_legacy_raw: Option<String>,
}

impl Inner {
    fn touch(&mut self) {
        self.cache.clear();
        self.revision += 1;
        self.save.schedule(Instant::now());
    }

    fn snapshot(&self) -> PersistedSessions {
        PersistedSessions {
            version: STORE_VERSION,
            sessions: self.sessions.values().cloned().collect(),
            active_session_id: self.active_session_id.clone(),
            active_app_id: self.active_app_id.clone(),
        }
    }

    fn clear_active_if(&mut self, id: &str) {
        if self.active_session_id.as_deref() == Some(id) {
            self.active_session_id = None;
        }
    }
}

impl SessionStore {
    /// Open the store, loading whatever is persisted under the sessions key.
    pub fn open(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: SessionsConfig,
    ) -> Self {
        let persisted = load_persisted(storage.as_ref(), &config.storage_key);

        let sessions: BTreeMap<String, Session> = persisted
            .sessions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let active_session_id = persisted
            .active_session_id
            .filter(|id| sessions.contains_key(id));

        tracing::debug!(
            sessions = sessions.len(),
            key = %config.storage_key,
            "Session store opened"
        );

        Self {
            storage,
            clock,
            inner: Mutex::new(Inner {
                sessions,
                active_session_id,
                active_app_id: persisted.active_app_id,
                cache: HashMap::new(),
                save: Debounce::new(Duration::from_millis(config.save_debounce_ms)),
                revision: 0,
                last_legacy_raw: None,
            }),
            config,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            save_wake: Notify::new(),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a mutation. `f` returns `None` for a no-op; anything else
    /// invalidates views, schedules a save and notifies listeners.
    fn mutate<R>(&self, f: impl FnOnce(&mut Inner, i64) -> Option<R>) -> Option<R> {
        let now = self.clock.now_ms();
        let result = {
            let mut inner = self.lock();
            let result = f(&mut inner, now);
            if result.is_some() {
                inner.touch();
            }
            result
        };

        if result.is_some() {
            self.after_mutation();
        }
        result
    }

    fn after_mutation(&self) {
        self.save_wake.notify_one();
        self.notify();
    }

    // ---------------------------------------------
    // Reads
    // ---------------------------------------------

    /// Sessions matching `filter`, pinned first then most recently opened.
    ///
    /// Repeated calls with an equal filter and no mutation in between return
    /// the same allocation, so pollers can compare with `Arc::ptr_eq`.
    pub fn get_sessions(&self, filter: &SessionFilter) -> Arc<[Session]> {
        let mut inner = self.lock();
        if let Some(hit) = inner.cache.get(filter) {
            return hit.clone();
        }

        let mut list: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        list.sort_by(display_order);

        let list: Arc<[Session]> = list.into();
        inner.cache.insert(filter.clone(), list.clone());
        list
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.lock().sessions.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.lock().active_session_id.clone()
    }

    pub fn active_session(&self) -> Option<Session> {
        let inner = self.lock();
        let id = inner.active_session_id.as_ref()?;
        inner.sessions.get(id).cloned()
    }

    pub fn active_app_id(&self) -> Option<String> {
        self.lock().active_app_id.clone()
    }

    /// Incremented on every effective mutation.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub fn snapshot(&self) -> PersistedSessions {
        self.lock().snapshot()
    }

    // ---------------------------------------------
    // Mutations
    // ---------------------------------------------

    /// Create a session and make it the active one.
    pub fn create_session(&self, app_id: &str, title: Option<&str>, data: Option<Value>) -> Session {
        let now = self.clock.now_ms();
        let session = {
            let mut inner = self.lock();
            let mut id = generate_session_id(now);
            while inner.sessions.contains_key(&id) {
                id = generate_session_id(now);
            }

            let session = Session {
                id: id.clone(),
                app_id: app_id.to_string(),
                title: title
                    .map(str::to_string)
                    .unwrap_or_else(|| "Untitled session".to_string()),
                pinned: false,
                archived: false,
                status: SessionStatus::Idle,
                data: data.unwrap_or(Value::Null),
                created_at: now,
                updated_at: now,
                last_opened_at: now,
            };
            inner.sessions.insert(id.clone(), session.clone());
            inner.active_session_id = Some(id);
            inner.touch();
            session
        };
        self.after_mutation();

        tracing::info!(session_id = %session.id, app_id = %session.app_id, "Session created");
        session
    }

    /// Merge `patch` into a session. Unknown ids are ignored.
    pub fn update_session(&self, id: &str, patch: SessionPatch) -> Option<Session> {
        self.mutate(|inner, now| {
            let session = inner.sessions.get_mut(id)?;
            patch.apply(session);
            session.updated_at = now;
            let updated = session.clone();
            if updated.archived {
                inner.clear_active_if(id);
            }
            Some(updated)
        })
    }

    /// Select a session (or none). Returns whether anything changed.
    ///
    /// Selecting a session from another app leaves `active_app_id` alone.
    pub fn set_active_session(&self, id: Option<&str>) -> bool {
        self.mutate(|inner, now| match id {
            None => {
                inner.active_session_id.take()?;
                Some(())
            }
            Some(id) => {
                if inner.active_session_id.as_deref() == Some(id) {
                    return None;
                }
                let session = inner.sessions.get_mut(id)?;
                session.last_opened_at = session.last_opened_at.max(now);
                session.updated_at = now;
                inner.active_session_id = Some(id.to_string());
                Some(())
            }
        })
        .is_some()
    }

    /// Switch app scope, dropping an active session that belongs elsewhere.
    pub fn set_active_app(&self, app_id: &str) -> bool {
        self.mutate(|inner, _now| {
            if inner.active_app_id.as_deref() == Some(app_id) {
                return None;
            }
            inner.active_app_id = Some(app_id.to_string());

            let foreign = inner
                .active_session_id
                .as_ref()
                .and_then(|id| inner.sessions.get(id))
                .is_some_and(|s| s.app_id != app_id);
            if foreign {
                inner.active_session_id = None;
            }
            Some(())
        })
        .is_some()
    }

    /// Flip the pinned flag, returning the new value.
    pub fn toggle_pin(&self, id: &str) -> Option<bool> {
        self.mutate(|inner, now| {
            let session = inner.sessions.get_mut(id)?;
            session.pinned = !session.pinned;
            session.updated_at = now;
            Some(session.pinned)
        })
    }

    pub fn archive_session(&self, id: &str) -> bool {
        self.mutate(|inner, now| {
            let session = inner.sessions.get_mut(id)?;
            if session.archived {
                return None;
            }
            session.archived = true;
            session.updated_at = now;
            inner.clear_active_if(id);
            Some(())
        })
        .is_some()
    }

    pub fn unarchive_session(&self, id: &str) -> bool {
        self.mutate(|inner, now| {
            let session = inner.sessions.get_mut(id)?;
            if !session.archived {
                return None;
            }
            session.archived = false;
            session.updated_at = now;
            Some(())
        })
        .is_some()
    }

    pub fn delete_session(&self, id: &str) -> Option<Session> {
        let removed = self.mutate(|inner, _now| {
            let removed = inner.sessions.remove(id)?;
            inner.clear_active_if(id);
            Some(removed)
        });
        if removed.is_some() {
            tracing::info!(session_id = %id, "Session deleted");
        }
        removed
    }

    /// Pull the legacy recent-worlds payload into sessions.
    ///
    /// Unchanged payloads are skipped by raw comparison; a pass that changes
    /// nothing does not notify.
    pub fn sync_legacy_recent_worlds(&self) -> LegacySyncReport {
        let key = &self.config.legacy_key;
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LegacySyncReport::default(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read legacy recent worlds");
                return LegacySyncReport::default();
            }
        };

        {
            let mut inner = self.lock();
            if inner.last_legacy_raw.as_deref() == Some(raw.as_str()) {
                return LegacySyncReport {
                    unchanged: true,
                    ..LegacySyncReport::default()
                };
            }
            inner.last_legacy_raw = Some(raw.clone());
        }

        let worlds = match parse_legacy_worlds(&raw) {
            Ok(worlds) => worlds,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to parse legacy recent worlds");
                return LegacySyncReport::default();
            }
        };

        let app_id = self.config.legacy_app_id.as_str();
        let report = self.mutate(|inner, now| {
            let mut report = LegacySyncReport::default();
            let mut by_world: HashMap<String, String> = inner
                .sessions
                .values()
                .filter(|s| s.app_id == app_id)
                .filter_map(|s| world_id_of(s).map(|w| (w.to_string(), s.id.clone())))
                .collect();

            for world in &worlds {
                if let Some(session_id) = by_world.get(&world.id) {
                    if let Some(session) = inner.sessions.get_mut(session_id) {
                        if world.merge_into(session) {
                            session.updated_at = now;
                            report.updated += 1;
                        }
                    }
                    continue;
                }

                let mut id = generate_session_id(now);
                while inner.sessions.contains_key(&id) {
                    id = generate_session_id(now);
                }
                let created_at = world.created_at.unwrap_or(now);
                inner.sessions.insert(
                    id.clone(),
                    Session {
                        id: id.clone(),
                        app_id: app_id.to_string(),
                        title: world.title(),
                        pinned: false,
                        archived: false,
                        status: world.session_status(),
                        data: world.session_data(),
                        created_at,
                        updated_at: now,
                        last_opened_at: created_at,
                    },
                );
                by_world.insert(world.id.clone(), id);
                report.created += 1;
            }

            report.changed().then_some(report)
        });

        match report {
            Some(report) => {
                tracing::debug!(
                    created = report.created,
                    updated = report.updated,
                    "Legacy recent worlds synced"
                );
                report
            }
            None => LegacySyncReport::default(),
        }
    }

    // ---------------------------------------------
    // Listeners
    // ---------------------------------------------

    /// Register a change listener. Listeners run synchronously after each
    /// effective mutation, outside the store lock.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }

    // ---------------------------------------------
    // Persistence
    // ---------------------------------------------

    pub fn has_pending_save(&self) -> bool {
        self.lock().save.is_pending()
    }

    pub fn next_save_deadline(&self) -> Option<Instant> {
        self.lock().save.deadline()
    }

    pub(crate) async fn save_requested(&self) {
        self.save_wake.notified().await;
    }

    /// Write now if a save is pending. Safe to call repeatedly.
    pub fn flush(&self) -> bool {
        self.write_if(|save| save.take())
    }

    /// Write if the quiet period has elapsed.
    pub fn flush_if_due(&self) -> bool {
        self.write_if(|save| save.is_due(Instant::now()) && save.take())
    }

    /// Snapshot under the state lock when `due` says so, then write with
    /// only the writer lock held.
    fn write_if(&self, due: impl FnOnce(&mut Debounce) -> bool) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let (snapshot, count) = {
            let mut inner = self.lock();
            if !due(&mut inner.save) {
                return false;
            }
            (inner.snapshot(), inner.sessions.len())
        };

        let key = &self.config.storage_key;
        let blob = match serde_json::to_string(&snapshot) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize sessions");
                return true;
            }
        };
        match self.storage.set(key, &blob) {
            Ok(()) => tracing::debug!(key = %key, sessions = count, "Sessions saved"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to save sessions"),
        }
        true
    }
}

fn empty_state() -> PersistedSessions {
    PersistedSessions {
        version: STORE_VERSION,
        sessions: Vec::new(),
        active_session_id: None,
        active_app_id: None,
    }
}

fn load_persisted(storage: &dyn KeyValueStore, key: &str) -> PersistedSessions {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return empty_state(),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to read sessions, starting empty");
            return empty_state();
        }
    };

    match serde_json::from_str::<PersistedSessions>(&raw) {
        Ok(state) if state.version == STORE_VERSION => state,
        Ok(state) => {
            tracing::warn!(
                key = %key,
                found = state.version,
                expected = STORE_VERSION,
                "Session store version mismatch, starting empty"
            );
            empty_state()
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to parse sessions, starting empty");
            empty_state()
        }
    }
}

/// `sess_<timestamp base36>_<6 random base36 chars>`
pub fn generate_session_id(now_ms: i64) -> String {
    generate_id("sess", now_ms)
}
