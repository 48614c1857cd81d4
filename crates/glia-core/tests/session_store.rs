use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glia_core::config::SessionsConfig;
use glia_core::session::{
    spawn_autosave, spawn_legacy_sync, PersistedSessions, SessionFilter, SessionPatch,
    SessionStatus, SessionStore, STORE_VERSION,
};
use glia_core::{FileStore, KeyValueStore, ManualClock, MemoryStore};

struct Fixture {
    storage: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    store: Arc<SessionStore>,
}

fn fixture() -> Fixture {
    let storage = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(SessionStore::open(
        storage.clone(),
        clock.clone(),
        SessionsConfig::default(),
    ));
    Fixture {
        storage,
        clock,
        store,
    }
}

fn counter(store: &SessionStore) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    store.subscribe(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[test]
fn ids_stay_unique_across_create_update_delete() {
    let f = fixture();
    let mut live = HashSet::new();

    for i in 0..50 {
        let session = f.store.create_session("notes", Some(&format!("n{i}")), None);
        assert!(live.insert(session.id.clone()), "duplicate id {}", session.id);

        if i % 3 == 0 {
            f.store.update_session(
                &session.id,
                SessionPatch {
                    status: Some(SessionStatus::Running),
                    ..SessionPatch::default()
                },
            );
        }
        if i % 5 == 0 {
            assert!(f.store.delete_session(&session.id).is_some());
            live.remove(&session.id);
        }
    }

    let listed = f.store.get_sessions(&SessionFilter::all());
    let ids: HashSet<String> = listed.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids.len(), listed.len());
    assert_eq!(ids, live);
}

#[test]
fn repeated_reads_share_one_allocation() {
    let f = fixture();
    f.store.create_session("notes", None, None);

    let filter = SessionFilter::app("notes").with_archived(false);
    let first = f.store.get_sessions(&filter);
    let second = f.store.get_sessions(&filter.clone());
    assert!(Arc::ptr_eq(&first, &second));

    f.store.create_session("notes", None, None);
    let third = f.store.get_sessions(&filter);
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.len(), 2);
}

#[test]
fn filter_values_with_separators_do_not_collide() {
    let f = fixture();
    f.store.create_session("a|b", None, None);
    f.store.create_session("a", None, None);

    assert_eq!(f.store.get_sessions(&SessionFilter::app("a|b")).len(), 1);
    assert_eq!(f.store.get_sessions(&SessionFilter::app("a")).len(), 1);
    assert_eq!(f.store.get_sessions(&SessionFilter::app("a|")).len(), 0);
}

#[test]
fn pinned_first_then_most_recently_opened() {
    let f = fixture();
    let old = f.store.create_session("notes", Some("old"), None);
    f.clock.advance(10);
    let mid = f.store.create_session("notes", Some("mid"), None);
    f.clock.advance(10);
    let new = f.store.create_session("notes", Some("new"), None);

    assert_eq!(f.store.toggle_pin(&old.id), Some(true));

    let order: Vec<String> = f
        .store
        .get_sessions(&SessionFilter::all())
        .iter()
        .map(|s| s.title.clone())
        .collect();
    assert_eq!(order, vec!["old", "new", "mid"]);

    f.clock.advance(10);
    assert!(f.store.set_active_session(Some(&mid.id)));
    let order: Vec<String> = f
        .store
        .get_sessions(&SessionFilter::all())
        .iter()
        .map(|s| s.id.clone())
        .collect();
    assert_eq!(order, vec![old.id.clone(), mid.id.clone(), new.id.clone()]);

    let pinned = f.store.get_sessions(&SessionFilter::all().with_pinned(true));
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].id, old.id);
}

#[test]
fn selecting_a_session_from_another_app_keeps_the_active_app() {
    let f = fixture();
    let chat = f.store.create_session("chat", None, None);
    let world = f.store.create_session("worlds", None, None);

    assert!(f.store.set_active_app("chat"));
    assert_eq!(f.store.active_session_id(), None);

    assert!(f.store.set_active_session(Some(&world.id)));
    assert_eq!(f.store.active_session_id(), Some(world.id.clone()));
    assert_eq!(f.store.active_app_id().as_deref(), Some("chat"));

    // Switching app scope does drop the foreign selection.
    assert!(f.store.set_active_app("notes"));
    assert_eq!(f.store.active_session_id(), None);

    assert!(f.store.set_active_session(Some(&chat.id)));
    assert!(!f.store.set_active_app("notes"));
    assert_eq!(f.store.active_session_id(), Some(chat.id));
}

#[test]
fn archiving_and_deleting_clear_the_active_pointer() {
    let f = fixture();
    let a = f.store.create_session("notes", None, None);
    assert_eq!(f.store.active_session_id(), Some(a.id.clone()));

    assert!(f.store.archive_session(&a.id));
    assert_eq!(f.store.active_session_id(), None);
    assert!(!f.store.archive_session(&a.id));
    assert!(f
        .store
        .get_sessions(&SessionFilter::all().with_archived(false))
        .is_empty());
    assert!(f.store.unarchive_session(&a.id));

    let b = f.store.create_session("notes", None, None);
    assert!(f.store.delete_session(&b.id).is_some());
    assert_eq!(f.store.active_session_id(), None);
    assert!(f.store.delete_session(&b.id).is_none());
}

#[test]
fn archiving_through_a_patch_clears_the_active_pointer() {
    let f = fixture();
    let a = f.store.create_session("notes", None, None);
    let b = f.store.create_session("notes", None, None);
    assert_eq!(f.store.active_session_id(), Some(b.id.clone()));

    // Archiving a session that is not selected leaves the selection alone.
    let archived = f.store.update_session(
        &a.id,
        SessionPatch {
            archived: Some(true),
            ..SessionPatch::default()
        },
    );
    assert!(archived.unwrap().archived);
    assert_eq!(f.store.active_session_id(), Some(b.id.clone()));

    f.store.update_session(
        &b.id,
        SessionPatch {
            archived: Some(true),
            title: Some("Old".to_string()),
            ..SessionPatch::default()
        },
    );
    assert_eq!(f.store.active_session_id(), None);
    assert_eq!(f.store.get_session(&b.id).unwrap().title, "Old");
}

#[test]
fn clearing_the_selection_notifies_once() {
    let f = fixture();
    let session = f.store.create_session("notes", None, None);
    let notified = counter(&f.store);

    assert!(f.store.set_active_session(None));
    assert_eq!(f.store.active_session_id(), None);
    assert!(f.store.active_session().is_none());
    assert!(!f.store.set_active_session(None));
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // The session itself is untouched.
    assert!(f.store.get_session(&session.id).is_some());
}

#[test]
fn last_opened_never_moves_backwards() {
    let f = fixture();
    let a = f.store.create_session("notes", None, None);
    f.clock.set(5_000);
    let b = f.store.create_session("notes", None, None);
    assert_eq!(b.last_opened_at, 5_000);

    f.clock.set(3_000);
    assert!(f.store.set_active_session(Some(&a.id)));
    assert_eq!(f.store.get_session(&a.id).unwrap().last_opened_at, 3_000);

    f.clock.set(2_000);
    assert!(f.store.set_active_session(Some(&b.id)));
    assert_eq!(f.store.get_session(&b.id).unwrap().last_opened_at, 5_000);
    assert_eq!(f.store.get_session(&a.id).unwrap().last_opened_at, 3_000);
}

#[test]
fn no_op_mutations_do_not_notify() {
    let f = fixture();
    let session = f.store.create_session("notes", None, None);
    let notified = counter(&f.store);

    assert!(!f.store.set_active_session(Some(&session.id)));
    assert!(!f.store.set_active_session(Some("missing")));
    assert!(f.store.update_session("missing", SessionPatch::default()).is_none());
    assert_eq!(f.store.toggle_pin("missing"), None);
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    f.store.toggle_pin(&session.id);
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn legacy_sync_creates_once_and_then_stays_quiet() {
    let f = fixture();
    f.storage
        .set(
            "glia.recentWorlds",
            r#"[{"id":"w1","name":"Foo","status":"building"}]"#,
        )
        .unwrap();
    let notified = counter(&f.store);

    let first = f.store.sync_legacy_recent_worlds();
    assert_eq!(first.created, 1);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    let sessions = f.store.get_sessions(&SessionFilter::app("worlds"));
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "Foo");
    assert_eq!(sessions[0].status, SessionStatus::Running);
    assert_eq!(sessions[0].data["worldId"], "w1");
    assert_eq!(f.store.active_session_id(), None);

    let second = f.store.sync_legacy_recent_worlds();
    assert!(second.unchanged);
    assert!(!second.changed());
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(f.store.len(), 1);
}

#[test]
fn legacy_sync_merges_changed_worlds() {
    let f = fixture();
    f.storage
        .set("glia.recentWorlds", r#"[{"id":"w1","name":"Foo","status":"building"}]"#)
        .unwrap();
    f.store.sync_legacy_recent_worlds();
    let id = f.store.get_sessions(&SessionFilter::all())[0].id.clone();
    f.store
        .update_session(
            &id,
            SessionPatch {
                data: Some(serde_json::json!({"worldId": "w1", "camera": "orbit"})),
                ..SessionPatch::default()
            },
        )
        .unwrap();

    f.storage
        .set(
            "glia.recentWorlds",
            r#"[{"id":"w1","name":"Foo II","status":"complete","generation":4},{"id":"w2"}]"#,
        )
        .unwrap();
    let report = f.store.sync_legacy_recent_worlds();
    assert_eq!((report.created, report.updated), (1, 1));

    let merged = f.store.get_session(&id).unwrap();
    assert_eq!(merged.title, "Foo II");
    assert_eq!(merged.status, SessionStatus::Completed);
    assert_eq!(merged.data["generation"], 4);
    assert_eq!(merged.data["camera"], "orbit");

    let titles: Vec<String> = f
        .store
        .get_sessions(&SessionFilter::app("worlds"))
        .iter()
        .map(|s| s.title.clone())
        .collect();
    assert!(titles.contains(&"World w2".to_string()));
}

#[test]
fn corrupt_or_foreign_blobs_load_as_empty() {
    let storage = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));

    storage.set("glia.sessions", "{not json").unwrap();
    let store = SessionStore::open(storage.clone(), clock.clone(), SessionsConfig::default());
    assert!(store.is_empty());

    let future = PersistedSessions {
        version: STORE_VERSION + 1,
        sessions: Vec::new(),
        active_session_id: None,
        active_app_id: Some("chat".to_string()),
    };
    storage
        .set("glia.sessions", &serde_json::to_string(&future).unwrap())
        .unwrap();
    let store = SessionStore::open(storage, clock, SessionsConfig::default());
    assert!(store.is_empty());
    assert_eq!(store.active_app_id(), None);

    // The store still works after a bad load.
    store.create_session("chat", None, None);
    assert_eq!(store.len(), 1);
}

#[test]
fn flush_writes_once_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));
    let clock = Arc::new(ManualClock::new(5_000));

    let store = SessionStore::open(storage.clone(), clock.clone(), SessionsConfig::default());
    let session = store.create_session("notes", Some("Draft"), None);
    store.set_active_app("notes");
    assert!(store.has_pending_save());
    assert!(store.flush());
    assert!(!store.flush());

    let reopened = SessionStore::open(storage, clock, SessionsConfig::default());
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.active_session_id(), Some(session.id.clone()));
    assert_eq!(reopened.active_app_id().as_deref(), Some("notes"));
    assert_eq!(reopened.get_session(&session.id).unwrap().title, "Draft");
}

#[tokio::test(start_paused = true)]
async fn autosave_waits_for_a_quiet_period() {
    let f = fixture();
    let _autosave = spawn_autosave(f.store.clone());

    f.store.create_session("notes", None, None);
    tokio::time::sleep(Duration::from_millis(300)).await;
    f.store.create_session("notes", None, None);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(f.storage.get("glia.sessions").unwrap().is_none());
    assert!(f.store.has_pending_save());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let raw = f.storage.get("glia.sessions").unwrap().unwrap();
    let persisted: PersistedSessions = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted.version, STORE_VERSION);
    assert_eq!(persisted.sessions.len(), 2);
    assert!(!f.store.has_pending_save());
}

#[tokio::test(start_paused = true)]
async fn autosave_writes_to_disk_without_holding_up_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(SessionStore::open(
        storage.clone(),
        clock.clone(),
        SessionsConfig::default(),
    ));
    let _autosave = spawn_autosave(store.clone());

    let first = store.create_session("notes", Some("First"), None);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!store.has_pending_save());

    let second = store.create_session("notes", Some("Second"), None);
    assert!(store.has_pending_save());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!store.has_pending_save());

    let reopened = SessionStore::open(storage, clock, SessionsConfig::default());
    assert_eq!(reopened.len(), 2);
    assert!(reopened.get_session(&first.id).is_some());
    assert_eq!(reopened.active_session_id(), Some(second.id));
}

#[tokio::test(start_paused = true)]
async fn legacy_poll_picks_up_new_worlds() {
    let f = fixture();
    let mut poll = spawn_legacy_sync(f.store.clone(), Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(f.store.is_empty());

    f.storage
        .set("glia.recentWorlds", r#"[{"id":"w1","name":"Foo"}]"#)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.store.len(), 1);

    poll.cancel();
    f.storage
        .set("glia.recentWorlds", r#"[{"id":"w1"},{"id":"w2"}]"#)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(f.store.len(), 1);
}
