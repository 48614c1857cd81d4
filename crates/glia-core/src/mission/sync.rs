//! Pod sync - the seam for sharing one mission run between participants.
//!
//! Only in-process implementations ship here; a networked backend plugs in
//! by implementing `PodSync`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::event::MissionEvent;

pub type EventCallback = Arc<dyn Fn(&MissionEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub joined_at: i64,
}

pub trait PodSync: Send + Sync {
    fn publish(&self, event: &MissionEvent);

    fn subscribe(&self, run_id: &str, on_event: EventCallback) -> SyncSubscription;

    fn participants(&self, _run_id: &str) -> Vec<Participant> {
        Vec::new()
    }
}

/// Dropping or calling `unsubscribe` detaches the callback.
pub struct SyncSubscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl SyncSubscription {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl std::fmt::Debug for SyncSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSubscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPodSync;

impl PodSync for NoopPodSync {
    fn publish(&self, _event: &MissionEvent) {}

    fn subscribe(&self, _run_id: &str, _on_event: EventCallback) -> SyncSubscription {
        SyncSubscription::noop()
    }
}

type Subscribers = Arc<Mutex<Vec<(u64, String, EventCallback)>>>;

/// Fans events out to every subscriber of the same run in this process.
#[derive(Default)]
pub struct LoopbackPodSync {
    subscribers: Subscribers,
    next_id: AtomicU64,
    participants: Mutex<BTreeMap<String, Vec<Participant>>>,
}

impl LoopbackPodSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, run_id: &str, participant: Participant) {
        let mut participants = self.participants.lock().unwrap_or_else(|e| e.into_inner());
        let list = participants.entry(run_id.to_string()).or_default();
        list.retain(|p| p.id != participant.id);
        list.push(participant);
    }

    pub fn leave(&self, run_id: &str, participant_id: &str) {
        let mut participants = self.participants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = participants.get_mut(run_id) {
            list.retain(|p| p.id != participant_id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl PodSync for LoopbackPodSync {
    fn publish(&self, event: &MissionEvent) {
        let targets: Vec<EventCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, run_id, _)| *run_id == event.run_id)
            .map(|(_, _, cb)| cb.clone())
            .collect();
        for callback in targets {
            callback(event);
        }
    }

    fn subscribe(&self, run_id: &str, on_event: EventCallback) -> SyncSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, run_id.to_string(), on_event));

        let subscribers = self.subscribers.clone();
        SyncSubscription::new(move || {
            subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(sid, _, _)| *sid != id);
        })
    }

    fn participants(&self, run_id: &str) -> Vec<Participant> {
        self.participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }
}
