//! Session store - shell workspaces with filtered views and local persistence.

mod legacy;
mod model;
mod store;
mod tasks;

pub use legacy::{map_world_status, LegacySyncReport, LegacyWorld, WORLD_ID_FIELD};
pub use model::{
    display_order, PersistedSessions, Session, SessionFilter, SessionPatch, SessionStatus,
    STORE_VERSION,
};
pub use store::{generate_session_id, ListenerId, SessionStore};
pub use tasks::{spawn_autosave, spawn_legacy_sync};
