//! Session records and the persisted store blob.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Version tag of the persisted blob. Anything else loads as empty state.
pub const STORE_VERSION: u32 = 1;

/// A persisted UI workspace: one open project, one open world, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,

    /// Application scope this session belongs to
    pub app_id: String,

    pub title: String,

    #[serde(default)]
    pub pinned: bool,

    #[serde(default)]
    pub archived: bool,

    #[serde(default)]
    pub status: SessionStatus,

    /// Opaque per-app payload
    #[serde(default)]
    pub data: serde_json::Value,

    pub created_at: i64,
    pub updated_at: i64,
    pub last_opened_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter for `SessionStore::get_sessions`. `None` fields do not filter.
///
/// The filter value itself is the cache key, so field contents can never
/// collide the way joined strings can.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionFilter {
    pub app_id: Option<String>,
    pub pinned: Option<bool>,
    pub archived: Option<bool>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..Self::default()
        }
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.app_id.as_ref().map_or(true, |a| *a == session.app_id)
            && self.pinned.map_or(true, |p| p == session.pinned)
            && self.archived.map_or(true, |a| a == session.archived)
            && self.status.map_or(true, |s| s == session.status)
    }
}

/// Partial update for `SessionStore::update_session`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.pinned.is_none()
            && self.archived.is_none()
            && self.status.is_none()
            && self.data.is_none()
    }

    pub(crate) fn apply(self, session: &mut Session) {
        if let Some(title) = self.title {
            session.title = title;
        }
        if let Some(pinned) = self.pinned {
            session.pinned = pinned;
        }
        if let Some(archived) = self.archived {
            session.archived = archived;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(data) = self.data {
            session.data = data;
        }
    }
}

/// Shape of the blob written under the sessions storage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessions {
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub active_session_id: Option<String>,
    #[serde(default)]
    pub active_app_id: Option<String>,
}

/// Pinned first, then most recently opened.
pub fn display_order(a: &Session, b: &Session) -> Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.last_opened_at.cmp(&a.last_opened_at))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, pinned: bool, last_opened_at: i64) -> Session {
        Session {
            id: id.to_string(),
            app_id: "stage".to_string(),
            title: id.to_string(),
            pinned,
            archived: false,
            status: SessionStatus::Idle,
            data: serde_json::Value::Null,
            created_at: 0,
            updated_at: 0,
            last_opened_at,
        }
    }

    #[test]
    fn pinned_sort_before_recent() {
        let mut list = vec![
            session("a", false, 300),
            session("b", true, 100),
            session("c", false, 500),
            session("d", true, 200),
        ];
        list.sort_by(display_order);
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn session_json_uses_camel_case() {
        let json = serde_json::to_value(session("a", false, 7)).unwrap();
        assert_eq!(json["appId"], "stage");
        assert_eq!(json["lastOpenedAt"], 7);
        assert_eq!(json["status"], "idle");
    }

    #[test]
    fn filter_fields_combine() {
        let mut s = session("a", true, 0);
        s.status = SessionStatus::Running;
        assert!(SessionFilter::app("stage").with_pinned(true).matches(&s));
        assert!(!SessionFilter::app("stage").with_archived(true).matches(&s));
        assert!(!SessionFilter::all()
            .with_status(SessionStatus::Error)
            .matches(&s));
    }
}
