//! Legacy recent-worlds records, migrated one way into sessions.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::model::{Session, SessionStatus};

/// Key inside `Session::data` linking a migrated session to its world.
pub const WORLD_ID_FIELD: &str = "worldId";

/// One entry of the legacy recent-worlds array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWorld {
    pub id: String,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub generation: Option<u64>,
    #[serde(default, alias = "bestFitness")]
    pub fitness: Option<f64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Outcome of one legacy sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacySyncReport {
    pub created: usize,
    pub updated: usize,
    /// The raw payload matched the previous pass and was not parsed.
    pub unchanged: bool,
}

impl LegacySyncReport {
    pub fn changed(&self) -> bool {
        self.created > 0 || self.updated > 0
    }
}

impl LegacyWorld {
    pub fn title(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("World {}", self.id))
    }

    pub fn session_status(&self) -> SessionStatus {
        map_world_status(self.status.as_deref())
    }

    fn apply_data(&self, data: &mut Map<String, Value>) {
        data.insert(WORLD_ID_FIELD.to_string(), Value::from(self.id.clone()));
        if let Some(generation) = self.generation {
            data.insert("generation".to_string(), Value::from(generation));
        }
        if let Some(fitness) = self.fitness {
            data.insert("fitness".to_string(), Value::from(fitness));
        }
    }

    /// Payload for a freshly migrated session.
    pub fn session_data(&self) -> Value {
        let mut data = Map::new();
        self.apply_data(&mut data);
        Value::Object(data)
    }

    /// Merge display fields into an existing session. Returns whether
    /// anything changed.
    pub fn merge_into(&self, session: &mut Session) -> bool {
        let mut changed = false;

        let title = self.title();
        if session.title != title {
            session.title = title;
            changed = true;
        }

        let status = self.session_status();
        if session.status != status {
            session.status = status;
            changed = true;
        }

        let mut data = match &session.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        self.apply_data(&mut data);
        let data = Value::Object(data);
        if session.data != data {
            session.data = data;
            changed = true;
        }

        changed
    }
}

/// Map a legacy world status string onto a session status.
pub fn map_world_status(status: Option<&str>) -> SessionStatus {
    match status.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("building" | "running" | "evolving" | "generating" | "queued") => {
            SessionStatus::Running
        }
        Some("complete" | "completed" | "done" | "ready") => SessionStatus::Completed,
        Some("failed" | "error") => SessionStatus::Error,
        _ => SessionStatus::Idle,
    }
}

/// Parse the legacy payload, skipping records that do not decode.
pub fn parse_legacy_worlds(raw: &str) -> Result<Vec<LegacyWorld>, serde_json::Error> {
    let values: Vec<Value> = serde_json::from_str(raw)?;
    Ok(values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<LegacyWorld>(v) {
            Ok(world) if !world.id.is_empty() => Some(world),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed legacy world record");
                None
            }
        })
        .collect())
}

/// World id a session was migrated from, if any.
pub fn world_id_of(session: &Session) -> Option<&str> {
    session.data.get(WORLD_ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_known_states() {
        assert_eq!(map_world_status(Some("building")), SessionStatus::Running);
        assert_eq!(map_world_status(Some("Complete")), SessionStatus::Completed);
        assert_eq!(map_world_status(Some("failed")), SessionStatus::Error);
        assert_eq!(map_world_status(Some("draft")), SessionStatus::Idle);
        assert_eq!(map_world_status(None), SessionStatus::Idle);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let raw = r#"[{"id":"w1","name":"Foo"},{"name":"no id"},{"id":""},42]"#;
        let worlds = parse_legacy_worlds(raw).unwrap();
        assert_eq!(worlds.len(), 1);
        assert_eq!(worlds[0].id, "w1");
        assert!(parse_legacy_worlds("{not json").is_err());
    }

    #[test]
    fn merge_keeps_foreign_data_keys() {
        let world = LegacyWorld {
            id: "w1".to_string(),
            name: Some("Foo".to_string()),
            status: Some("building".to_string()),
            generation: Some(4),
            fitness: Some(0.5),
            created_at: None,
        };
        let mut session = Session {
            id: "sess_1".to_string(),
            app_id: "worlds".to_string(),
            title: "Foo".to_string(),
            pinned: false,
            archived: false,
            status: SessionStatus::Running,
            data: serde_json::json!({"worldId": "w1", "camera": [1, 2]}),
            created_at: 0,
            updated_at: 0,
            last_opened_at: 0,
        };

        assert!(world.merge_into(&mut session));
        assert_eq!(session.data["camera"], serde_json::json!([1, 2]));
        assert_eq!(session.data["generation"], 4);
        assert!(!world.merge_into(&mut session));
    }
}
