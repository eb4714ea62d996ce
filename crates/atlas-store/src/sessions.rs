use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use atlas_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub name: String,
    pub model: String,
    pub created_at: String,
    pub updated_at: String,
}

const SESSION_COLUMNS: &str = "id, name, model, created_at, updated_at";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session with the given display name and model id.
    #[instrument(skip(self), fields(name, model))]
    pub fn create(&self, name: &str, model: &str) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), name, model, now, now],
            )?;

            Ok(SessionRow {
                id: id.clone(),
                name: name.to_string(),
                model: model.to_string(),
                created_at: now.clone(),
                updated_at: now.clone(),
            })
        })
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// All sessions with their message counts, most recently active first.
    #[instrument(skip(self))]
    pub fn list_with_counts(&self) -> Result<Vec<(SessionRow, u64)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.model, s.created_at, s.updated_at, COUNT(m.id)
                 FROM sessions s
                 LEFT JOIN messages m ON m.session_id = s.id
                 GROUP BY s.id
                 ORDER BY s.updated_at DESC, s.id DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let session = row_to_session(row)?;
                let count: i64 = row_helpers::get(row, 5, "sessions", "message_count")?;
                results.push((session, count.max(0) as u64));
            }
            Ok(results)
        })
    }

    /// Update the display name. Fails with NotFound for unknown sessions.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn rename(&self, id: &SessionId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let affected = conn.execute(
                "UPDATE sessions SET name = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![name, now, id.as_str()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Switch the session's model id. Fails with NotFound for unknown sessions.
    #[instrument(skip(self), fields(session_id = %id, model))]
    pub fn set_model(&self, id: &SessionId, model: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let affected = conn.execute(
                "UPDATE sessions SET model = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![model, now, id.as_str()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Bump the last-active timestamp.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Hard delete a session and its messages.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", [id.as_str()])?;
            let affected =
                conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Delete sessions that have no messages and were last active before
    /// `cutoff`. Returns the reaped ids.
    #[instrument(skip(self))]
    pub fn reap_empty_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionId>, StoreError> {
        let cutoff = cutoff.to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM sessions
                 WHERE updated_at < ?1
                   AND id NOT IN (SELECT DISTINCT session_id FROM messages)",
            )?;
            let ids: Vec<SessionId> = stmt
                .query_map([cutoff.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(SessionId::from_raw)
                .collect();

            for id in &ids {
                conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            }
            Ok(ids)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        name: row_helpers::get(row, 1, "sessions", "name")?,
        model: row_helpers::get(row, 2, "sessions", "model")?,
        created_at: row_helpers::get(row, 3, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 4, "sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRepo;
    use atlas_core::messages::Role;

    fn setup() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn create_session() {
        let repo = SessionRepo::new(setup());
        let session = repo.create("新会话", "gpt-4o-mini").unwrap();
        assert!(session.id.as_str().starts_with("sess_"));
        assert_eq!(session.name, "新会话");
        assert_eq!(session.model, "gpt-4o-mini");
    }

    #[test]
    fn get_session_roundtrip() {
        let repo = SessionRepo::new(setup());
        let session = repo.create("周末出游", "gpt-4o-mini").unwrap();
        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched, session);
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = SessionRepo::new(setup());
        let result = repo.get(&SessionId::from_raw("sess_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn rename_and_set_model() {
        let repo = SessionRepo::new(setup());
        let session = repo.create("新会话", "gpt-4o-mini").unwrap();

        repo.rename(&session.id, "春游计划").unwrap();
        repo.set_model(&session.id, "claude-3-5-sonnet").unwrap();

        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.name, "春游计划");
        assert_eq!(fetched.model, "claude-3-5-sonnet");
    }

    #[test]
    fn rename_unknown_session_is_not_found() {
        let repo = SessionRepo::new(setup());
        let missing = SessionId::from_raw("sess_missing");
        assert!(matches!(
            repo.rename(&missing, "x"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.set_model(&missing, "gpt-4o"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_session_and_messages() {
        let db = setup();
        let repo = SessionRepo::new(db.clone());
        let messages = MessageRepo::new(db.clone());
        let session = repo.create("新会话", "gpt-4o-mini").unwrap();
        messages
            .append(&session.id, Role::User, "你好", None)
            .unwrap();

        repo.delete(&session.id).unwrap();
        assert!(matches!(
            repo.get(&session.id),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(messages.count(&session.id).unwrap(), 0);

        // Second delete reports NotFound.
        assert!(matches!(
            repo.delete(&session.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_with_counts_orders_by_recency() {
        let db = setup();
        let repo = SessionRepo::new(db.clone());
        let messages = MessageRepo::new(db.clone());

        let a = repo.create("a", "gpt-4o-mini").unwrap();
        let b = repo.create("b", "gpt-4o-mini").unwrap();
        messages.append(&a.id, Role::User, "hi", None).unwrap();
        messages
            .append(&a.id, Role::Assistant, "hello", None)
            .unwrap();
        repo.touch(&a.id).unwrap();

        let listed = repo.list_with_counts().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0.id, a.id);
        assert_eq!(listed[0].1, 2);
        assert_eq!(listed[1].0.id, b.id);
        assert_eq!(listed[1].1, 0);
    }

    #[test]
    fn reap_removes_only_stale_empty_sessions() {
        let db = setup();
        let repo = SessionRepo::new(db.clone());
        let messages = MessageRepo::new(db.clone());

        let stale_empty = repo.create("stale", "gpt-4o-mini").unwrap();
        let stale_used = repo.create("used", "gpt-4o-mini").unwrap();
        let fresh_empty = repo.create("fresh", "gpt-4o-mini").unwrap();
        messages
            .append(&stale_used.id, Role::User, "hi", None)
            .unwrap();

        // Backdate the two "stale" sessions.
        let old = (Utc::now() - chrono::Duration::days(2)).to_rfc3339();
        db.with_conn(|conn| {
            for id in [&stale_empty.id, &stale_used.id] {
                conn.execute(
                    "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![old, id.as_str()],
                )?;
            }
            Ok(())
        })
        .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let reaped = repo.reap_empty_before(cutoff).unwrap();

        assert_eq!(reaped, vec![stale_empty.id.clone()]);
        assert!(repo.get(&stale_empty.id).is_err());
        assert!(repo.get(&stale_used.id).is_ok());
        assert!(repo.get(&fresh_empty.id).is_ok());
    }
}
