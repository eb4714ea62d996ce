use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use atlas_core::ids::SessionId;
use atlas_core::messages::Role;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One persisted message. `reasoning` holds the flattened step transcript
/// for assistant messages that went through the tool loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub reasoning: Option<String>,
    pub created_at: String,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to a session's history. Rows are immutable once
    /// written; ordering is insertion order.
    #[instrument(skip(self, content, reasoning), fields(session_id = %session_id, role = %role))]
    pub fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        content: &str,
        reasoning: Option<&str>,
    ) -> Result<MessageRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (session_id, role, content, reasoning, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![session_id.as_str(), role.to_string(), content, reasoning, now],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MessageRow {
                id,
                session_id: session_id.clone(),
                role,
                content: content.to_string(),
                reasoning: reasoning.map(|r| r.to_string()),
                created_at: now.clone(),
            })
        })
    }

    /// Full history of a session in insertion order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn for_session(&self, session_id: &SessionId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, reasoning, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Wipe a session's history, keeping the session itself. Returns the
    /// number of deleted rows; clearing an already-empty session is fine.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_for_session(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(deleted as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "messages", "role")?;
    Ok(MessageRow {
        id: row_helpers::get(row, 0, "messages", "id")?,
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        role: row_helpers::parse_enum(&role_str, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        reasoning: row_helpers::get_opt(row, 4, "messages", "reasoning")?,
        created_at: row_helpers::get(row, 5, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;

    fn setup() -> (Database, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone())
            .create("新会话", "gpt-4o-mini")
            .unwrap();
        (db, session.id)
    }

    #[test]
    fn append_and_read_back_in_order() {
        let (db, session_id) = setup();
        let repo = MessageRepo::new(db);

        repo.append(&session_id, Role::User, "推荐春天的城市", None)
            .unwrap();
        repo.append(
            &session_id,
            Role::Assistant,
            "推荐杭州",
            Some("步骤 1: 调用 search_cities"),
        )
        .unwrap();

        let history = repo.for_session(&session_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "推荐春天的城市");
        assert!(history[0].reasoning.is_none());
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(
            history[1].reasoning.as_deref(),
            Some("步骤 1: 调用 search_cities")
        );
        assert!(history[0].id < history[1].id);
    }

    #[test]
    fn count_per_session() {
        let (db, session_id) = setup();
        let repo = MessageRepo::new(db.clone());
        assert_eq!(repo.count(&session_id).unwrap(), 0);

        repo.append(&session_id, Role::User, "a", None).unwrap();
        repo.append(&session_id, Role::Assistant, "b", None).unwrap();
        assert_eq!(repo.count(&session_id).unwrap(), 2);

        // Other sessions are unaffected.
        let other = SessionRepo::new(db).create("other", "gpt-4o-mini").unwrap();
        assert_eq!(repo.count(&other.id).unwrap(), 0);
    }

    #[test]
    fn delete_for_session_clears_only_that_session() {
        let (db, session_id) = setup();
        let repo = MessageRepo::new(db.clone());
        let other = SessionRepo::new(db).create("other", "gpt-4o-mini").unwrap();

        repo.append(&session_id, Role::User, "a", None).unwrap();
        repo.append(&session_id, Role::Assistant, "b", None).unwrap();
        repo.append(&other.id, Role::User, "c", None).unwrap();

        assert_eq!(repo.delete_for_session(&session_id).unwrap(), 2);
        assert_eq!(repo.count(&session_id).unwrap(), 0);
        assert_eq!(repo.count(&other.id).unwrap(), 1);

        // Clearing again is a no-op, not an error.
        assert_eq!(repo.delete_for_session(&session_id).unwrap(), 0);
    }

    #[test]
    fn unicode_content_survives_roundtrip() {
        let (db, session_id) = setup();
        let repo = MessageRepo::new(db);
        let content = "预算2000元，想去海边 🏖";
        repo.append(&session_id, Role::User, content, None).unwrap();

        let history = repo.for_session(&session_id).unwrap();
        assert_eq!(history[0].content, content);
    }
}
