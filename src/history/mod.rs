//! Session and message persistence.
//!
//! SQLite-backed store for chat sessions, their messages, and the source
//! references attached to assistant replies (serialized as a JSON column).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::rag::SourceReference;

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub sources: Vec<SourceReference>,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to history db: {}", e)))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources JSON,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn create_session(&self, title: Option<String>) -> Result<String, ApiError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&session_id)
            .bind(title)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(session_id)
    }

    /// Creates the session with the given id when it does not exist yet.
    pub async fn ensure_session(&self, session_id: &str) -> Result<(), ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, title, created_at, updated_at)
             VALUES (?, NULL, ?, ?)",
        )
        .bind(session_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let row = sqlx::query(
            "SELECT s.id, s.title, s.created_at, s.updated_at,
                (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count,
                (SELECT m.content FROM messages m WHERE m.session_id = s.id
                 ORDER BY m.id DESC LIMIT 1) AS preview
             FROM sessions s WHERE s.id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(session_from_row))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        let rows = sqlx::query(
            "SELECT s.id, s.title, s.created_at, s.updated_at,
                (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count,
                (SELECT m.content FROM messages m WHERE m.session_id = s.id
                 ORDER BY m.id DESC LIMIT 1) AS preview
             FROM sessions s ORDER BY s.updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.into_iter().map(session_from_row).collect())
    }

    pub async fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends a message. The first user message also becomes the session
    /// title (truncated) when no title was set.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        sources: &[SourceReference],
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        if role == "user" {
            let has_messages: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(ApiError::internal)?;
            if has_messages == 0 {
                sqlx::query(
                    "UPDATE sessions SET title = ? WHERE id = ? AND title IS NULL",
                )
                .bind(truncate_chars(content, PREVIEW_CHARS))
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
            }
        }

        let sources_json = if sources.is_empty() {
            None
        } else {
            Some(serde_json::to_string(sources).map_err(ApiError::internal)?)
        };

        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, sources, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(sources_json)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.last_insert_rowid())
    }

    /// Messages for a session in chronological order, most recent `limit`.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, sources, created_at
             FROM (SELECT * FROM messages WHERE session_id = ?
                   ORDER BY id DESC LIMIT ?)
             ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let sources: Vec<SourceReference> = row
                    .get::<Option<String>, _>("sources")
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default();

                HistoryMessage {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    role: row.get("role"),
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                    sources,
                }
            })
            .collect())
    }
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> SessionInfo {
    let preview: Option<String> = row.get("preview");
    SessionInfo {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        message_count: row.get("message_count"),
        preview: preview.map(|text| truncate_chars(&text, PREVIEW_CHARS)),
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::WEB_RELEVANCE_SCORE;

    async fn test_store() -> HistoryStore {
        let tmp = std::env::temp_dir().join(format!(
            "paperchat-history-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        HistoryStore::new(tmp).await.unwrap()
    }

    #[tokio::test]
    async fn append_and_fetch_round_trip_with_sources() {
        let store = test_store().await;
        let session_id = store.create_session(None).await.unwrap();

        store
            .append_message(&session_id, "user", "What does the report say?", &[])
            .await
            .unwrap();

        let sources = vec![
            SourceReference::Document {
                document_id: "doc-1".to_string(),
                filename: "report.pdf".to_string(),
                page: 2,
                relevance_score: 0.15,
            },
            SourceReference::Web {
                url: "https://example.com/a".to_string(),
                title: "Example".to_string(),
                domain: Some("example.com".to_string()),
                description: "desc".to_string(),
                published_date: None,
                relevance_score: WEB_RELEVANCE_SCORE,
            },
        ];
        store
            .append_message(&session_id, "assistant", "It says things.", &sources)
            .await
            .unwrap();

        let history = store.get_history(&session_id, 100).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert!(history[0].sources.is_empty());
        assert_eq!(history[1].sources.len(), 2);
        assert_eq!(history[1].sources[0].id(), "doc-1");
        assert!(history[1].sources[1].is_web());
    }

    #[tokio::test]
    async fn first_user_message_titles_the_session() {
        let store = test_store().await;
        let session_id = store.create_session(None).await.unwrap();

        let long_message = "x".repeat(80);
        store
            .append_message(&session_id, "user", &long_message, &[])
            .await
            .unwrap();

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        let title = session.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 53);
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn explicit_title_is_not_overwritten() {
        let store = test_store().await;
        let session_id = store
            .create_session(Some("My session".to_string()))
            .await
            .unwrap();

        store
            .append_message(&session_id, "user", "hello there", &[])
            .await
            .unwrap();

        let session = store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("My session"));
    }

    #[tokio::test]
    async fn delete_session_cascades_to_messages() {
        let store = test_store().await;
        let session_id = store.create_session(None).await.unwrap();
        store
            .append_message(&session_id, "user", "hello", &[])
            .await
            .unwrap();

        assert!(store.delete_session(&session_id).await.unwrap());
        assert!(store.get_session(&session_id).await.unwrap().is_none());
        let history = store.get_history(&session_id, 100).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let store = test_store().await;
        store.ensure_session("fixed-id").await.unwrap();
        store.ensure_session("fixed-id").await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "fixed-id");
    }
}
