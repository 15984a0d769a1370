//! Embedded SQLite store for Chorus state.
//!
//! One connection, shared behind `Arc<Mutex<_>>`; all blocking work is
//! bridged onto the tokio blocking pool, so callers stay async. WAL journal
//! mode and an idempotent `CREATE TABLE IF NOT EXISTS` schema make
//! initialization safe to repeat.
//!
//! Tables: `agents`, `sessions`, `messages` (append-only), `audit_log`,
//! `settings`, and `context_cursors` (the per-agent clear cursor).

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{ChorusError, Result};
use crate::types::ContextRecord;

const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS agents (
    name TEXT PRIMARY KEY,
    channel_id INTEGER UNIQUE NOT NULL,
    guild_id INTEGER NOT NULL,
    model TEXT,
    permissions TEXT NOT NULL DEFAULT 'standard',
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    agent_name TEXT NOT NULL REFERENCES agents(name),
    description TEXT,
    saved_at TEXT NOT NULL,
    message_count INTEGER,
    file_path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    agent_name TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    thread_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_messages_agent_time
ON messages (agent_name, timestamp);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    action_string TEXT NOT NULL,
    decision TEXT NOT NULL,
    user_id INTEGER,
    detail TEXT
);

CREATE TABLE IF NOT EXISTS settings (
    guild_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (guild_id, key)
);

CREATE TABLE IF NOT EXISTS context_cursors (
    agent_name TEXT PRIMARY KEY,
    cleared_at TEXT NOT NULL
);
";

// ─────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────

/// One row of the `agents` table.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentRow {
    pub name: String,
    pub channel_id: u64,
    pub guild_id: u64,
    pub model: Option<String>,
    pub permissions: String,
    pub created_at: String,
    pub status: String,
}

/// One row of the `sessions` table.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRow {
    pub id: String,
    pub agent_name: String,
    pub description: Option<String>,
    pub saved_at: String,
    pub message_count: i64,
    pub file_path: String,
}

// ─────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────

/// Handle to the Chorus database. Cloneable; clones share the connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and run the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "store initialized");
        Ok(store)
    }

    /// Open an ephemeral in-memory database (tests).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a synchronous closure against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| ChorusError::Task(format!("store lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| ChorusError::Task(e.to_string()))?
    }

    // ── Agents ──────────────────────────────

    /// Insert a new agent row. The unique channel constraint is enforced by
    /// the schema.
    pub async fn register_agent(&self, row: AgentRow) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO agents (name, channel_id, guild_id, model, permissions, created_at, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.name,
                    row.channel_id as i64,
                    row.guild_id as i64,
                    row.model,
                    row.permissions,
                    row.created_at,
                    row.status,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete an agent row by name.
    pub async fn remove_agent(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM agents WHERE name = ?1", params![name])?;
            Ok(())
        })
        .await
    }

    /// Fetch a single agent by name.
    pub async fn get_agent(&self, name: &str) -> Result<Option<AgentRow>> {
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT name, channel_id, guild_id, model, permissions, created_at, status \
                 FROM agents WHERE name = ?1",
                params![name],
                row_to_agent,
            )
            .optional()
            .map_err(ChorusError::from)
        })
        .await
    }

    /// Fetch the agent bound to a channel.
    pub async fn get_agent_by_channel(&self, channel_id: u64) -> Result<Option<AgentRow>> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT name, channel_id, guild_id, model, permissions, created_at, status \
                 FROM agents WHERE channel_id = ?1",
                params![channel_id as i64],
                row_to_agent,
            )
            .optional()
            .map_err(ChorusError::from)
        })
        .await
    }

    /// List agents, optionally filtered by guild, ordered by name.
    pub async fn list_agents(&self, guild_id: Option<u64>) -> Result<Vec<AgentRow>> {
        self.blocking(move |conn| {
            let mut rows = Vec::new();
            match guild_id {
                Some(gid) => {
                    let mut stmt = conn.prepare(
                        "SELECT name, channel_id, guild_id, model, permissions, created_at, status \
                         FROM agents WHERE guild_id = ?1 ORDER BY name",
                    )?;
                    let mapped = stmt.query_map(params![gid as i64], row_to_agent)?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT name, channel_id, guild_id, model, permissions, created_at, status \
                         FROM agents ORDER BY name",
                    )?;
                    let mapped = stmt.query_map([], row_to_agent)?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
            }
            Ok(rows)
        })
        .await
    }

    /// Update an agent's model (None clears it back to the default).
    pub async fn set_agent_model(&self, name: &str, model: Option<String>) -> Result<()> {
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE agents SET model = ?2 WHERE name = ?1",
                params![name, model],
            )?;
            Ok(())
        })
        .await
    }

    /// Rebind an agent to a different channel.
    pub async fn set_agent_channel(&self, name: &str, channel_id: u64) -> Result<()> {
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE agents SET channel_id = ?2 WHERE name = ?1",
                params![name, channel_id as i64],
            )?;
            Ok(())
        })
        .await
    }

    /// Update an agent's permission profile name.
    pub async fn set_agent_permissions(&self, name: &str, permissions: &str) -> Result<()> {
        let name = name.to_string();
        let permissions = permissions.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE agents SET permissions = ?2 WHERE name = ?1",
                params![name, permissions],
            )?;
            Ok(())
        })
        .await
    }

    // ── Sessions (context snapshots) ────────

    /// Register a snapshot row.
    pub async fn save_session(&self, row: SessionRow) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, agent_name, description, saved_at, message_count, file_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id,
                    row.agent_name,
                    row.description,
                    row.saved_at,
                    row.message_count,
                    row.file_path,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Resolve a (possibly shortened) session id to a unique row.
    ///
    /// Errors with `SessionNotFound` on zero matches and `AmbiguousSession`
    /// on more than one.
    pub async fn get_session_by_prefix(&self, prefix: &str) -> Result<SessionRow> {
        let prefix = prefix.to_string();
        self.blocking(move |conn| {
            let pattern = format!("{}%", prefix.replace('%', ""));
            let mut stmt = conn.prepare(
                "SELECT id, agent_name, description, saved_at, message_count, file_path \
                 FROM sessions WHERE id LIKE ?1 LIMIT 2",
            )?;
            let mut rows: Vec<SessionRow> = stmt
                .query_map(params![pattern], row_to_session)?
                .collect::<std::result::Result<_, _>>()?;
            match rows.len() {
                0 => Err(ChorusError::SessionNotFound(prefix)),
                1 => Ok(rows.remove(0)),
                _ => Err(ChorusError::AmbiguousSession(prefix)),
            }
        })
        .await
    }

    /// List an agent's snapshots, oldest first.
    pub async fn list_sessions(&self, agent_name: &str) -> Result<Vec<SessionRow>> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_name, description, saved_at, message_count, file_path \
                 FROM sessions WHERE agent_name = ?1 ORDER BY saved_at",
            )?;
            let rows = stmt
                .query_map(params![agent_name], row_to_session)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Delete a snapshot row by full id.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let n = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    // ── Messages (append-only context log) ──

    /// Append one message row.
    pub async fn append_message(
        &self,
        agent_name: &str,
        record: ContextRecord,
        thread_id: Option<u64>,
    ) -> Result<()> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO messages (agent_name, role, content, timestamp, thread_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent_name,
                    record.role,
                    record.content,
                    record.timestamp,
                    thread_id.map(|t| t as i64),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Messages at or after `since`, ordered by (timestamp, insertion order).
    pub async fn messages_since(
        &self,
        agent_name: &str,
        since: Option<String>,
    ) -> Result<Vec<ContextRecord>> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            let cursor = since.unwrap_or_default();
            let mut stmt = conn.prepare(
                "SELECT role, content, timestamp FROM messages \
                 WHERE agent_name = ?1 AND timestamp >= ?2 \
                 ORDER BY timestamp, rowid",
            )?;
            let rows = stmt
                .query_map(params![agent_name, cursor], row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Case-insensitive substring search over an agent's messages.
    pub async fn search_messages(
        &self,
        agent_name: &str,
        needle: &str,
    ) -> Result<Vec<ContextRecord>> {
        let agent_name = agent_name.to_string();
        let needle = needle.to_string();
        self.blocking(move |conn| {
            let pattern = format!("%{}%", needle.replace('%', "").replace('_', ""));
            let mut stmt = conn.prepare(
                "SELECT role, content, timestamp FROM messages \
                 WHERE agent_name = ?1 AND content LIKE ?2 \
                 ORDER BY timestamp, rowid",
            )?;
            let rows = stmt
                .query_map(params![agent_name, pattern], row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Total messages ever persisted for an agent.
    pub async fn count_messages(&self, agent_name: &str) -> Result<i64> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE agent_name = ?1",
                params![agent_name],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    // ── Audit log ───────────────────────────

    /// Append an audit row for a permission decision or tool invocation.
    pub async fn append_audit(
        &self,
        agent_name: &str,
        action_string: &str,
        decision: &str,
        user_id: Option<u64>,
        detail: Option<String>,
    ) -> Result<()> {
        let agent_name = agent_name.to_string();
        let action_string = action_string.to_string();
        let decision = decision.to_string();
        let timestamp = crate::utils::timestamp();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (agent_name, timestamp, action_string, decision, user_id, detail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agent_name,
                    timestamp,
                    action_string,
                    decision,
                    user_id.map(|u| u as i64),
                    detail,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// The most recent `limit` audit rows for an agent, newest last.
    pub async fn recent_audit(
        &self,
        agent_name: &str,
        limit: usize,
    ) -> Result<Vec<(String, String, String)>> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, action_string, decision FROM audit_log \
                 WHERE agent_name = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let mut rows: Vec<(String, String, String)> = stmt
                .query_map(params![agent_name, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<_, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    // ── Guild settings ──────────────────────

    /// Read one guild setting.
    pub async fn get_setting(&self, guild_id: u64, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE guild_id = ?1 AND key = ?2",
                params![guild_id as i64, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(ChorusError::from)
        })
        .await
    }

    /// Upsert one guild setting.
    pub async fn set_setting(&self, guild_id: u64, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO settings (guild_id, key, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(guild_id, key) DO UPDATE SET value = excluded.value",
                params![guild_id as i64, key, value],
            )?;
            Ok(())
        })
        .await
    }

    // ── Clear cursors ───────────────────────

    /// The agent's clear cursor, if it has ever cleared its context.
    pub async fn get_clear_cursor(&self, agent_name: &str) -> Result<Option<String>> {
        let agent_name = agent_name.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT cleared_at FROM context_cursors WHERE agent_name = ?1",
                params![agent_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(ChorusError::from)
        })
        .await
    }

    /// Advance the agent's clear cursor.
    pub async fn set_clear_cursor(&self, agent_name: &str, cleared_at: &str) -> Result<()> {
        let agent_name = agent_name.to_string();
        let cleared_at = cleared_at.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO context_cursors (agent_name, cleared_at) VALUES (?1, ?2) \
                 ON CONFLICT(agent_name) DO UPDATE SET cleared_at = excluded.cleared_at",
                params![agent_name, cleared_at],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok(AgentRow {
        name: row.get(0)?,
        channel_id: row.get::<_, i64>(1)? as u64,
        guild_id: row.get::<_, i64>(2)? as u64,
        model: row.get(3)?,
        permissions: row.get(4)?,
        created_at: row.get(5)?,
        status: row.get(6)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        description: row.get(2)?,
        saved_at: row.get(3)?,
        message_count: row.get(4)?,
        file_path: row.get(5)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRecord> {
    Ok(ContextRecord {
        role: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, channel: u64) -> AgentRow {
        AgentRow {
            name: name.into(),
            channel_id: channel,
            guild_id: 1,
            model: None,
            permissions: "standard".into(),
            created_at: crate::utils::timestamp(),
            status: "active".into(),
        }
    }

    #[tokio::test]
    async fn test_register_and_get_agent() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("scribe", 100)).await.unwrap();

        let row = store.get_agent("scribe").await.unwrap().unwrap();
        assert_eq!(row.channel_id, 100);
        assert_eq!(row.permissions, "standard");
        assert_eq!(row.status, "active");

        assert!(store.get_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_id_unique() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("one", 42)).await.unwrap();
        let err = store.register_agent(agent("two", 42)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_get_agent_by_channel() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("scribe", 7)).await.unwrap();
        let row = store.get_agent_by_channel(7).await.unwrap().unwrap();
        assert_eq!(row.name, "scribe");
        assert!(store.get_agent_by_channel(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_agents_ordered_by_name() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("zeta", 1)).await.unwrap();
        store.register_agent(agent("alpha", 2)).await.unwrap();

        let names: Vec<String> = store
            .list_agents(None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_list_agents_guild_filter() {
        let store = Store::in_memory().unwrap();
        let mut other = agent("other", 3);
        other.guild_id = 99;
        store.register_agent(agent("mine", 1)).await.unwrap();
        store.register_agent(other).await.unwrap();

        let rows = store.list_agents(Some(1)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "mine");
    }

    #[tokio::test]
    async fn test_remove_agent() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("temp", 5)).await.unwrap();
        store.remove_agent("temp").await.unwrap();
        assert!(store.get_agent("temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_model_and_permissions() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("scribe", 1)).await.unwrap();

        store
            .set_agent_model("scribe", Some("claude-sonnet-4-20250514".into()))
            .await
            .unwrap();
        store.set_agent_permissions("scribe", "locked").await.unwrap();

        let row = store.get_agent("scribe").await.unwrap().unwrap();
        assert_eq!(row.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(row.permissions, "locked");

        store.set_agent_model("scribe", None).await.unwrap();
        let row = store.get_agent("scribe").await.unwrap().unwrap();
        assert!(row.model.is_none());
    }

    #[tokio::test]
    async fn test_messages_append_and_order() {
        let store = Store::in_memory().unwrap();
        // Identical timestamps exercise the rowid tiebreak.
        let ts = "2026-01-01T00:00:00+00:00";
        for content in ["first", "second", "third"] {
            store
                .append_message("scribe", ContextRecord::new("user", content, ts), None)
                .await
                .unwrap();
        }

        let rows = store.messages_since("scribe", None).await.unwrap();
        let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(store.count_messages("scribe").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_messages_since_cursor() {
        let store = Store::in_memory().unwrap();
        store
            .append_message(
                "scribe",
                ContextRecord::new("user", "old", "2026-01-01T00:00:00+00:00"),
                None,
            )
            .await
            .unwrap();
        store
            .append_message(
                "scribe",
                ContextRecord::new("user", "new", "2026-01-02T00:00:00+00:00"),
                None,
            )
            .await
            .unwrap();

        let rows = store
            .messages_since("scribe", Some("2026-01-02T00:00:00+00:00".into()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "new");
    }

    #[tokio::test]
    async fn test_search_messages() {
        let store = Store::in_memory().unwrap();
        let ts = crate::utils::timestamp();
        store
            .append_message("a", ContextRecord::new("user", "deploy the service", &ts), None)
            .await
            .unwrap();
        store
            .append_message("a", ContextRecord::new("user", "write tests", &ts), None)
            .await
            .unwrap();

        let hits = store.search_messages("a", "deploy").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("deploy"));
    }

    #[tokio::test]
    async fn test_session_prefix_resolution() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("scribe", 1)).await.unwrap();

        for id in ["abc111222333", "abd444555666"] {
            store
                .save_session(SessionRow {
                    id: id.into(),
                    agent_name: "scribe".into(),
                    description: None,
                    saved_at: crate::utils::timestamp(),
                    message_count: 2,
                    file_path: format!("/tmp/{id}.json"),
                })
                .await
                .unwrap();
        }

        // Unique prefix resolves
        let row = store.get_session_by_prefix("abc").await.unwrap();
        assert_eq!(row.id, "abc111222333");

        // Shared prefix is ambiguous
        assert!(matches!(
            store.get_session_by_prefix("ab").await,
            Err(ChorusError::AmbiguousSession(_))
        ));

        // Missing prefix
        assert!(matches!(
            store.get_session_by_prefix("zzz").await,
            Err(ChorusError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete_sessions() {
        let store = Store::in_memory().unwrap();
        store.register_agent(agent("scribe", 1)).await.unwrap();
        store
            .save_session(SessionRow {
                id: "aaa000000000".into(),
                agent_name: "scribe".into(),
                description: Some("before refactor".into()),
                saved_at: crate::utils::timestamp(),
                message_count: 5,
                file_path: "/tmp/aaa.json".into(),
            })
            .await
            .unwrap();

        let rows = store.list_sessions("scribe").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description.as_deref(), Some("before refactor"));

        assert!(store.delete_session("aaa000000000").await.unwrap());
        assert!(!store.delete_session("aaa000000000").await.unwrap());
    }

    #[tokio::test]
    async fn test_audit_log() {
        let store = Store::in_memory().unwrap();
        store
            .append_audit("scribe", "tool:bash:ls", "allow", Some(42), None)
            .await
            .unwrap();
        store
            .append_audit("scribe", "tool:bash:rm x", "deny", Some(42), Some("ask timed out".into()))
            .await
            .unwrap();

        let rows = store.recent_audit("scribe", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, "tool:bash:ls");
        assert_eq!(rows[1].2, "deny");
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = Store::in_memory().unwrap();
        assert!(store.get_setting(1, "default_model").await.unwrap().is_none());

        store.set_setting(1, "default_model", "gpt-4o").await.unwrap();
        store.set_setting(1, "default_model", "claude-sonnet-4-20250514").await.unwrap();

        assert_eq!(
            store.get_setting(1, "default_model").await.unwrap().as_deref(),
            Some("claude-sonnet-4-20250514")
        );
    }

    #[tokio::test]
    async fn test_clear_cursor() {
        let store = Store::in_memory().unwrap();
        assert!(store.get_clear_cursor("scribe").await.unwrap().is_none());

        store
            .set_clear_cursor("scribe", "2026-01-01T00:00:00+00:00")
            .await
            .unwrap();
        store
            .set_clear_cursor("scribe", "2026-02-01T00:00:00+00:00")
            .await
            .unwrap();

        assert_eq!(
            store.get_clear_cursor("scribe").await.unwrap().as_deref(),
            Some("2026-02-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chorus.db");
        {
            let store = Store::open(&path).unwrap();
            store.register_agent(agent("keep", 9)).await.unwrap();
        }
        // Re-opening runs the schema again without clobbering rows.
        let store = Store::open(&path).unwrap();
        assert!(store.get_agent("keep").await.unwrap().is_some());
    }
}
