//! Context management — the append-only conversation log and its snapshots.
//!
//! Messages are only ever appended; "clearing" advances a per-agent cursor so
//! history stays queryable. Snapshots serialize the live window to a JSON
//! file under the agent's `sessions/` directory and register a
//! prefix-addressable session row. Restoring clears the live context and
//! re-persists the captured messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use chorus_core::error::Result;
use chorus_core::store::{SessionRow, Store};
use chorus_core::types::ContextRecord;
use chorus_core::utils::{short_id, timestamp, truncate_string};

/// On-disk shape of one snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    session_id: String,
    agent_name: String,
    description: Option<String>,
    saved_at: String,
    message_count: usize,
    summary: Option<String>,
    messages: Vec<ContextRecord>,
}

/// Per-agent context manager.
pub struct ContextManager {
    agent_name: String,
    store: Store,
    /// The agent's `sessions/` directory.
    sessions_dir: PathBuf,
}

impl ContextManager {
    pub fn new(agent_name: impl Into<String>, store: Store, sessions_dir: PathBuf) -> Self {
        Self {
            agent_name: agent_name.into(),
            store,
            sessions_dir,
        }
    }

    /// Append one message with a fresh timestamp.
    pub async fn persist_message(&self, role: &str, content: &str) -> Result<()> {
        self.store
            .append_message(
                &self.agent_name,
                ContextRecord::new(role, content, timestamp()),
                None,
            )
            .await
    }

    /// The live context: every message at or after the clear cursor.
    pub async fn get_context(&self) -> Result<Vec<ContextRecord>> {
        let cursor = self.store.get_clear_cursor(&self.agent_name).await?;
        self.store.messages_since(&self.agent_name, cursor).await
    }

    /// Advance the clear cursor to now. Non-destructive; rows remain.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .set_clear_cursor(&self.agent_name, &timestamp())
            .await
    }

    /// Capture the live context into an immutable snapshot.
    pub async fn save_snapshot(&self, description: Option<String>) -> Result<SessionRow> {
        let messages = self.get_context().await?;
        let session_id = short_id();
        let saved_at = timestamp();

        // First user message doubles as the summary.
        let summary = messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| truncate_string(&m.content, 80));

        std::fs::create_dir_all(&self.sessions_dir)?;
        let file_path = self.sessions_dir.join(format!("{session_id}.json"));
        let snapshot = SnapshotFile {
            session_id: session_id.clone(),
            agent_name: self.agent_name.clone(),
            description: description.clone(),
            saved_at: saved_at.clone(),
            message_count: messages.len(),
            summary,
            messages,
        };
        std::fs::write(&file_path, serde_json::to_string_pretty(&snapshot)?)?;

        let row = SessionRow {
            id: session_id,
            agent_name: self.agent_name.clone(),
            description,
            saved_at,
            message_count: snapshot.message_count as i64,
            file_path: file_path.to_string_lossy().to_string(),
        };
        self.store.save_session(row.clone()).await?;

        info!(
            agent = %self.agent_name,
            session = %row.id,
            messages = row.message_count,
            "context snapshot saved"
        );
        Ok(row)
    }

    /// Restore a snapshot by (possibly shortened) id: clear the live
    /// context, then re-persist every captured message in order.
    pub async fn restore_snapshot(&self, session_id: &str) -> Result<SessionRow> {
        let row = self.store.get_session_by_prefix(session_id).await?;
        let raw = std::fs::read_to_string(&row.file_path)?;
        let snapshot: SnapshotFile = serde_json::from_str(&raw)?;

        self.clear().await?;

        // One shared timestamp; insertion order breaks ties.
        let now = timestamp();
        for record in snapshot.messages {
            self.store
                .append_message(
                    &self.agent_name,
                    ContextRecord::new(&record.role, &record.content, &now),
                    None,
                )
                .await?;
        }

        info!(agent = %self.agent_name, session = %row.id, "context snapshot restored");
        Ok(row)
    }

    /// All snapshot rows for this agent, oldest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SessionRow>> {
        self.store.list_sessions(&self.agent_name).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
