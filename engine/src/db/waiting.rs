/// Waiting-queue persistence
///
/// Entries are created by delay elements and jump options carrying a wait;
/// the scheduler sweep deactivates each due entry exactly once. Entries are
/// never deleted, which keeps an audit trail of every deferred continuation.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// One deferred continuation of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub id: i64,
    pub chat_id: i64,
    pub course_id: String,
    /// Element to continue from; `None` resumes normal navigation
    pub target_element_id: Option<String>,
    pub due_at: i64,
    pub active: bool,
}

/// Waiting-queue repository
pub struct WaitingStore {
    pool: SqlitePool,
}

impl WaitingStore {
    /// Create a new waiting store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an active entry due at `due_at`
    pub async fn insert(
        &self,
        chat_id: i64,
        course_id: &str,
        target_element_id: Option<&str>,
        due_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO waiting (chat_id, course_id, target_element_id, due_at, active) \
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(chat_id)
        .bind(course_id)
        .bind(target_element_id)
        .bind(due_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert waiting entry")?;

        Ok(result.last_insert_rowid())
    }

    /// All active entries due at or before `now`
    pub async fn select_due_active(&self, now: DateTime<Utc>) -> Result<Vec<WaitingEntry>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, course_id, target_element_id, due_at, active \
             FROM waiting WHERE active = 1 AND due_at <= ? ORDER BY due_at",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to select due waiting entries")?;

        Ok(rows
            .into_iter()
            .map(|r| WaitingEntry {
                id: r.get("id"),
                chat_id: r.get("chat_id"),
                course_id: r.get("course_id"),
                target_element_id: r.get("target_element_id"),
                due_at: r.get("due_at"),
                active: r.get("active"),
            })
            .collect())
    }

    /// Deactivate an entry
    ///
    /// Returns whether this call was the one that flipped the flag, so the
    /// sweep can guarantee exactly-once notification per entry.
    pub async fn deactivate(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE waiting SET active = 0 WHERE id = ? AND active = 1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to deactivate waiting entry")?;

        Ok(result.rows_affected() > 0)
    }
}
