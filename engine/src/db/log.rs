/// Conversation log persistence
///
/// The log is append-only. Exactly two kinds of records may be mutated in
/// place after creation, and only through `update_snapshot`:
/// - a dialog record whose snapshot gains appended conversation turns;
/// - a revision record whose snapshot has its retry queue popped.
///
/// Both updates are guarded by an optimistic version stamp: the UPDATE only
/// matches when the stored `version` equals the one the caller read, so two
/// near-simultaneous read-modify-writes on the same record cannot both win.
use anyhow::{Context, Result};
use chrono::Utc;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Author of a conversation record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordRole {
    Bot,
    User,
}

impl RecordRole {
    pub fn as_str(&self) -> &str {
        match self {
            RecordRole::Bot => "bot",
            RecordRole::User => "user",
        }
    }
}

/// One interaction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub chat_id: i64,
    pub course_id: String,
    pub run_id: i64,
    pub element_id: String,
    pub element_type: String,
    pub role: RecordRole,
    pub report: Option<String>,
    /// JSON snapshot of the element spec plus per-record state
    pub snapshot: String,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    /// Optimistic stamp for the two sanctioned in-place updates
    pub version: i64,
    pub inserted_at: i64,
}

/// Fields of a record about to be appended
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub chat_id: i64,
    pub course_id: String,
    pub run_id: i64,
    pub element_id: String,
    pub element_type: String,
    pub role: RecordRole,
    pub report: Option<String>,
    pub snapshot: String,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
}

/// Conversation log repository
pub struct ConversationLog {
    pool: SqlitePool,
}

impl ConversationLog {
    /// Create a new conversation log over a pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a record and return its id
    pub async fn append(&self, record: NewRecord) -> Result<i64> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO conversation \
             (chat_id, course_id, run_id, element_id, element_type, role, report, snapshot, \
              score, max_score, version, inserted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(record.chat_id)
        .bind(&record.course_id)
        .bind(record.run_id)
        .bind(&record.element_id)
        .bind(&record.element_type)
        .bind(record.role.as_str())
        .bind(&record.report)
        .bind(&record.snapshot)
        .bind(record.score)
        .bind(record.max_score)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to append conversation record")?;

        Ok(result.last_insert_rowid())
    }

    /// Get a record by id
    pub async fn get(&self, id: i64) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(&select("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch conversation record")?;

        Ok(row.map(row_to_record))
    }

    /// The most recent record of a chat, which defines the current element
    pub async fn latest_for_chat(&self, chat_id: i64) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(&select("WHERE chat_id = ? ORDER BY id DESC LIMIT 1"))
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch latest record")?;

        Ok(row.map(row_to_record))
    }

    /// The most recent record of one element for a chat
    pub async fn latest_of_element(
        &self,
        chat_id: i64,
        element_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(&select(
            "WHERE chat_id = ? AND element_id = ? ORDER BY id DESC LIMIT 1",
        ))
        .bind(chat_id)
        .bind(element_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest record of element")?;

        Ok(row.map(row_to_record))
    }

    /// The most recent record of one element within a run
    pub async fn latest_of_element_in_run(
        &self,
        run_id: i64,
        element_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(&select(
            "WHERE run_id = ? AND element_id = ? ORDER BY id DESC LIMIT 1",
        ))
        .bind(run_id)
        .bind(element_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest record of element in run")?;

        Ok(row.map(row_to_record))
    }

    /// The most recent user-role record of one element for a chat
    pub async fn latest_user_of_element(
        &self,
        chat_id: i64,
        element_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query(&select(
            "WHERE chat_id = ? AND element_id = ? AND role = 'user' ORDER BY id DESC LIMIT 1",
        ))
        .bind(chat_id)
        .bind(element_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest user record of element")?;

        Ok(row.map(row_to_record))
    }

    /// Latest scored user-role record per element under a prefix, in
    /// definition-log order.
    ///
    /// This is the shared query behind the score aggregator and the revision
    /// engine: for every element whose id starts with `prefix`, the most
    /// recent user record of this run that carries a resolvable
    /// (score, max_score) pair.
    pub async fn latest_scored_by_prefix(
        &self,
        run_id: i64,
        prefix: &str,
    ) -> Result<Vec<ConversationRecord>> {
        // substr instead of LIKE: element ids are full of underscores, which
        // LIKE would treat as wildcards.
        let rows = sqlx::query(&select(
            "WHERE id IN ( \
                SELECT MAX(id) FROM conversation \
                WHERE run_id = ?1 AND role = 'user' \
                  AND substr(element_id, 1, length(?2)) = ?2 \
                  AND score IS NOT NULL AND max_score IS NOT NULL \
                GROUP BY element_id \
             ) ORDER BY id",
        ))
        .bind(run_id)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch scored records by prefix")?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    /// Replace a record's snapshot under the optimistic version stamp
    ///
    /// Fails with `EngineError::Conflict` when the stored version no longer
    /// matches `expected_version`; the caller re-reads and retries once.
    pub async fn update_snapshot(
        &self,
        id: i64,
        new_snapshot: &str,
        expected_version: i64,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            "UPDATE conversation SET snapshot = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(new_snapshot)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(id));
        }

        Ok(())
    }
}

fn select(tail: &str) -> String {
    format!(
        "SELECT id, chat_id, course_id, run_id, element_id, element_type, role, report, \
         snapshot, score, max_score, version, inserted_at FROM conversation {}",
        tail
    )
}

fn row_to_record(r: sqlx::sqlite::SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: r.get("id"),
        chat_id: r.get("chat_id"),
        course_id: r.get("course_id"),
        run_id: r.get("run_id"),
        element_id: r.get("element_id"),
        element_type: r.get("element_type"),
        role: match r.get::<String, _>("role").as_str() {
            "user" => RecordRole::User,
            _ => RecordRole::Bot,
        },
        report: r.get("report"),
        snapshot: r.get("snapshot"),
        score: r.get("score"),
        max_score: r.get("max_score"),
        version: r.get("version"),
        inserted_at: r.get("inserted_at"),
    }
}
