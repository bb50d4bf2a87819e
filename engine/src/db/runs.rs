/// Run persistence operations
///
/// A run is one attempt of one learner at one course. `ended` flips once,
/// irreversibly, when an end element is reached or the course is abandoned
/// administratively.
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// Run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: i64,
    pub chat_id: i64,
    pub course_id: String,
    pub started_at: i64,
    pub ended: bool,
}

/// Run repository for database operations
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    /// Create a new run store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new run for a learner starting a course
    pub async fn create(&self, chat_id: i64, course_id: &str) -> Result<Run> {
        let now = Utc::now().timestamp();

        let result =
            sqlx::query("INSERT INTO runs (chat_id, course_id, started_at, ended) VALUES (?, ?, ?, 0)")
                .bind(chat_id)
                .bind(course_id)
                .bind(now)
                .execute(&self.pool)
                .await
                .context("Failed to create run")?;

        Ok(Run {
            run_id: result.last_insert_rowid(),
            chat_id,
            course_id: course_id.to_string(),
            started_at: now,
            ended: false,
        })
    }

    /// Get a run by ID
    pub async fn get(&self, run_id: i64) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT run_id, chat_id, course_id, started_at, ended FROM runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch run")?;

        Ok(row.map(row_to_run))
    }

    /// Latest run of a learner for a course, if any
    pub async fn latest_for_chat(&self, chat_id: i64, course_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT run_id, chat_id, course_id, started_at, ended FROM runs \
             WHERE chat_id = ? AND course_id = ? ORDER BY run_id DESC LIMIT 1",
        )
        .bind(chat_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest run")?;

        Ok(row.map(row_to_run))
    }

    /// Mark a run as ended
    ///
    /// The flag only ever flips from 0 to 1; repeating the call is harmless.
    pub async fn mark_ended(&self, run_id: i64) -> Result<()> {
        sqlx::query("UPDATE runs SET ended = 1 WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark run as ended")?;

        Ok(())
    }

    /// Whether a run has ended
    pub async fn is_ended(&self, run_id: i64) -> Result<bool> {
        let ended: Option<bool> = sqlx::query_scalar("SELECT ended FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check run end state")?;

        Ok(ended.unwrap_or(false))
    }
}

fn row_to_run(r: sqlx::sqlite::SqliteRow) -> Run {
    Run {
        run_id: r.get("run_id"),
        chat_id: r.get("chat_id"),
        course_id: r.get("course_id"),
        started_at: r.get("started_at"),
        ended: r.get("ended"),
    }
}
