//! Score aggregator
//!
//! Sums the latest scored answer of every element under a prefix. Derived
//! on demand; never persisted. Callers dividing by the max (the test
//! element) treat a zero max as 1.0.

use anyhow::Result;
use sdk::types::ScorePair;

use crate::db::log::ConversationLog;

/// Total (score, max_score) over a run's answers under `prefix`
///
/// Only the latest user-role record of each element counts, so retried
/// answers replace rather than accumulate.
pub async fn aggregate(log: &ConversationLog, run_id: i64, prefix: &str) -> Result<ScorePair> {
    let records = log.latest_scored_by_prefix(run_id, prefix).await?;

    let mut total = ScorePair::new(0.0, 0.0);
    for record in records {
        total.score += record.score.unwrap_or(0.0);
        total.max_score += record.max_score.unwrap_or(0.0);
    }

    Ok(total)
}
