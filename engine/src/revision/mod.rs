//! Mistake-revision engine
//!
//! `initiate` scans a run's scored answers under a prefix, classifies each
//! element's latest answer as mistake or correct, and builds a retry queue
//! of every mistake plus up to two randomly sampled corrects. Each queue
//! entry snapshots the element's spec as answered, so later course edits
//! cannot change what gets replayed.
//!
//! `advance` pops one entry per call from the chain riding on the current
//! record's snapshot. The pop is a version-stamped read-modify-write: two
//! concurrent advances on the same run cannot both take the same head.

use rand::seq::SliceRandom;
use sdk::errors::EngineError;
use tracing::{debug, info};

use crate::db::log::{ConversationLog, ConversationRecord};
use crate::element::{mutate_snapshot, QueueEntry, RevisionChain, Snapshot};

/// How many correctly answered elements pad the retry queue
const CORRECT_SAMPLE: usize = 2;

/// Whether a scored record counts as a mistake for its element type
///
/// Quiz and input answers are binary, so anything but the exact max is a
/// mistake. Multichoice grants partial credit, so only a strictly lower
/// score counts. Types outside these three never enter a revision queue.
fn classify(element_type: &str, score: f64, max_score: f64) -> Option<bool> {
    match element_type {
        "quiz" | "input" => Some(score != max_score),
        "multi_choice" => Some(score < max_score),
        _ => None,
    }
}

/// Build a revision chain for `anchor_element_id` over `prefix`
///
/// Returns `None` when no mistakes were found — nothing to revise.
pub async fn initiate(
    log: &ConversationLog,
    run_id: i64,
    anchor_element_id: &str,
    prefix: &str,
) -> Result<Option<RevisionChain>, EngineError> {
    let records = log
        .latest_scored_by_prefix(run_id, prefix)
        .await
        .map_err(|e| EngineError::Database(e.to_string()))?;

    let mut mistakes = Vec::new();
    let mut corrects = Vec::new();

    for record in &records {
        let (Some(score), Some(max_score)) = (record.score, record.max_score) else {
            continue;
        };
        let Some(is_mistake) = classify(&record.element_type, score, max_score) else {
            continue;
        };

        let snapshot = Snapshot::from_record(record)?;
        let entry = QueueEntry {
            element_id: record.element_id.clone(),
            element: snapshot.element,
        };

        if is_mistake {
            mistakes.push(entry);
        } else {
            corrects.push(entry);
        }
    }

    if mistakes.is_empty() {
        debug!(%prefix, "no mistakes under prefix, nothing to revise");
        return Ok(None);
    }

    let sample_size = CORRECT_SAMPLE.min(corrects.len());
    let sampled: Vec<QueueEntry> = corrects
        .choose_multiple(&mut rand::thread_rng(), sample_size)
        .cloned()
        .collect();

    let mut queue = mistakes;
    queue.extend(sampled);

    info!(
        anchor = %anchor_element_id,
        %prefix,
        queued = queue.len(),
        "revision chain initiated"
    );

    Ok(Some(RevisionChain {
        anchor_element_id: anchor_element_id.to_string(),
        queue,
    }))
}

/// The head entry popped from a chain, plus the chain that remains
#[derive(Debug, Clone)]
pub struct Popped {
    pub entry: QueueEntry,
    pub remaining: RevisionChain,
}

/// Pop the head of the chain riding on `current`, if one is active
///
/// Returns `Ok(None)` when the record carries no chain or the queue has
/// drained — the caller falls back to normal navigation from the anchor.
pub async fn advance(
    log: &ConversationLog,
    current: &ConversationRecord,
) -> Result<Option<Popped>, EngineError> {
    let snapshot = Snapshot::from_record(current)?;
    let Some(chain) = &snapshot.revision else {
        return Ok(None);
    };
    if chain.queue.is_empty() {
        return Ok(None);
    }

    // The closure may run twice under a conflict; it re-pops from the
    // freshly read snapshot each time, so exactly one head is consumed.
    let mut popped: Option<QueueEntry> = None;
    let updated = mutate_snapshot(log, current.id, |snapshot| {
        let Some(chain) = snapshot.revision.as_mut() else {
            return Err(EngineError::Conflict(current.id));
        };
        if chain.queue.is_empty() {
            return Err(EngineError::Conflict(current.id));
        }
        popped = Some(chain.queue.remove(0));
        Ok(())
    })
    .await?;

    let entry = popped.ok_or_else(|| EngineError::Conflict(current.id))?;
    let remaining = updated
        .revision
        .ok_or_else(|| EngineError::Conflict(current.id))?;

    Ok(Some(Popped { entry, remaining }))
}
