//! Revision element
//!
//! Builds a mistake-retry chain over every scored answer under the prefix
//! and attaches it to this element's record. The navigation layer then
//! drains the chain one entry per advance before resuming from this
//! element's successor.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;
use tracing::info;

use super::{Element, ElementHandler, ElementKind, RenderContext};
use crate::revision;

pub struct RevisionHandler;

#[async_trait]
impl ElementHandler for RevisionHandler {
    fn type_tag(&self) -> &'static str {
        "revision"
    }

    async fn render(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        let ElementKind::Revision { prefix, no_mistakes } = &element.spec().kind else {
            return Err(EngineError::Definition(format!(
                "element '{}' is not a revision",
                element.id
            )));
        };

        let chain = revision::initiate(ctx.log, ctx.run.run_id, &element.id, prefix)
            .await?;

        let mut payload = element.base_payload();
        match chain {
            Some(chain) => {
                info!(
                    element = %element.id,
                    queued = chain.queue.len(),
                    "revision chain built"
                );
                element.snapshot.revision = Some(chain);
            }
            None => {
                // Nothing to revise; show the alternative text and let the
                // chain stay absent so advance falls through to `next`.
                payload.text = no_mistakes.clone();
            }
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::{spec_of, Harness};
    use crate::db::log::{NewRecord, RecordRole};
    use crate::element::Snapshot;

    fn revision_spec() -> crate::element::ElementSpec {
        spec_of(
            ElementKind::Revision {
                prefix: "q_".to_string(),
                no_mistakes: Some("All clean, nothing to review!".to_string()),
            },
            Some("Let's review what went wrong."),
        )
    }

    async fn log_scored(harness: &Harness, element_id: &str, score: f64) {
        let snapshot = Snapshot::new(spec_of(
            ElementKind::Quiz {
                answers: vec![crate::element::Answer {
                    text: "A".to_string(),
                    correct: true,
                    feedback: None,
                }],
            },
            Some("Q"),
        ));
        harness
            .log
            .append(NewRecord {
                chat_id: harness.run.chat_id,
                course_id: harness.run.course_id.clone(),
                run_id: harness.run.run_id,
                element_id: element_id.to_string(),
                element_type: "quiz".to_string(),
                role: RecordRole::User,
                report: Some("A".to_string()),
                snapshot: snapshot.to_json().unwrap(),
                score: Some(score),
                max_score: Some(1.0),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mistakes_build_a_chain() {
        let harness = Harness::new().await;
        log_scored(&harness, "q_1", 0.0).await;
        log_scored(&harness, "q_2", 1.0).await;

        let mut element = Element::new("rev_0", "demo", revision_spec());
        let payload = RevisionHandler
            .render(&harness.ctx(), &mut element)
            .await
            .unwrap();

        assert_eq!(payload.text.as_deref(), Some("Let's review what went wrong."));
        let chain = element.snapshot.revision.expect("chain attached");
        assert_eq!(chain.anchor_element_id, "rev_0");
        // one mistake + the single available correct
        assert_eq!(chain.queue.len(), 2);
        assert_eq!(chain.queue[0].element_id, "q_1");
    }

    #[tokio::test]
    async fn clean_slate_shows_no_mistakes_text() {
        let harness = Harness::new().await;
        log_scored(&harness, "q_1", 1.0).await;

        let mut element = Element::new("rev_0", "demo", revision_spec());
        let payload = RevisionHandler
            .render(&harness.ctx(), &mut element)
            .await
            .unwrap();

        assert_eq!(payload.text.as_deref(), Some("All clean, nothing to review!"));
        assert!(element.snapshot.revision.is_none());
    }
}
