//! Jump element
//!
//! A branching choice. Each option may carry a `goto` target, a `wait`
//! duration that schedules a deferred continuation, or neither — in which
//! case the flow simply resumes with the next element.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;
use tracing::info;

use super::{
    parse_duration, AnswerInput, Element, ElementHandler, ElementKind, Evaluation, NextStep,
    RenderContext,
};
use crate::db::log::ConversationRecord;

pub struct JumpHandler;

#[async_trait]
impl ElementHandler for JumpHandler {
    fn type_tag(&self) -> &'static str {
        "jump"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        Ok(element.base_payload())
    }

    async fn evaluate(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
        _record: &ConversationRecord,
        input: &AnswerInput,
    ) -> Result<Evaluation, EngineError> {
        let ElementKind::Jump { options } = &element.spec().kind else {
            return Err(EngineError::Validation("not a jump".to_string()));
        };

        let AnswerInput::Index(selected) = input else {
            return Err(EngineError::Validation(
                "jump expects a single option index".to_string(),
            ));
        };

        let option = options.get(*selected).ok_or_else(|| {
            EngineError::Validation(format!("option index {} out of range", selected))
        })?;

        if let Some(wait) = &option.wait {
            let duration = parse_duration(wait)?;
            let due_at = ctx.now + duration;
            ctx.waiting
                .insert(ctx.run.chat_id, &element.course_id, None, due_at)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
            info!(element = %element.id, %wait, "continuation deferred");

            return Ok(Evaluation {
                feedback: None,
                score: None,
                next: NextStep::Deferred,
            });
        }

        if let Some(goto) = &option.goto {
            return Ok(Evaluation {
                feedback: None,
                score: None,
                next: NextStep::Goto(goto.clone()),
            });
        }

        Ok(Evaluation::advance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::{spec_of, Harness};
    use crate::element::JumpOption;
    use chrono::Utc;

    fn jump_spec() -> crate::element::ElementSpec {
        spec_of(
            ElementKind::Jump {
                options: vec![
                    JumpOption {
                        text: "Keep going!".to_string(),
                        goto: None,
                        wait: None,
                    },
                    JumpOption {
                        text: "Tomorrow".to_string(),
                        goto: None,
                        wait: Some("1d".to_string()),
                    },
                    JumpOption {
                        text: "Skip ahead".to_string(),
                        goto: Some("m_9".to_string()),
                        wait: None,
                    },
                ],
            },
            Some("Shall we continue?"),
        )
    }

    async fn pick(harness: &Harness, index: usize) -> Evaluation {
        let mut element = Element::new("j_0", "demo", jump_spec());
        let record_id = harness.log_element(&element).await;
        let record = harness.log.get(record_id).await.unwrap().unwrap();
        JumpHandler
            .evaluate(&harness.ctx(), &mut element, &record, &AnswerInput::Index(index))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_option_advances() {
        let harness = Harness::new().await;
        assert_eq!(pick(&harness, 0).await.next, NextStep::Advance);
    }

    #[tokio::test]
    async fn wait_option_registers_a_deferred_continuation() {
        let harness = Harness::new().await;
        assert_eq!(pick(&harness, 1).await.next, NextStep::Deferred);

        let due = harness
            .waiting
            .select_due_active(Utc::now() + chrono::Duration::days(2))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].target_element_id, None);
    }

    #[tokio::test]
    async fn goto_option_branches() {
        let harness = Harness::new().await;
        assert_eq!(pick(&harness, 2).await.next, NextStep::Goto("m_9".to_string()));
    }
}
