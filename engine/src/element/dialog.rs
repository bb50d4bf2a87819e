//! Dialog element
//!
//! A free-running conversation with the LLM collaborator. The first learner
//! turn resolves the prompt template through the prompt variable resolver
//! and seeds the conversation with a system turn. Every turn grows the
//! dialog record's snapshot in place — the user turn is persisted *before*
//! the model call, so a timeout never discards it.
//!
//! The model signals the end of the conversation with a `{STOP}` token (or
//! the legacy end-of-dialog marker) anywhere in its reply; the marker is
//! stripped and the flow advances. A reply that was nothing but the marker
//! records no assistant turn.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{RenderedElement, Turn};
use tracing::warn;

use super::{
    mutate_snapshot, AnswerInput, Element, ElementHandler, ElementKind, Evaluation, NextStep,
    RenderContext,
};
use crate::db::log::ConversationRecord;
use crate::llm::ModelParams;
use crate::prompt::PromptResolver;

/// Preferred stop marker
const STOP_TOKEN: &str = "{STOP}";

/// Legacy marker some prompts instruct the model to emit instead
const END_MARKER: &str = "#конецдиалога";

pub struct DialogHandler;

/// Strip stop markers from a reply; returns the cleaned text and whether a
/// marker was present
fn strip_stop_markers(reply: &str) -> (String, bool) {
    let mut stopped = false;
    let mut cleaned = reply.to_string();

    if cleaned.contains(STOP_TOKEN) {
        cleaned = cleaned.replace(STOP_TOKEN, "");
        stopped = true;
    }
    if cleaned.contains(END_MARKER) {
        warn!("model ended a dialog with the legacy marker instead of {STOP_TOKEN}");
        cleaned = cleaned.replace(END_MARKER, "");
        stopped = true;
    }

    (cleaned, stopped)
}

#[async_trait]
impl ElementHandler for DialogHandler {
    fn type_tag(&self) -> &'static str {
        "dialog"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        if !matches!(element.spec().kind, ElementKind::Dialog { .. }) {
            return Err(EngineError::Definition(format!(
                "element '{}' is not a dialog",
                element.id
            )));
        }
        Ok(element.base_payload())
    }

    async fn evaluate(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
        record: &ConversationRecord,
        input: &AnswerInput,
    ) -> Result<Evaluation, EngineError> {
        let AnswerInput::Text(message) = input else {
            return Err(EngineError::Validation("dialog expects text".to_string()));
        };
        if message.trim().is_empty() {
            return Err(EngineError::Validation("empty message".to_string()));
        }

        let ElementKind::Dialog { prompt, .. } = &element.spec().kind else {
            return Err(EngineError::Validation("not a dialog".to_string()));
        };

        // Resolved up front: the closure below is synchronous and may run
        // twice under a version conflict.
        let resolved_prompt = PromptResolver::new(ctx.log)
            .resolve(prompt, ctx.run.run_id)
            .await;

        // First in-place update: seed the system turn if needed, append the
        // learner's turn. After this point the turn is durable.
        let seeded = mutate_snapshot(ctx.log, record.id, |snapshot| {
            let ElementKind::Dialog { conversation, .. } = &mut snapshot.element.kind else {
                return Err(EngineError::Definition(
                    "dialog record snapshot lost its conversation".to_string(),
                ));
            };
            if conversation.is_empty() {
                conversation.push(Turn::system(resolved_prompt.clone()));
            }
            conversation.push(Turn::user(message.clone()));
            Ok(())
        })
        .await?;
        element.snapshot = seeded;

        let ElementKind::Dialog {
            conversation,
            model,
            temperature,
            reasoning,
            ..
        } = &element.spec().kind
        else {
            return Err(EngineError::Definition("dialog snapshot corrupted".to_string()));
        };

        let params = ModelParams {
            model: model
                .clone()
                .unwrap_or_else(|| ctx.llm_defaults.model.clone()),
            temperature: temperature.unwrap_or(ctx.llm_defaults.temperature),
            reasoning_effort: reasoning
                .clone()
                .unwrap_or_else(|| ctx.llm_defaults.reasoning_effort.clone()),
        };

        let reply = ctx
            .llm
            .complete(conversation, &params)
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let (cleaned, stopped) = strip_stop_markers(&reply);

        if !cleaned.trim().is_empty() {
            // Second in-place update: append the assistant turn.
            let updated = mutate_snapshot(ctx.log, record.id, |snapshot| {
                let ElementKind::Dialog { conversation, .. } = &mut snapshot.element.kind else {
                    return Err(EngineError::Definition(
                        "dialog record snapshot lost its conversation".to_string(),
                    ));
                };
                conversation.push(Turn::assistant(cleaned.clone()));
                Ok(())
            })
            .await?;
            element.snapshot = updated;
        }

        let feedback = if cleaned.trim().is_empty() {
            None
        } else {
            Some(cleaned)
        };

        Ok(Evaluation {
            feedback,
            score: None,
            next: if stopped {
                NextStep::Advance
            } else {
                NextStep::Stay
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::{spec_of, Harness};
    use sdk::types::Role;

    fn dialog_spec(prompt: &str) -> crate::element::ElementSpec {
        spec_of(
            ElementKind::Dialog {
                prompt: prompt.to_string(),
                conversation: vec![],
                model: None,
                temperature: None,
                reasoning: None,
                voice_response: false,
                tts_voice: None,
                tts_model: None,
                tts_speed: None,
            },
            Some("Let's talk"),
        )
    }

    async fn run_turn(harness: &Harness, message: &str) -> (Evaluation, Element) {
        let mut element = Element::new("d_0", "demo", dialog_spec("Be a tutor."));
        let record_id = harness.log_element(&element).await;
        let record = harness.log.get(record_id).await.unwrap().unwrap();

        let evaluation = DialogHandler
            .evaluate(
                &harness.ctx(),
                &mut element,
                &record,
                &AnswerInput::Text(message.to_string()),
            )
            .await
            .unwrap();
        (evaluation, element)
    }

    #[test]
    fn stop_token_is_stripped_anywhere() {
        let (cleaned, stopped) = strip_stop_markers("Well done!{STOP}");
        assert!(stopped);
        assert_eq!(cleaned, "Well done!");

        let (cleaned, stopped) = strip_stop_markers("Keep going");
        assert!(!stopped);
        assert_eq!(cleaned, "Keep going");
    }

    #[test]
    fn legacy_marker_also_stops() {
        let (cleaned, stopped) = strip_stop_markers("Молодец! #конецдиалога");
        assert!(stopped);
        assert_eq!(cleaned, "Молодец! ");
    }

    #[tokio::test]
    async fn first_turn_seeds_system_prompt_and_grows_conversation() {
        let harness = Harness::with_replies(&["Nice to meet you"]).await;
        let (evaluation, element) = run_turn(&harness, "hello").await;

        assert_eq!(evaluation.feedback.as_deref(), Some("Nice to meet you"));
        assert_eq!(evaluation.next, NextStep::Stay);

        let ElementKind::Dialog { conversation, .. } = &element.spec().kind else {
            panic!("not a dialog");
        };
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[0].role, Role::System);
        assert_eq!(conversation[1].content, "hello");
        assert_eq!(conversation[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn stop_reply_advances_and_marker_only_reply_records_no_turn() {
        let harness = Harness::with_replies(&["{STOP}"]).await;
        let (evaluation, element) = run_turn(&harness, "bye").await;

        assert_eq!(evaluation.feedback, None);
        assert_eq!(evaluation.next, NextStep::Advance);

        let ElementKind::Dialog { conversation, .. } = &element.spec().kind else {
            panic!("not a dialog");
        };
        // system + user only; the empty assistant reply was dropped
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn failed_generation_keeps_the_user_turn() {
        let harness = Harness::with_replies(&[]).await;
        let mut element = Element::new("d_0", "demo", dialog_spec("Be a tutor."));
        let record_id = harness.log_element(&element).await;
        let record = harness.log.get(record_id).await.unwrap().unwrap();

        let result = DialogHandler
            .evaluate(
                &harness.ctx(),
                &mut element,
                &record,
                &AnswerInput::Text("hello".to_string()),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Generation(_))));

        // The learner's turn survived the upstream failure.
        let stored = harness.log.get(record_id).await.unwrap().unwrap();
        let snapshot = crate::element::Snapshot::from_record(&stored).unwrap();
        let ElementKind::Dialog { conversation, .. } = &snapshot.element.kind else {
            panic!("not a dialog");
        };
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[1].content, "hello");
    }
}
