//! Input element
//!
//! Free-text answer. With a `correct_answer` the submission is compared
//! under one of two normalization modes; without one any non-empty input is
//! accepted unscored.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{RenderedElement, ScorePair};

use super::{
    AnswerInput, Element, ElementHandler, ElementKind, Evaluation, InputMode, NextStep,
    RenderContext,
};
use crate::db::log::ConversationRecord;

pub struct InputHandler;

/// Normalize a submission for comparison
///
/// `text` mode trims and casefolds; `sequence` mode strips everything that
/// is not an ASCII digit, so "1, 2, 3" and "1 2 3" compare equal.
pub fn normalize(text: &str, mode: InputMode) -> String {
    match mode {
        InputMode::Text => text.trim().to_lowercase(),
        InputMode::Sequence => text.chars().filter(|c| c.is_ascii_digit()).collect(),
    }
}

#[async_trait]
impl ElementHandler for InputHandler {
    fn type_tag(&self) -> &'static str {
        "input"
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
        _ctx: &RenderContext<'_>,
        element: &mut Element,
        _record: &ConversationRecord,
        input: &AnswerInput,
    ) -> Result<Evaluation, EngineError> {
        let ElementKind::Input {
            correct_answer,
            feedback_correct,
            feedback_incorrect,
            input_type,
        } = &element.spec().kind
        else {
            return Err(EngineError::Validation("not an input".to_string()));
        };

        let AnswerInput::Text(text) = input else {
            return Err(EngineError::Validation("input expects text".to_string()));
        };

        if text.trim().is_empty() {
            return Err(EngineError::Validation("empty input".to_string()));
        }

        let Some(expected) = correct_answer else {
            // Free-form collection: accept anything non-empty, no scoring
            return Ok(Evaluation::advance());
        };

        if normalize(text, *input_type) == normalize(expected, *input_type) {
            Ok(Evaluation {
                feedback: feedback_correct.clone(),
                score: Some(ScorePair::new(1.0, 1.0)),
                next: NextStep::Advance,
            })
        } else {
            Ok(Evaluation {
                feedback: feedback_incorrect.clone(),
                score: Some(ScorePair::new(0.0, 1.0)),
                next: NextStep::Advance,
            })
        }
    }
}
