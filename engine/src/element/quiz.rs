//! Quiz element
//!
//! Single-select question with exactly one answer flagged correct. Scored
//! 1/1 on the correct pick, 0/1 otherwise; the feedback shown is the
//! selected answer's own feedback text.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{RenderedElement, ScorePair};

use super::{
    AnswerInput, Element, ElementHandler, ElementKind, Evaluation, NextStep, RenderContext,
};
use crate::db::log::ConversationRecord;

pub struct QuizHandler;

#[async_trait]
impl ElementHandler for QuizHandler {
    fn type_tag(&self) -> &'static str {
        "quiz"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        let ElementKind::Quiz { answers } = &element.spec().kind else {
            return Err(EngineError::Definition(format!(
                "element '{}' is not a quiz",
                element.id
            )));
        };

        if answers.iter().filter(|a| a.correct).count() != 1 {
            return Err(EngineError::Definition(format!(
                "quiz '{}' must flag exactly one correct answer",
                element.id
            )));
        }

        Ok(element.base_payload())
    }

    async fn evaluate(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
        _record: &ConversationRecord,
        input: &AnswerInput,
    ) -> Result<Evaluation, EngineError> {
        let ElementKind::Quiz { answers } = &element.spec().kind else {
            return Err(EngineError::Validation("not a quiz".to_string()));
        };

        let AnswerInput::Index(selected) = input else {
            return Err(EngineError::Validation(
                "quiz expects a single answer index".to_string(),
            ));
        };

        let answer = answers.get(*selected).ok_or_else(|| {
            EngineError::Validation(format!("answer index {} out of range", selected))
        })?;

        let score = if answer.correct { 1.0 } else { 0.0 };

        Ok(Evaluation {
            feedback: answer.feedback.clone(),
            score: Some(ScorePair::new(score, 1.0)),
            next: NextStep::Advance,
        })
    }
}
