//! Question element
//!
//! Informational single-select: per-answer feedback, never scored. Used for
//! polls and branching conversations where no answer is wrong.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{RenderedElement, ScorePair};

use super::{
    AnswerInput, Element, ElementHandler, ElementKind, Evaluation, NextStep, RenderContext,
};
use crate::db::log::ConversationRecord;

pub struct QuestionHandler;

#[async_trait]
impl ElementHandler for QuestionHandler {
    fn type_tag(&self) -> &'static str {
        "question"
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
        let ElementKind::Question { answers } = &element.spec().kind else {
            return Err(EngineError::Validation("not a question".to_string()));
        };

        let AnswerInput::Index(selected) = input else {
            return Err(EngineError::Validation(
                "question expects a single answer index".to_string(),
            ));
        };

        let answer = answers.get(*selected).ok_or_else(|| {
            EngineError::Validation(format!("answer index {} out of range", selected))
        })?;

        Ok(Evaluation {
            feedback: answer.feedback.clone(),
            score: Some(ScorePair::new(0.0, 0.0)),
            next: NextStep::Advance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testutil::{eval, spec_of};
    use crate::element::Answer;

    #[tokio::test]
    async fn questions_are_never_scored() {
        let spec = spec_of(
            ElementKind::Question {
                answers: vec![
                    Answer {
                        text: "5+ Great!".to_string(),
                        correct: false,
                        feedback: Some("Glad to hear it".to_string()),
                    },
                    Answer {
                        text: "2 Poor".to_string(),
                        correct: false,
                        feedback: None,
                    },
                ],
            },
            Some("How was the lesson?"),
        );

        let result = eval(&QuestionHandler, spec.clone(), AnswerInput::Index(0))
            .await
            .unwrap();
        assert_eq!(result.feedback.as_deref(), Some("Glad to hear it"));
        assert_eq!(result.score, Some(ScorePair::new(0.0, 0.0)));

        let silent = eval(&QuestionHandler, spec, AnswerInput::Index(1))
            .await
            .unwrap();
        assert_eq!(silent.feedback, None);
    }
}
