//! Multichoice element
//!
//! Multi-select question where each answer is independently right or wrong.
//! Scoring counts hits over *all* answers: an answer contributes a hit when
//! its membership in the selection matches its correct flag, so leaving an
//! incorrect answer unselected earns a hit too. All hits → 1.0, no hits →
//! 0.0, anything else → 0.5. This exact rule is load-bearing for existing
//! course content; see the fixtures below before changing anything.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{RenderedElement, ScorePair};

use super::{
    Answer, AnswerInput, Element, ElementHandler, ElementKind, Evaluation, NextStep, RenderContext,
};
use crate::db::log::ConversationRecord;

pub struct MultiChoiceHandler;

/// Per-answer feedback block for the selected answers
fn selection_feedback(answers: &[Answer], selection: &[usize]) -> String {
    let mut feedback = String::new();
    for &i in selection {
        let Some(answer) = answers.get(i) else {
            continue;
        };
        let emoji = if answer.correct { "✅" } else { "🚫" };
        feedback.push_str(&format!("{} {}\n", emoji, answer.text));
        if let Some(note) = &answer.feedback {
            feedback.push_str(&format!("   👉 {}\n", note));
        }
    }
    feedback
}

/// The hits-over-all-answers score and the matching summary selector
fn score_selection(answers: &[Answer], selection: &[usize]) -> (f64, Verdict) {
    let hits = answers
        .iter()
        .enumerate()
        .filter(|(i, answer)| selection.contains(i) == answer.correct)
        .count();

    if hits == answers.len() {
        (1.0, Verdict::Correct)
    } else if hits == 0 {
        (0.0, Verdict::Incorrect)
    } else {
        (0.5, Verdict::Partial)
    }
}

enum Verdict {
    Correct,
    Partial,
    Incorrect,
}

#[async_trait]
impl ElementHandler for MultiChoiceHandler {
    fn type_tag(&self) -> &'static str {
        "multi_choice"
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
        let ElementKind::MultiChoice {
            answers,
            feedback_correct,
            feedback_partial,
            feedback_incorrect,
        } = &element.spec().kind
        else {
            return Err(EngineError::Validation("not a multichoice".to_string()));
        };

        let AnswerInput::Selection(selection) = input else {
            return Err(EngineError::Validation(
                "multichoice expects a set of answer indexes".to_string(),
            ));
        };

        if selection.iter().any(|&i| i >= answers.len()) {
            return Err(EngineError::Validation(
                "answer index out of range".to_string(),
            ));
        }

        let (score, verdict) = score_selection(answers, selection);
        let summary = match verdict {
            Verdict::Correct => feedback_correct,
            Verdict::Partial => feedback_partial,
            Verdict::Incorrect => feedback_incorrect,
        };

        let mut feedback = selection_feedback(answers, selection);
        feedback.push_str(summary);

        Ok(Evaluation {
            feedback: Some(feedback),
            score: Some(ScorePair::new(score, 1.0)),
            next: NextStep::Advance,
        })
    }
}
