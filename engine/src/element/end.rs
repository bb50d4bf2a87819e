//! End element
//!
//! Terminal marker: flips the run's ended flag, irreversibly. Typically the
//! last element of a chain of delayed continuations.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;
use tracing::info;

use super::{Element, ElementHandler, ElementKind, RenderContext};

pub struct EndHandler;

#[async_trait]
impl ElementHandler for EndHandler {
    fn type_tag(&self) -> &'static str {
        "end"
    }

    async fn render(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        if !matches!(element.spec().kind, ElementKind::End) {
            return Err(EngineError::Definition(format!(
                "element '{}' is not an end",
                element.id
            )));
        }

        ctx.runs
            .mark_ended(ctx.run.run_id)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        info!(run = ctx.run.run_id, course = %element.course_id, "run ended");

        let mut payload = element.base_payload();
        if payload.text.is_none() {
            payload.text = Some("Course ended".to_string());
        }
        Ok(payload)
    }
}
