//! Delay element
//!
//! Registers a deferred continuation toward `goto` the moment it renders,
//! then optionally shows its text. A delay with no text still writes a
//! "silent delay" record so the log keeps advancing.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;
use tracing::info;

use super::{parse_duration, Element, ElementHandler, ElementKind, RenderContext};

pub struct DelayHandler;

#[async_trait]
impl ElementHandler for DelayHandler {
    fn type_tag(&self) -> &'static str {
        "delay"
    }

    async fn render(
        &self,
        ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        let ElementKind::Delay { wait, goto } = &element.spec().kind else {
            return Err(EngineError::Definition(format!(
                "element '{}' is not a delay",
                element.id
            )));
        };

        let duration = parse_duration(wait)
            .map_err(|_| EngineError::Definition(format!("delay '{}' has invalid wait '{}'", element.id, wait)))?;
        let due_at = ctx.now + duration;

        ctx.waiting
            .insert(ctx.run.chat_id, &element.course_id, Some(goto), due_at)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        info!(element = %element.id, %wait, %goto, "delay registered");

        // A delay without text stays silent toward the learner; the session
        // layer still writes a log record for it.
        Ok(element.base_payload())
    }
}
