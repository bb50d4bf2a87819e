//! Placeholder handler for unimplemented element types
//!
//! A course authored for a newer engine may contain types this build does
//! not know. They render as a placeholder and never pause the flow; the
//! navigation resolver additionally skips them as "next" candidates.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;
use tracing::warn;

use super::{Element, ElementHandler, RenderContext};

pub struct UnknownHandler;

#[async_trait]
impl ElementHandler for UnknownHandler {
    fn type_tag(&self) -> &'static str {
        "unknown"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        warn!(element = %element.id, "rendering placeholder for unimplemented element type");

        let mut payload = element.base_payload();
        payload.text = Some("This part of the course is not available yet.".to_string());
        payload.waits_for_input = false;
        Ok(payload)
    }
}
