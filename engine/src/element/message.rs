//! Message element
//!
//! Plain content. Without a button the flow continues immediately; with one
//! the learner must tap to proceed.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;

use super::{Element, ElementHandler, RenderContext};

pub struct MessageHandler;

#[async_trait]
impl ElementHandler for MessageHandler {
    fn type_tag(&self) -> &'static str {
        "message"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        Ok(element.base_payload())
    }
}
