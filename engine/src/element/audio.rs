//! Audio element
//!
//! Media-only content; never waits for input. The report text falls back to
//! a media summary so the log always has something to show.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::RenderedElement;

use super::{Element, ElementHandler, RenderContext};

pub struct AudioHandler;

#[async_trait]
impl ElementHandler for AudioHandler {
    fn type_tag(&self) -> &'static str {
        "audio"
    }

    async fn render(
        &self,
        _ctx: &RenderContext<'_>,
        element: &mut Element,
    ) -> Result<RenderedElement, EngineError> {
        if element.spec().media.is_empty() {
            return Err(EngineError::Definition(format!(
                "audio element '{}' has no media",
                element.id
            )));
        }

        let mut payload = element.base_payload();
        if payload.text.is_none() {
            payload.text = Some(format!("🎵 Audio: {} file(s)", payload.media.len()));
        }
        Ok(payload)
    }
}
