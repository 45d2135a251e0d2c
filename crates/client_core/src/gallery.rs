use std::sync::Arc;

use shared::{
    domain::Emotion,
    protocol::{ByEmotionResponse, HighlightsResponse, TimelineEntry, TimelineResponse},
};
use tracing::debug;

use crate::{
    error::{JobError, ValidationError},
    transport::{decode, ApiRequest, Transport},
};

pub const DEFAULT_HIGHLIGHT_LIMIT: u32 = 20;

/// Read-only views of previously analyzed images.
///
/// Every call returns a fresh list; callers replace what they display
/// wholesale and keep the old list when a fetch fails.
pub struct GalleryLoader {
    transport: Arc<dyn Transport>,
}

impl GalleryLoader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch_timeline(&self) -> Result<Vec<TimelineEntry>, JobError> {
        let value = self
            .transport
            .send(ApiRequest::get("/gallery/timeline"))
            .await?;
        let response: TimelineResponse = decode(value)?;
        debug!(entries = response.timeline.len(), "gallery: timeline fetched");
        Ok(response.timeline)
    }

    pub async fn fetch_highlights(&self, limit: u32) -> Result<Vec<TimelineEntry>, JobError> {
        if limit == 0 {
            return Err(ValidationError::NonPositive("limit").into());
        }
        let value = self
            .transport
            .send(ApiRequest::get("/gallery/highlights").query("limit", limit))
            .await?;
        let response: HighlightsResponse = decode(value)?;
        debug!(limit, entries = response.highlights.len(), "gallery: highlights fetched");
        Ok(response.highlights)
    }

    pub async fn fetch_by_emotion(&self, emotion: Emotion) -> Result<Vec<TimelineEntry>, JobError> {
        let value = self
            .transport
            .send(ApiRequest::get(format!("/gallery/by-emotion/{emotion}")))
            .await?;
        let response: ByEmotionResponse = decode(value)?;
        if response.emotion != emotion {
            return Err(JobError::ResponseMismatch(format!(
                "asked for {emotion} images, backend answered for {}",
                response.emotion
            )));
        }
        Ok(response
            .images
            .into_iter()
            .map(|mut entry| {
                entry.emotion.get_or_insert(emotion);
                entry
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "tests/gallery_tests.rs"]
mod tests;
