//! Report builder AI assistance.
//!
//! Two endpoints: a streamed section assistant (same wire framing as the
//! chat, consumed through the same delta reader) and a non-streaming
//! full-report draft generator.

use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ec_protocol::StreamEvent;

use crate::coach::{error_notice, CoachClient, CoachError};

const SECTION_PATH: &str = "/functions/v1/report-section-ai";
const DRAFT_PATH: &str = "/functions/v1/generate-report";

/// What the section assistant is asked to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionAction {
    GenerateSummary,
    ExplainDeviation,
}

/// Request body for the report-section assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionRequest {
    pub action: SectionAction,
    pub section_id: String,
    pub section_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_date: Option<String>,
}

impl SectionRequest {
    pub fn new(
        action: SectionAction,
        section_id: impl Into<String>,
        section_label: impl Into<String>,
    ) -> Self {
        Self {
            action,
            section_id: section_id.into(),
            section_label: section_label.into(),
            existing_content: None,
            report_type: None,
            report_date: None,
        }
    }
}

/// Request body for full-report draft generation.
#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub report_type: String,
    pub report_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

/// Response of the draft generator.
#[derive(Debug, Deserialize)]
pub struct DraftResponse {
    pub draft: String,
    #[serde(default)]
    pub report_id: Option<String>,
}

impl CoachClient {
    /// Stream an AI-written report section.
    pub fn section_assist(
        &self,
        request: &SectionRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        self.stream_events(SECTION_PATH, request.clone(), cancel)
    }

    /// Stream a report section and collect it into one string.
    ///
    /// An error event anywhere in the stream fails the whole call; partial
    /// text is not returned for report sections (the caller either inserts
    /// a complete draft or nothing).
    pub async fn section_text(
        &self,
        request: &SectionRequest,
        cancel: CancellationToken,
    ) -> Result<String, CoachError> {
        let mut events = std::pin::pin!(self.section_assist(request, cancel));
        let mut text = String::new();
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::TextDelta(delta) => text.push_str(&delta),
                StreamEvent::Done => return Ok(text),
                StreamEvent::Error(message) => return Err(CoachError::Api(message)),
            }
        }
        // Cancelled before a terminal event
        Ok(text)
    }

    /// Generate a full report draft (non-streaming endpoint).
    pub async fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse, CoachError> {
        let response = self
            .http()
            .post(self.endpoint(DRAFT_PATH))
            .bearer_auth(self.api_key())
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CoachError::Api(error_notice(&body)));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
