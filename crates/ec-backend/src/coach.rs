//! Energy Coach chat client with streamed responses.

use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use futures::Stream;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ec_protocol::{CoachRequest, StreamEvent, Turn};

use crate::sse::delta_stream;

const CHAT_PATH: &str = "/functions/v1/energy-coach";

/// Notice used when the server's error body yields nothing usable.
pub const FALLBACK_NOTICE: &str = "Failed to connect to Energy Coach";

/// Notice used when the request or the stream itself fails at the
/// transport level.
pub const CONNECTION_NOTICE: &str = "Connection error. Please try again.";

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {0}")]
    Api(String),
}

/// Client for the hosted coach endpoints.
pub struct CoachClient {
    base_url: String,
    api_key: String,
    http: Client,
}

/// Build an HTTP client with appropriate timeouts and connection limits.
fn build_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
}

impl CoachClient {
    /// Create a new client for the given service base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            api_key: api_key.into(),
            http: build_http_client(),
        }
    }

    /// Send the conversation so far and stream back the assistant's reply.
    ///
    /// The returned stream yields `TextDelta` events in wire order, then
    /// exactly one of `Done` (natural completion) or `Error` (request
    /// failure or mid-stream transport error). Cancelling the token stops
    /// emission without a terminal event; whatever the caller accumulated
    /// stays as is.
    pub fn chat(
        &self,
        turns: &[Turn],
        context: Option<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let mut request = CoachRequest::new(turns.to_vec());
        if let Some(context) = context {
            request = request.with_context(context);
        }
        self.stream_events(CHAT_PATH, request, cancel)
    }

    /// POST a JSON body to an endpoint and turn the framed response into
    /// protocol events. Shared by the chat and report-section call sites.
    pub(crate) fn stream_events<B>(
        &self,
        path: &str,
        body: B,
        cancel: CancellationToken,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static
    where
        B: Serialize + Send + Sync + 'static,
    {
        let http = self.http.clone();
        let url = format!("{}{path}", self.base_url);
        let api_key = self.api_key.clone();

        stream! {
            let response = match post_stream(&http, &url, &api_key, &body).await {
                Ok(response) => response,
                Err(CoachError::Api(message)) => {
                    yield StreamEvent::Error(message);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, url = %url, "coach request failed");
                    yield StreamEvent::Error(CONNECTION_NOTICE.to_string());
                    return;
                }
            };

            let mut deltas = delta_stream(response.bytes_stream());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = deltas.next() => match next {
                        Some(Ok(text)) => yield StreamEvent::TextDelta(text),
                        Some(Err(e)) => {
                            warn!(error = %e, "stream read failed mid-response");
                            yield StreamEvent::Error(CONNECTION_NOTICE.to_string());
                            return;
                        }
                        None => break,
                    },
                }
            }

            yield StreamEvent::Done;
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn post_stream<B: Serialize>(
    http: &Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<reqwest::Response, CoachError> {
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "coach endpoint returned failure");
        return Err(CoachError::Api(error_notice(&body)));
    }

    Ok(response)
}

/// Best-effort extraction of the server-reported error message from a
/// failure body; falls back to a generic notice.
pub(crate) fn error_notice(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_NOTICE.to_string())
}
