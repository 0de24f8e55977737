//! Mock coach provider for testing.
//!
//! Produces the exact same `StreamEvent` sequence as the real client,
//! allowing session-level tests to run without HTTP, plus a wire-level
//! fixture module that frames scripted deltas the way the gateway does
//! for exercising the delta reader end to end.

use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use tokio::time::sleep;

use ec_protocol::StreamEvent;

/// Configurable mock responses for testing.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Emit a text delta.
    Text { content: String },
    /// Emit an error.
    Error { message: String },
    /// Delay before the next event (for timing tests).
    Delay { ms: u64 },
}

/// Configuration for a mock event stream.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Sequence of responses to emit.
    pub responses: Vec<MockResponse>,
    /// Optional delay between each event (ms).
    pub chunk_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }
}

/// Create a stream of StreamEvents from mock config.
///
/// An `Error` response terminates the stream the way the real client does:
/// no `Done` follows it.
pub fn mock_stream(config: MockConfig) -> impl Stream<Item = StreamEvent> {
    stream! {
        for response in config.responses {
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match response {
                MockResponse::Text { content } => {
                    yield StreamEvent::TextDelta(content);
                }
                MockResponse::Error { message } => {
                    yield StreamEvent::Error(message);
                    return;
                }
                MockResponse::Delay { ms } => {
                    sleep(Duration::from_millis(ms)).await;
                    // Delay doesn't emit an event
                }
            }
        }

        yield StreamEvent::Done;
    }
}

/// Built-in fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    /// A response streamed in the given text chunks.
    pub fn streaming_text(chunks: &[&str]) -> MockConfig {
        let responses = chunks
            .iter()
            .map(|chunk| MockResponse::Text {
                content: (*chunk).to_string(),
            })
            .collect();

        MockConfig::new().with_responses(responses)
    }

    /// A stream that fails partway through a response.
    pub fn error_mid_stream(text_before: &str, error: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            MockResponse::Text {
                content: text_before.to_string(),
            },
            MockResponse::Error {
                message: error.to_string(),
            },
        ])
    }

    /// A request rejected before any content streams.
    pub fn rejected(error: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![MockResponse::Error {
            message: error.to_string(),
        }])
    }
}

/// Wire-level fixtures: the framed bytes the gateway actually sends.
pub mod wire {
    use super::*;

    /// Frame one delta the way the gateway does.
    pub fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    /// The terminal sentinel line.
    pub fn done() -> String {
        "data: [DONE]\n\n".to_string()
    }

    /// A full transcript for a sequence of deltas.
    pub fn transcript(deltas: &[&str]) -> String {
        let mut wire = String::new();
        for delta in deltas {
            wire.push_str(&frame(delta));
        }
        wire.push_str(&done());
        wire
    }

    /// Split wire text into chunks of at most `size` bytes, ignoring line
    /// and character boundaries like a TCP segmenter would.
    pub fn rechunk(wire: &str, size: usize) -> Vec<Bytes> {
        assert!(size > 0);
        wire.as_bytes()
            .chunks(size)
            .map(Bytes::copy_from_slice)
            .collect()
    }

    /// Turn chunks into the byte stream shape a response body has.
    pub fn byte_stream(
        chunks: Vec<Bytes>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }
}
