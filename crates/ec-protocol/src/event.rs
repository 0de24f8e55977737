//! Events emitted by a streaming coach response.

/// Events emitted while a response streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental fragment of assistant text.
    TextDelta(String),

    /// Stream has completed successfully.
    Done,

    /// An error occurred before or during streaming.
    Error(String),
}
