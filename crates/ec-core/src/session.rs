//! Conversation session: the turn accumulator and per-request state machine.
//!
//! A session is an explicitly constructed, owned value; conversation state
//! lives wherever the session lives, not in any process-wide singleton.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ec_backend::{CoachClient, FALLBACK_NOTICE};
use ec_protocol::{ConversationLog, Role, StreamEvent, Turn};

/// Phase of the current request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    /// No request has been made yet (or the log was cleared).
    #[default]
    Idle,
    /// A user turn was submitted and the request dispatched; no content yet.
    AwaitingResponse,
    /// Deltas are arriving.
    Streaming,
    /// The cycle ended: naturally, by error, or by cancellation.
    Settled,
}

/// Accumulates streamed events into a [`ConversationLog`].
///
/// One cycle runs `Idle/Settled → AwaitingResponse → Streaming → Settled`.
/// Every cycle ends with exactly one assistant turn for the submitted user
/// turn: real content, a synthetic error notice, or (after cancellation)
/// whatever partial content had arrived.
#[derive(Debug, Default)]
pub struct ConversationSession {
    log: ConversationLog,
    phase: CyclePhase,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a request cycle by submitting the user's turn.
    ///
    /// Overlapping cycles on one session are out of contract: the caller
    /// must keep submission disabled while [`is_loading`](Self::is_loading)
    /// is true.
    pub fn begin_turn(&mut self, input: impl Into<String>) {
        debug_assert!(
            !self.is_loading(),
            "a new turn was submitted while a response was still streaming"
        );
        self.log.submit_user_turn(input);
        self.phase = CyclePhase::AwaitingResponse;
    }

    /// Drive one response stream to completion, applying deltas to the log
    /// in arrival order. `on_delta` observes each applied fragment.
    ///
    /// Consumes events until a terminal `Done`/`Error` or until the stream
    /// runs dry (a cancelled stream ends without a terminal event); either
    /// way the cycle is `Settled` afterwards and later events would be
    /// ignored.
    pub async fn consume<S>(&mut self, events: S, mut on_delta: impl FnMut(&str))
    where
        S: Stream<Item = StreamEvent>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            if self.phase == CyclePhase::Settled {
                debug!("ignoring event after cycle settled");
                break;
            }
            match event {
                StreamEvent::TextDelta(text) => {
                    self.phase = CyclePhase::Streaming;
                    self.log.apply_assistant_delta(&text);
                    on_delta(&text);
                }
                StreamEvent::Done => {
                    self.settle_answered(&mut on_delta);
                }
                StreamEvent::Error(message) => {
                    let notice = format!("⚠️ {message}");
                    self.log.apply_assistant_delta(&notice);
                    on_delta(&notice);
                    self.phase = CyclePhase::Settled;
                }
            }
        }
        if self.phase != CyclePhase::Settled {
            // Cancelled mid-stream: keep what arrived, end the cycle
            self.phase = CyclePhase::Settled;
        }
    }

    /// Settle a naturally completed cycle, upholding the guarantee that the
    /// user turn is answered even when the stream carried no content.
    fn settle_answered(&mut self, on_delta: &mut impl FnMut(&str)) {
        let answered = matches!(self.log.last(), Some(turn) if turn.role == Role::Assistant);
        if !answered {
            let notice = format!("⚠️ {FALLBACK_NOTICE}");
            self.log.apply_assistant_delta(&notice);
            on_delta(&notice);
        }
        self.phase = CyclePhase::Settled;
    }

    /// Clear the conversation. The next cycle starts a fresh log.
    pub fn clear(&mut self) {
        self.log.reset();
        self.phase = CyclePhase::Idle;
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase,
            CyclePhase::AwaitingResponse | CyclePhase::Streaming
        )
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn turns(&self) -> &[Turn] {
        self.log.turns()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }
}

/// A conversation session bound to a [`CoachClient`].
pub struct CoachSession {
    session: ConversationSession,
    client: CoachClient,
    cancel: CancellationToken,
}

impl CoachSession {
    pub fn new(client: CoachClient) -> Self {
        Self {
            session: ConversationSession::new(),
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Send a user message and stream the assistant's reply into the log.
    pub async fn send(&mut self, input: &str, context: Option<String>) {
        self.send_with(input, context, |_| {}).await;
    }

    /// Like [`send`](Self::send), observing each delta as it is applied.
    /// This is the hook a live view renders from.
    pub async fn send_with(
        &mut self,
        input: &str,
        context: Option<String>,
        on_delta: impl FnMut(&str),
    ) {
        if self.cancel.is_cancelled() {
            // A previous cycle was aborted; this cycle gets a fresh handle
            self.cancel = CancellationToken::new();
        }
        self.session.begin_turn(input);
        let events = self
            .client
            .chat(self.session.turns(), context, self.cancel.child_token());
        self.session.consume(events, on_delta).await;
    }

    /// Ask about a specific KPI, attaching its data as request context.
    pub async fn ask_about_kpi(&mut self, kpi_name: &str, question: &str, kpi_context: &str) {
        self.send(&kpi_prompt(kpi_name, question), Some(kpi_context.to_string()))
            .await;
    }

    /// Handle that aborts the in-flight request cycle. The current turn
    /// keeps whatever content had accumulated.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Clear the conversation, aborting any in-flight stream.
    pub fn clear(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.session.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        self.session.turns()
    }

    pub fn is_loading(&self) -> bool {
        self.session.is_loading()
    }
}

/// Question sent when the user asks about a specific KPI card.
fn kpi_prompt(kpi_name: &str, question: &str) -> String {
    format!("{question} — regarding the \"{kpi_name}\" KPI")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_backend::mock::{fixtures, mock_stream};

    #[tokio::test]
    async fn deltas_accumulate_into_one_assistant_turn() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");
        session
            .consume(mock_stream(fixtures::streaming_text(&["Hel", "lo"])), |_| {})
            .await;

        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[0], Turn::user("hi"));
        assert_eq!(session.turns()[1], Turn::assistant("Hello"));
        assert_eq!(session.phase(), CyclePhase::Settled);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn observer_sees_every_fragment_in_order() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");

        let mut seen = Vec::new();
        session
            .consume(
                mock_stream(fixtures::streaming_text(&["a", "b", "c"])),
                |delta| seen.push(delta.to_string()),
            )
            .await;

        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(session.turns()[1].content, "abc");
    }

    #[tokio::test]
    async fn loading_until_settled() {
        let mut session = ConversationSession::new();
        assert!(!session.is_loading());

        session.begin_turn("hi");
        assert!(session.is_loading());
        assert_eq!(session.phase(), CyclePhase::AwaitingResponse);

        session
            .consume(mock_stream(fixtures::streaming_text(&["ok"])), |_| {})
            .await;
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn rejected_request_yields_exactly_one_error_turn() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");
        session
            .consume(
                mock_stream(fixtures::rejected(
                    "Rate limit exceeded. Please wait a moment and try again.",
                )),
                |_| {},
            )
            .await;

        assert_eq!(session.turns().len(), 2);
        let reply = &session.turns()[1];
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.content.contains("Rate limit exceeded"));
        assert_eq!(session.phase(), CyclePhase::Settled);
    }

    #[tokio::test]
    async fn mid_stream_error_keeps_partial_content() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");
        session
            .consume(
                mock_stream(fixtures::error_mid_stream("Checking the HVAC zone", "upstream reset")),
                |_| {},
            )
            .await;

        // One assistant turn: the partial text plus the notice, never two turns
        assert_eq!(session.turns().len(), 2);
        let reply = &session.turns()[1];
        assert!(reply.content.starts_with("Checking the HVAC zone"));
        assert!(reply.content.contains("upstream reset"));
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn empty_stream_still_answers_the_user_turn() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");
        session
            .consume(mock_stream(fixtures::streaming_text(&[])), |_| {})
            .await;

        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[1].role, Role::Assistant);
        assert!(!session.turns()[1].content.is_empty());
    }

    #[tokio::test]
    async fn cancelled_stream_settles_with_partial_content() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");

        // A cancelled stream ends without a terminal event
        let truncated = futures::stream::iter(vec![
            StreamEvent::TextDelta("par".to_string()),
            StreamEvent::TextDelta("tial".to_string()),
        ]);
        session.consume(truncated, |_| {}).await;

        assert_eq!(session.turns()[1].content, "partial");
        assert_eq!(session.phase(), CyclePhase::Settled);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn clear_resets_log_and_phase() {
        let mut session = ConversationSession::new();
        session.begin_turn("hi");
        session
            .consume(mock_stream(fixtures::streaming_text(&["hello"])), |_| {})
            .await;

        session.clear();
        assert!(session.turns().is_empty());
        assert_eq!(session.phase(), CyclePhase::Idle);

        session.begin_turn("again");
        assert_eq!(session.turns().len(), 1);
    }

    #[tokio::test]
    async fn consecutive_cycles_alternate_turns() {
        let mut session = ConversationSession::new();

        session.begin_turn("first");
        session
            .consume(mock_stream(fixtures::streaming_text(&["one"])), |_| {})
            .await;
        session.begin_turn("second");
        session
            .consume(mock_stream(fixtures::streaming_text(&["two"])), |_| {})
            .await;

        let roles: Vec<Role> = session.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(session.turns()[3].content, "two");
    }

    #[test]
    fn kpi_prompt_format() {
        assert_eq!(
            kpi_prompt("Peak Demand", "Why did this spike?"),
            "Why did this spike? — regarding the \"Peak Demand\" KPI"
        );
    }
}
