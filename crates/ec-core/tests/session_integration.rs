//! End-to-end flow: wire bytes through the delta reader into a session log.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use ec_backend::mock::wire;
use ec_backend::sse::delta_stream;
use ec_backend::CONNECTION_NOTICE;
use ec_core::session::{ConversationSession, CyclePhase};
use ec_protocol::{Role, StreamEvent};

/// What `CoachClient` does to a response body, minus the HTTP.
fn events_from<S>(byte_stream: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    delta_stream(byte_stream)
        .map(|result| match result {
            Ok(text) => StreamEvent::TextDelta(text),
            Err(_) => StreamEvent::Error(CONNECTION_NOTICE.to_string()),
        })
        .chain(futures::stream::iter([StreamEvent::Done]))
}

#[tokio::test]
async fn streamed_reply_lands_in_one_turn() {
    let transcript = wire::transcript(&["The HVAC zone ", "is 18% over baseline."]);
    let chunks = wire::rechunk(&transcript, 7);

    let mut session = ConversationSession::new();
    session.begin_turn("How is HVAC doing today?");
    session
        .consume(events_from(wire::byte_stream(chunks)), |_| {})
        .await;

    assert_eq!(session.turns().len(), 2);
    assert_eq!(session.turns()[0].role, Role::User);
    assert_eq!(session.turns()[1].role, Role::Assistant);
    assert_eq!(
        session.turns()[1].content,
        "The HVAC zone is 18% over baseline."
    );
    assert_eq!(session.phase(), CyclePhase::Settled);
}

#[tokio::test]
async fn chunking_does_not_change_the_conversation() {
    let transcript = wire::transcript(&["Refrigeration: 2,743 kWh — ", "within target ✓"]);

    let mut replies = Vec::new();
    for size in [1, 2, 3, 5, 64, transcript.len()] {
        let chunks = wire::rechunk(&transcript, size);

        let mut session = ConversationSession::new();
        session.begin_turn("status?");
        session
            .consume(events_from(wire::byte_stream(chunks)), |_| {})
            .await;

        replies.push(session.turns()[1].content.clone());
    }

    assert!(replies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(replies[0], "Refrigeration: 2,743 kWh — within target ✓");
}

#[tokio::test]
async fn transport_failure_mid_stream_keeps_partial_reply() {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(wire::frame("Compressed air usage was "))),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )),
    ];

    let mut session = ConversationSession::new();
    session.begin_turn("How did compressed air do?");
    session
        .consume(events_from(futures::stream::iter(chunks)), |_| {})
        .await;

    // Partial content retained, error notice appended, cycle over
    assert_eq!(session.turns().len(), 2);
    let reply = &session.turns()[1];
    assert!(reply.content.starts_with("Compressed air usage was "));
    assert!(reply.content.contains(CONNECTION_NOTICE));
    assert!(!session.is_loading());
}

#[tokio::test]
async fn frames_after_the_sentinel_never_reach_the_log() {
    let mut transcript = wire::transcript(&["All zones green."]);
    transcript.push_str(&wire::frame("stale frame"));

    let mut session = ConversationSession::new();
    session.begin_turn("summary");
    session
        .consume(events_from(wire::byte_stream(wire::rechunk(&transcript, 4))), |_| {})
        .await;

    assert_eq!(session.turns()[1].content, "All zones green.");
}

#[tokio::test]
async fn live_observer_matches_final_content() {
    let transcript = wire::transcript(&["Peak ", "demand ", "412 kW"]);

    let mut session = ConversationSession::new();
    session.begin_turn("peak?");

    let mut streamed = String::new();
    session
        .consume(
            events_from(wire::byte_stream(wire::rechunk(&transcript, 3))),
            |delta| streamed.push_str(delta),
        )
        .await;

    assert_eq!(streamed, session.turns()[1].content);
    assert_eq!(streamed, "Peak demand 412 kW");
}
