use crate::*;

use loralink_core::Record;

/// Short single-line text travels as one MSG record and lands in the inbox.
#[tokio::test]
async fn test_short_text_is_delivered() {
    let (a, mut b) = linked_pair("msg-short", |_| {}).await;

    let report = a.session.send_text("hello over the air").await.unwrap();
    assert_eq!(report.records, 1);

    match b.next_event().await {
        SessionEvent::MessageReceived(m) => {
            assert_eq!(m.origin, "alpha");
            assert_eq!(m.sequence, report.sequence);
            assert_eq!(m.text, "hello over the air");
            // the sender writes zeros; with no modem in between they arrive as-is
            assert_eq!(m.signal_quality, Some(0.0));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(b.inbox.count("alpha"), 1);
    assert!(b.saved_files().is_empty());
    // a MSG record never opens a partial transfer
    assert!(b.session.in_progress().is_empty());

    a.session.close().await;
    b.session.close().await;
}

/// Surrounding whitespace survives the trip; such text is fragmented
/// because receivers trim whole lines.
#[tokio::test]
async fn test_whitespace_edged_text_arrives_unchanged() {
    let (a, mut b) = linked_pair("msg-whitespace", |_| {}).await;

    let text = "  indented code  ";
    a.session.send_text(text).await.unwrap();

    match b.next_event().await {
        SessionEvent::MessageReceived(m) => assert_eq!(m.text, text),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(b.saved_files().is_empty());

    a.session.close().await;
    b.session.close().await;
}

/// Text over the single-record budget, or with line breaks, is fragmented
/// and still shown as a message on the other side.
#[tokio::test]
async fn test_long_and_multiline_text_is_reassembled_as_message() {
    let (a, mut b) = linked_pair("msg-long", |c| {
        c.transfer.max_message_bytes = 32;
        c.transfer.max_chunk_chars = 24;
    })
    .await;

    let long = "a fairly long message that will not fit into a single record".to_string();
    let report = a.session.send_text(&long).await.unwrap();
    assert!(report.records > 1);

    let multiline = "first line\nsecond line";
    a.session.send_text(multiline).await.unwrap();

    let mut texts = Vec::new();
    for _ in 0..2 {
        match b.next_event().await {
            SessionEvent::MessageReceived(m) => texts.push(m.text),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(texts, vec![long, multiline.to_string()]);
    assert!(b.saved_files().is_empty());

    a.session.close().await;
    b.session.close().await;
}

/// Both directions work at the same time.
#[tokio::test]
async fn test_full_duplex_messaging() {
    let (mut a, mut b) = linked_pair("msg-duplex", |_| {}).await;

    let (ra, rb) = tokio::join!(a.session.send_text("from a"), b.session.send_text("from b"));
    ra.unwrap();
    rb.unwrap();

    let SessionEvent::MessageReceived(at_b) = b.next_event().await else {
        panic!("b expected a message");
    };
    let SessionEvent::MessageReceived(at_a) = a.next_event().await else {
        panic!("a expected a message");
    };
    assert_eq!(at_b.text, "from a");
    assert_eq!(at_a.text, "from b");
    assert_eq!(at_a.origin, "bravo");

    a.session.close().await;
    b.session.close().await;
}

/// Sequence numbers increase per transfer and start where configured.
#[tokio::test]
async fn test_sequences_follow_configured_start() {
    let (node, mut peer) = raw_peer("msg-seq", |c| c.transfer.initial_sequence = Some(41)).await;

    node.session.send_text("one").await.unwrap();
    node.session.send_text("two").await.unwrap();

    let records = peer.capture(Duration::from_millis(200)).await;
    let sequences: Vec<u32> = records.iter().map(Record::sequence).collect();
    assert_eq!(sequences, vec![41, 42]);
    assert!(records.iter().all(|r| r.origin() == "local"));

    node.session.close().await;
}

/// Modem metrics on incoming lines are attached to the message; garbled
/// metric fields do not lose the line.
#[tokio::test]
async fn test_incoming_metrics_are_reported() {
    let (mut node, mut peer) = raw_peer("msg-metrics", |_| {}).await;

    peer.send_lines(["MSG,remote,3,-97.5,1200,with metrics", "MSG,remote,4,??,,without"])
        .await;

    let SessionEvent::MessageReceived(first) = node.next_event().await else {
        panic!("expected a message");
    };
    assert_eq!(first.signal_quality, Some(-97.5));
    assert_eq!(first.distance, Some(1200.0));

    let SessionEvent::MessageReceived(second) = node.next_event().await else {
        panic!("expected a message");
    };
    assert_eq!(second.text, "without");
    assert_eq!(second.signal_quality, None);
    assert_eq!(second.distance, None);
    assert!(node.session.in_progress().is_empty());

    node.session.close().await;
}
