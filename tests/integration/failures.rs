use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::*;

use loralink_core::LinkError;
use loralink_services::transfer::fragment_records;

/// A transport whose reads never complete and whose writes always fail.
struct DeadRadio;

impl AsyncRead for DeadRadio {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for DeadRadio {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "modem gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A transfer missing a fragment is evicted after the chunk timeout and
/// reported; nothing is written.
#[tokio::test]
async fn test_incomplete_transfer_expires() {
    let (mut node, mut peer) = raw_peer("fail-expire", |c| c.reassembly.chunk_timeout_secs = 1).await;
    let records = fragment_records(&[0x42u8; 600], "remote", 12, 100).unwrap();
    let total = records.len() as u32;
    peer.send_records(&records[..records.len() - 1]).await;

    match node.next_event().await {
        SessionEvent::TransferExpired {
            origin,
            sequence,
            received,
            total: t,
            error,
        } => {
            assert_eq!(origin, "remote");
            assert_eq!(sequence, 12);
            assert_eq!(received, total as usize - 1);
            assert_eq!(t, total);
            assert!(error.contains("remote/12 expired"), "{error}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(node.saved_files().is_empty());
    assert!(node.session.in_progress().is_empty());

    // the missing fragment arriving late does not resurrect the transfer
    peer.send_records(&records[records.len() - 1..]).await;
    node.expect_quiet(Duration::from_millis(300)).await;
    assert!(node.saved_files().is_empty());

    node.session.close().await;
}

/// Fragments that do not decode are reported and dropped; the session keeps going.
#[tokio::test]
async fn test_corrupt_payload_is_reported() {
    let (mut node, mut peer) = raw_peer("fail-corrupt", |_| {}).await;

    peer.send_lines(["FRAG,remote,1,0,2,0,0,QU*D", "FRAG,remote,1,1,2,0,0,RA=="]).await;
    match node.next_event().await {
        SessionEvent::DecodeFailed { origin, sequence, .. } => {
            assert_eq!(origin, "remote");
            assert_eq!(sequence, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    peer.send_lines(["MSG,remote,2,0,0,still alive"]).await;
    let SessionEvent::MessageReceived(m) = node.next_event().await else {
        panic!("expected a message");
    };
    assert_eq!(m.text, "still alive");
    assert!(node.saved_files().is_empty());

    node.session.close().await;
}

/// Malformed lines are ignored without events.
#[tokio::test]
async fn test_malformed_lines_are_ignored() {
    let (mut node, mut peer) = raw_peer("fail-garbage", |_| {}).await;

    peer.send_lines([
        "",
        "+EVT:RXP2P noise from the modem",
        "MSG,remote,notanumber,0,0,x",
        "FRAG,remote,1,5,2,0,0,QQ==",
        "FRAG,remote,1,0,0,0,0,QQ==",
        "MSG,remote",
    ])
    .await;
    node.expect_quiet(Duration::from_millis(200)).await;
    assert!(node.session.in_progress().is_empty());

    node.session.close().await;
}

/// A write error aborts the transfer with TransmitFailed.
#[tokio::test]
async fn test_write_failure_is_transmit_failed() {
    let node = Node::new(test_config("local", temp_dir("fail-write")));
    node.session.open(DeadRadio).await.unwrap();

    match node.session.send_text("anyone there?").await {
        Err(LinkError::TransmitFailed { sent, total, .. }) => {
            assert_eq!(sent, 0);
            assert_eq!(total, 1);
        }
        other => panic!("expected TransmitFailed, got {other:?}"),
    }
    // the session survives a failed send
    assert!(node.session.is_open().await);

    node.session.close().await;
}

/// Losing the far end closes the session and reports it once.
#[tokio::test]
async fn test_disconnect_closes_session() {
    let (mut node, peer) = raw_peer("fail-disconnect", |_| {}).await;
    drop(peer);

    assert!(matches!(
        node.next_event().await,
        SessionEvent::ChannelClosed { .. }
    ));
    tokio::time::timeout(WAIT, async {
        while node.session.is_open().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session did not close");

    assert!(matches!(
        node.session.send_text("x").await,
        Err(LinkError::NotOpen)
    ));
    node.expect_quiet(Duration::from_millis(100)).await;
}
