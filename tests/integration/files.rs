use crate::*;

use loralink_core::FileKind;
use loralink_services::transfer::fragment_records;

fn write_source(name: &str, content: &[u8]) -> PathBuf {
    let dir = temp_dir(&format!("{name}-src"));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("payload.bin");
    std::fs::write(&path, content).unwrap();
    path
}

/// A binary file sent by one session is stored byte-identical by the other.
#[tokio::test]
async fn test_file_transfer_end_to_end() {
    let (a, mut b) = linked_pair("file-e2e", |c| c.transfer.max_chunk_chars = 64).await;
    let content: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
    let source = write_source("file-e2e", &content);

    let report = a.session.send_file(&source).await.unwrap();
    assert_eq!(report.bytes, content.len());
    assert!(report.records > 1);

    let SessionEvent::FileReceived(saved) = b.next_event().await else {
        panic!("expected a file");
    };
    assert_eq!(saved.origin, "alpha");
    assert_eq!(saved.sequence, report.sequence);
    assert_eq!(saved.bytes, content.len());
    assert_eq!(std::fs::read(&saved.path).unwrap(), content);
    assert_eq!(b.saved_files(), vec![saved.path.clone()]);

    a.session.close().await;
    b.session.close().await;
}

/// 100 000 bytes at 40 000 characters per fragment is four fragments;
/// delivered in reverse order they still produce exactly one file.
#[tokio::test]
async fn test_hundred_kilobytes_in_reverse_order() {
    let (mut node, mut peer) = raw_peer("file-reverse", |_| {}).await;
    let mut content = vec![0u8; 100_000];
    content[..8].copy_from_slice(b"\x89PNG\r\n\x1a\n");
    for (i, b) in content.iter_mut().enumerate().skip(8) {
        *b = (i % 256) as u8;
    }

    let mut records = fragment_records(&content, "remote", 77, 40_000).unwrap();
    assert_eq!(records.len(), 4);
    records.reverse();
    peer.send_records(&records).await;

    let SessionEvent::FileReceived(saved) = node.next_event().await else {
        panic!("expected a file");
    };
    assert_eq!(saved.kind, FileKind::Png);
    assert_eq!(saved.sequence, 77);
    assert!(saved.path.extension().is_some_and(|e| e == "png"));
    assert_eq!(std::fs::read(&saved.path).unwrap(), content);

    node.expect_quiet(Duration::from_millis(200)).await;
    assert_eq!(node.saved_files().len(), 1);
    node.session.close().await;
}

/// Every fragment delivered twice, interleaved, still yields one file.
#[tokio::test]
async fn test_duplicate_fragments_yield_one_file() {
    let (mut node, mut peer) = raw_peer("file-dupes", |_| {}).await;
    let content = vec![0xA5u8; 3000];
    let records = fragment_records(&content, "remote", 5, 100).unwrap();

    let doubled: Vec<Record> = records
        .iter()
        .flat_map(|r| [r.clone(), r.clone()])
        .collect();
    peer.send_records(&doubled).await;
    // a late redelivery of the whole set after completion
    peer.send_records(&records).await;

    let SessionEvent::FileReceived(saved) = node.next_event().await else {
        panic!("expected a file");
    };
    assert_eq!(std::fs::read(&saved.path).unwrap(), content);

    node.expect_quiet(Duration::from_millis(300)).await;
    assert_eq!(node.saved_files().len(), 1);
    assert!(node.session.in_progress().is_empty());
    node.session.close().await;
}

/// With name embedding on, the receiver keeps the sender's file name.
#[tokio::test]
async fn test_embedded_file_name_is_kept() {
    let (a, mut b) = linked_pair("file-named", |c| c.transfer.embed_file_name = true).await;
    let source = write_source("file-named", b"%PDF-1.4 tiny document");

    a.session.send_file(&source).await.unwrap();

    let SessionEvent::FileReceived(saved) = b.next_event().await else {
        panic!("expected a file");
    };
    assert_eq!(saved.path, b.out_dir.join("payload.bin"));
    assert_eq!(saved.kind, FileKind::Pdf);
    assert_eq!(std::fs::read(&saved.path).unwrap(), b"%PDF-1.4 tiny document");

    a.session.close().await;
    b.session.close().await;
}

/// An empty file is still a file, not a blank message.
#[tokio::test]
async fn test_empty_file_is_transferable() {
    let (a, mut b) = linked_pair("file-empty", |_| {}).await;
    let source = write_source("file-empty", b"");

    let report = a.session.send_file(&source).await.unwrap();
    assert_eq!(report.records, 1);

    let SessionEvent::FileReceived(saved) = b.next_event().await else {
        panic!("expected a file");
    };
    assert_eq!(saved.bytes, 0);
    assert!(std::fs::read(&saved.path).unwrap().is_empty());

    a.session.close().await;
    b.session.close().await;
}

/// A missing source file fails with ReadFailed and sends nothing.
#[tokio::test]
async fn test_missing_source_file_is_read_failed() {
    let (node, mut peer) = raw_peer("file-missing", |_| {}).await;

    let err = node
        .session
        .send_file("/nonexistent/loralink/input.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, loralink_core::LinkError::ReadFailed(..)));
    assert!(peer.capture(Duration::from_millis(100)).await.is_empty());

    node.session.close().await;
}
