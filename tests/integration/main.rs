//! LoRaLink integration test harness.
//!
//! Sessions are wired to each other, or to a raw byte stream the test drives
//! directly, through in-memory pipes. Nothing here needs a modem.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;

use loralink_core::{LinkConfig, Record};
use loralink_services::{
    LineReader, MessageInbox, PayloadDispatcher, ReadOutcome, Session, SessionEvent,
};

mod failures;
mod files;
mod messaging;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

const PIPE_CAPACITY: usize = 256 * 1024;

/// A fresh, empty directory unique to this process and test.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("loralink-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Fast settings: no pacing between records, short read timeout, frequent sweeps.
pub fn test_config(origin: &str, out_dir: PathBuf) -> LinkConfig {
    let mut config = LinkConfig::default();
    config.transfer.origin = origin.into();
    config.transfer.inter_record_delay_ms = 0;
    config.serial.read_timeout_ms = 20;
    config.reassembly.sweep_interval_ms = 10;
    config.output.dir = out_dir;
    config
}

pub struct Node {
    pub session: Session,
    pub inbox: MessageInbox,
    pub events: broadcast::Receiver<SessionEvent>,
    pub out_dir: PathBuf,
}

impl Node {
    pub fn new(config: LinkConfig) -> Self {
        let inbox = MessageInbox::new();
        let out_dir = config.output.dir.clone();
        let dispatcher =
            PayloadDispatcher::new(out_dir.clone()).with_sink(std::sync::Arc::new(inbox.clone()));
        let session = Session::new(config, dispatcher).expect("test config is valid");
        let events = session.subscribe();
        Self {
            session,
            inbox,
            events,
            out_dir,
        }
    }

    /// Next event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event channel closed")
    }

    /// Assert that no event arrives within `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        if let Ok(event) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("unexpected event: {event:?}");
        }
    }

    /// Files currently in the output directory.
    pub fn saved_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.out_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        files.sort();
        files
    }
}

/// Two open sessions talking to each other.
pub async fn linked_pair(name: &str, tweak: impl Fn(&mut LinkConfig)) -> (Node, Node) {
    let mut config_a = test_config("alpha", temp_dir(&format!("{name}-a")));
    let mut config_b = test_config("bravo", temp_dir(&format!("{name}-b")));
    tweak(&mut config_a);
    tweak(&mut config_b);

    let (wire_a, wire_b) = tokio::io::duplex(PIPE_CAPACITY);
    let a = Node::new(config_a);
    let b = Node::new(config_b);
    a.session.open(wire_a).await.expect("open a");
    b.session.open(wire_b).await.expect("open b");
    (a, b)
}

/// One open session plus the raw far end of its channel.
pub async fn raw_peer(name: &str, tweak: impl Fn(&mut LinkConfig)) -> (Node, RawPeer) {
    let mut config = test_config("local", temp_dir(name));
    tweak(&mut config);
    let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
    let node = Node::new(config);
    node.session.open(ours).await.expect("open");
    (node, RawPeer { stream: theirs })
}

/// The modem side of a session's channel, driven line by line.
pub struct RawPeer {
    pub stream: DuplexStream,
}

impl RawPeer {
    pub async fn send_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.stream
                .write_all(format!("{}\n", line.as_ref()).as_bytes())
                .await
                .expect("write to session");
        }
    }

    pub async fn send_records(&mut self, records: &[Record]) {
        self.send_lines(records.iter().map(|r| r.to_string())).await;
    }

    /// Read whatever the session writes until it stays quiet for `idle`.
    pub async fn capture(&mut self, idle: Duration) -> Vec<Record> {
        let mut reader = LineReader::new(&mut self.stream, PIPE_CAPACITY);
        let mut out = Vec::new();
        while let ReadOutcome::Line(line) = reader.read_line(idle).await.expect("read from session") {
            out.push(Record::parse(&line).expect("session wrote a malformed line"));
        }
        out
    }
}
