//! Session — owns the line channel while open.
//!
//! One receive worker is the only reader of the channel and the only owner
//! of the reassembly engine. Sends share the write half behind an async
//! mutex held for a whole transfer, so the records of two transfers never
//! interleave on the wire. Reads and writes proceed concurrently.
//!
//! `close()` signals a shutdown broadcast. The worker stops at once and an
//! in-flight send aborts between records with `TransmitFailed`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use loralink_core::classify::embed_file_name;
use loralink_core::{codec, LinkConfig, LinkError, Record};

use crate::channel::{LineReader, LineWriter, ReadOutcome};
use crate::dispatch::{Dispatched, PayloadDispatcher};
use crate::event::SessionEvent;
use crate::reassembly::{Ingest, ReassemblySettings, Reassembler, TransferProgress};
use crate::transfer::{self, SequenceCounter, TransferReport, TransferSettings};

const EVENT_CAPACITY: usize = 256;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State that exists only while the session is open.
struct Running {
    generation: u64,
    writer: Arc<Mutex<LineWriter<BoxWriter>>>,
    shutdown: broadcast::Sender<()>,
    worker: JoinHandle<()>,
}

pub struct Session {
    config: LinkConfig,
    settings: TransferSettings,
    dispatcher: PayloadDispatcher,
    sequences: SequenceCounter,
    events: broadcast::Sender<SessionEvent>,
    progress: Arc<watch::Sender<Vec<TransferProgress>>>,
    state: Arc<Mutex<Option<Running>>>,
    generations: AtomicU64,
}

impl Session {
    pub fn new(config: LinkConfig, dispatcher: PayloadDispatcher) -> Result<Self, LinkError> {
        config.validate()?;
        let sequences = match config.transfer.initial_sequence {
            Some(start) => SequenceCounter::new(start),
            None => SequenceCounter::random(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (progress, _) = watch::channel(Vec::new());

        Ok(Self {
            settings: TransferSettings::from(&config.transfer),
            config,
            dispatcher,
            sequences,
            events,
            progress: Arc::new(progress),
            state: Arc::new(Mutex::new(None)),
            generations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Take ownership of `transport` and start receiving.
    pub async fn open<T>(&self, transport: T) -> Result<(), LinkError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(LinkError::AlreadyOpen);
        }

        let (read_half, write_half) = tokio::io::split(transport);
        let writer: BoxWriter = Box::new(write_half);
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let worker = ReceiveWorker {
            reader: LineReader::new(read_half, self.config.serial.max_line_bytes),
            engine: Reassembler::new(ReassemblySettings::from(&self.config.reassembly)),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            progress: self.progress.clone(),
            read_timeout: self.config.serial.read_timeout(),
            sweep_interval: self.config.reassembly.sweep_interval(),
            shutdown: shutdown_rx,
        };
        let worker = tokio::spawn(run_worker(
            worker,
            Arc::downgrade(&self.state),
            generation,
            self.events.clone(),
        ));

        *state = Some(Running {
            generation,
            writer: Arc::new(Mutex::new(LineWriter::new(writer))),
            shutdown,
            worker,
        });
        tracing::info!(
            origin = %self.settings.origin,
            generation,
            "session opened"
        );
        Ok(())
    }

    /// Stop the receive worker and release the channel. Partial transfers are
    /// discarded. Does nothing when already closed.
    pub async fn close(&self) {
        let running = self.state.lock().await.take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.worker.await {
            tracing::warn!(error = %e, "receive worker ended abnormally");
        }
        self.progress.send_replace(Vec::new());
        tracing::info!(generation = running.generation, "session closed");
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Transfers currently being collected, as of the worker's last iteration.
    pub fn in_progress(&self) -> Vec<TransferProgress> {
        self.progress.borrow().clone()
    }

    /// Send a text message. Returns once every record is written.
    pub async fn send_text(&self, text: &str) -> Result<TransferReport, LinkError> {
        let expected = if transfer::fits_single_record(text, self.settings.max_message_bytes) {
            1
        } else {
            codec::chunk_count(text.len(), self.settings.max_chunk_chars)
        };
        let (writer, mut shutdown) = self.handle().await?;
        let mut writer = writer.lock().await;
        let before = writer.lines_written();

        let result = tokio::select! {
            biased;
            _ = shutdown.recv() => None,
            r = transfer::send_text(text, &mut *writer, &self.sequences, &self.settings) => Some(r),
        };
        result.unwrap_or_else(|| Err(aborted(writer.lines_written() - before, expected)))
    }

    /// Send the contents of a file. Returns once every record is written.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<TransferReport, LinkError> {
        let path = path.as_ref();
        let (writer, mut shutdown) = self.handle().await?;

        let content = tokio::fs::read(path)
            .await
            .map_err(|e| LinkError::ReadFailed(path.to_path_buf(), e))?;
        let payload = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if self.config.transfer.embed_file_name => embed_file_name(name, &content),
            _ => content,
        };
        let expected = codec::chunk_count(payload.len(), self.settings.max_chunk_chars);

        let mut writer = writer.lock().await;
        let before = writer.lines_written();
        let sequence = self.sequences.next();
        tracing::info!(path = %path.display(), sequence, bytes = payload.len(), "sending file");

        let result = tokio::select! {
            biased;
            _ = shutdown.recv() => None,
            r = transfer::send_bytes(
                &payload,
                &mut *writer,
                &self.settings.origin,
                sequence,
                self.settings.max_chunk_chars,
                self.settings.inter_record_delay,
            ) => Some(r),
        };
        result.unwrap_or_else(|| Err(aborted(writer.lines_written() - before, expected)))
    }

    /// Writer plus a shutdown subscription taken under the same lock, so a
    /// close that races the send is always observed.
    async fn handle(
        &self,
    ) -> Result<(Arc<Mutex<LineWriter<BoxWriter>>>, broadcast::Receiver<()>), LinkError> {
        let state = self.state.lock().await;
        let running = state.as_ref().ok_or(LinkError::NotOpen)?;
        Ok((running.writer.clone(), running.shutdown.subscribe()))
    }
}

fn aborted(sent: u64, total: usize) -> LinkError {
    tracing::warn!(sent, total, "transfer aborted: session closed");
    LinkError::TransmitFailed {
        sent: sent as usize,
        total,
        reason: "session closed".into(),
    }
}

async fn run_worker<R>(
    worker: ReceiveWorker<R>,
    state: Weak<Mutex<Option<Running>>>,
    generation: u64,
    events: broadcast::Sender<SessionEvent>,
) where
    R: AsyncRead + Unpin,
{
    let progress = worker.progress.clone();
    let lost = worker.run().await;
    progress.send_replace(Vec::new());

    let Some(reason) = lost else {
        return;
    };
    tracing::error!(%reason, generation, "channel lost, closing session");
    let _ = events.send(SessionEvent::ChannelClosed { reason });

    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock().await;
    if state.as_ref().is_some_and(|r| r.generation == generation) {
        if let Some(running) = state.take() {
            // wake any send still holding the writer
            let _ = running.shutdown.send(());
        }
    }
}

struct ReceiveWorker<R> {
    reader: LineReader<R>,
    engine: Reassembler,
    dispatcher: PayloadDispatcher,
    events: broadcast::Sender<SessionEvent>,
    progress: Arc<watch::Sender<Vec<TransferProgress>>>,
    read_timeout: Duration,
    sweep_interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl<R: AsyncRead + Unpin> ReceiveWorker<R> {
    /// Runs until shutdown (returns `None`) or until the channel ends
    /// (returns the reason).
    async fn run(mut self) -> Option<String> {
        let mut last_sweep = Instant::now();

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(pending = self.engine.len(), "receive worker shutting down");
                    self.engine.clear();
                    return None;
                }
                r = self.reader.read_line(self.read_timeout) => r,
            };

            match outcome {
                Ok(ReadOutcome::Line(line)) => self.handle_line(&line).await,
                Ok(ReadOutcome::Timeout) => {}
                Ok(ReadOutcome::Closed) => return Some("transport closed".into()),
                Err(e) => return Some(e.to_string()),
            }

            let now = Instant::now();
            let mut expired = Vec::new();
            if now.saturating_duration_since(last_sweep) >= self.sweep_interval {
                expired = self.engine.sweep(now);
                last_sweep = now;
            }
            // snapshot first, so a subscriber reacting to an event sees it
            self.progress.send_replace(self.engine.in_progress(now));
            for e in expired {
                let _ = self.events.send(SessionEvent::from(e));
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        tracing::trace!(line, "line received");
        let Some(record) = Record::parse(line) else {
            tracing::trace!(line, "dropped malformed line");
            return;
        };

        match record {
            Record::Message(message) => {
                let received = self.dispatcher.dispatch_message(message);
                let _ = self.events.send(SessionEvent::MessageReceived(received));
            }
            Record::Fragment(fragment) => {
                let now = Instant::now();
                let outcome = self.engine.ingest(fragment, now);
                self.progress.send_replace(self.engine.in_progress(now));
                self.handle_ingest(outcome).await;
            }
        }
    }

    async fn handle_ingest(&mut self, outcome: Ingest) {
        match outcome {
            Ingest::Complete(done) => {
                let (origin, sequence) = (done.key.origin.clone(), done.key.sequence);
                let event = match self.dispatcher.dispatch_completed(done).await {
                    Ok(Dispatched::Message(m)) => SessionEvent::MessageReceived(m),
                    Ok(Dispatched::File(f)) => SessionEvent::FileReceived(f),
                    Err(e) => {
                        tracing::warn!(%origin, sequence, error = %e, "dispatch failed");
                        SessionEvent::DispatchFailed {
                            origin,
                            sequence,
                            error: e.to_string(),
                        }
                    }
                };
                let _ = self.events.send(event);
            }
            Ingest::Corrupt { key, error } => {
                let _ = self.events.send(SessionEvent::DecodeFailed {
                    origin: key.origin,
                    sequence: key.sequence,
                    error: error.to_string(),
                });
            }
            Ingest::Pending { .. } | Ingest::Dropped(_) => {}
        }
    }
}
