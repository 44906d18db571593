//! The bounded single-producer/single-consumer byte queue.

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use super::{ByteSupplier, SourceError};
use crate::{
    events::{Event, Reporter},
    observability::log_warn,
};

type Item = Result<(u64, Bytes), SourceError>;

/// Sizing knobs for one streaming queue.
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Bytes per fetched chunk.
    pub chunk_len: usize,
    /// Queue capacity in chunks.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chunk_len: 64 * 1024,
            capacity: 16,
        }
    }
}

/// Counters shared between the producer task and the consumer.
#[derive(Debug, Default)]
struct Shared {
    /// Absolute position the producer must not fetch below; raised by skips.
    skip_to: AtomicU64,
    /// Bytes currently sitting in the queue.
    buffered: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

/// Handle for opening bounded byte streams.
///
/// `open` spawns the producer task; the returned [`StreamingReader`] is the
/// single consumer. Dropping the reader releases the producer.
pub struct StreamingQueue;

impl StreamingQueue {
    /// Stream the byte window `range` of `supplier` through a bounded queue.
    pub fn open(
        supplier: Arc<dyn ByteSupplier>,
        range: Range<u64>,
        config: QueueConfig,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> StreamingReader {
        let (tx, rx) = flume::bounded::<Item>(config.capacity);
        let shared = Arc::new(Shared {
            skip_to: AtomicU64::new(range.start),
            ..Shared::default()
        });

        tokio::spawn(pump(
            supplier,
            range.clone(),
            config.chunk_len,
            tx,
            Arc::clone(&shared),
            Arc::clone(&reporter),
            cancel,
        ));

        StreamingReader {
            rx,
            shared,
            reporter,
            current: Bytes::new(),
            abs_pos: range.start,
            range,
            opened_at: Instant::now(),
            blocked_nanos: 0,
            done: false,
            error: None,
        }
    }
}

async fn pump(
    supplier: Arc<dyn ByteSupplier>,
    range: Range<u64>,
    chunk_len: usize,
    tx: flume::Sender<Item>,
    shared: Arc<Shared>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) {
    let mut pos = range.start;
    loop {
        let target = shared.skip_to.load(Ordering::Acquire);
        if target > pos {
            pos = target;
        }
        if pos >= range.end {
            break;
        }
        let want = chunk_len.min((range.end - pos) as usize);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            fetched = supplier.fetch(pos, want) => fetched,
        };
        match fetched {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(bytes) => {
                let len = bytes.len();
                shared.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
                shared.buffered.fetch_add(len as u64, Ordering::Relaxed);
                reporter.report(Event::QueueBytesWritten { len });
                if tx.is_full() {
                    reporter.report(Event::QueueFull);
                }
                let item = Ok((pos, bytes));
                pos += len as u64;
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send_async(item) => sent,
                };
                if sent.is_err() {
                    // Consumer dropped the reader; nothing left to feed.
                    return;
                }
            }
            Err(err) => {
                reporter.report(Event::StreamFailed);
                log_warn!(
                    component = "streaming",
                    event = "stream_failed",
                    offset = pos,
                    error = %err,
                );
                let _ = tx.send_async(Err(err)).await;
                return;
            }
        }
    }
}

/// Consumer side of a [`StreamingQueue`]: sequential reads, skips, and the
/// blocked-time bookkeeping that tells an I/O-bound job apart from a
/// CPU-bound one.
pub struct StreamingReader {
    rx: flume::Receiver<Item>,
    shared: Arc<Shared>,
    reporter: Arc<dyn Reporter>,
    current: Bytes,
    abs_pos: u64,
    range: Range<u64>,
    opened_at: Instant,
    blocked_nanos: u64,
    done: bool,
    error: Option<SourceError>,
}

impl StreamingReader {
    /// Absolute position of the next byte the consumer will see.
    pub fn position(&self) -> u64 {
        self.abs_pos
    }

    /// Total bytes handed to the consumer so far.
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes the producer fetched from the supplier so far.
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Relaxed)
    }

    /// Cumulative time spent waiting for the producer, nanoseconds.
    pub fn blocked_nanos(&self) -> u64 {
        self.blocked_nanos
    }

    /// Read exactly `n` bytes, failing with `UnexpectedEof` if the stream
    /// ends first.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, SourceError> {
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            if self.current.is_empty() && !self.next_chunk().await? {
                return Err(SourceError::UnexpectedEof {
                    offset: self.abs_pos,
                });
            }
            let take = (n - out.len()).min(self.current.len());
            out.extend_from_slice(&self.current.split_to(take));
            self.note_read(take);
        }
        Ok(out.freeze())
    }

    /// Read until end-of-stream.
    pub async fn read_to_end(&mut self) -> Result<Bytes, SourceError> {
        let mut out = BytesMut::new();
        loop {
            if self.current.is_empty() && !self.next_chunk().await? {
                return Ok(out.freeze());
            }
            let take = self.current.len();
            out.extend_from_slice(&self.current.split_to(take));
            self.note_read(take);
        }
    }

    /// Whether any bytes remain; blocks until the producer supplies a chunk
    /// or signals end-of-stream.
    pub async fn has_remaining(&mut self) -> Result<bool, SourceError> {
        if !self.current.is_empty() {
            return Ok(true);
        }
        self.next_chunk().await
    }

    /// Skip `n` bytes. Already-buffered bytes are discarded in memory; the
    /// remainder advances the producer's read position so the skipped bytes
    /// are never transferred.
    pub async fn skip(&mut self, n: u64) -> Result<(), SourceError> {
        let mut buffered = 0u64;
        let mut remaining = n;

        let from_current = remaining.min(self.current.len() as u64);
        if from_current > 0 {
            let _ = self.current.split_to(from_current as usize);
            self.abs_pos += from_current;
            buffered += from_current;
            remaining -= from_current;
        }

        while remaining > 0 {
            match self.rx.try_recv() {
                Ok(Ok((offset, bytes))) => {
                    self.shared
                        .buffered
                        .fetch_sub(bytes.len() as u64, Ordering::Relaxed);
                    let Some(mut bytes) = self.align_chunk(offset, bytes)? else {
                        continue;
                    };
                    let take = remaining.min(bytes.len() as u64);
                    let _ = bytes.split_to(take as usize);
                    self.abs_pos += take;
                    buffered += take;
                    remaining -= take;
                    if !bytes.is_empty() {
                        self.current = bytes;
                        break;
                    }
                }
                Ok(Err(err)) => {
                    self.done = true;
                    self.error = Some(err.clone());
                    return Err(err);
                }
                Err(_) => break,
            }
        }

        let ranged = remaining;
        if ranged > 0 {
            self.abs_pos += ranged;
            self.shared.skip_to.fetch_max(self.abs_pos, Ordering::Release);
        }
        self.reporter
            .report(Event::QueueBytesSkipped { buffered, ranged });
        Ok(())
    }

    /// Close the stream and report its lifetime counters.
    pub fn finish(self) {
        self.reporter.report(Event::StreamEnded {
            run_nanos: self.opened_at.elapsed().as_nanos() as u64,
            blocked_nanos: self.blocked_nanos,
        });
    }

    fn note_read(&mut self, len: usize) {
        self.shared.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
        self.abs_pos += len as u64;
        let fill = self.shared.buffered.load(Ordering::Relaxed) as usize + self.current.len();
        self.reporter.report(Event::QueueBytesRead {
            len,
            fill,
            percent_complete: self.percent_complete(),
        });
    }

    fn percent_complete(&self) -> u8 {
        let total = self.range.end.saturating_sub(self.range.start);
        if total == 0 {
            return 100;
        }
        let consumed = self.abs_pos.saturating_sub(self.range.start).min(total);
        ((consumed * 100) / total) as u8
    }

    /// Drop the part of an in-flight chunk that a racing skip already passed.
    fn align_chunk(&mut self, offset: u64, mut bytes: Bytes) -> Result<Option<Bytes>, SourceError> {
        if offset > self.abs_pos {
            self.done = true;
            let err = SourceError::Supplier(format!(
                "noncontiguous chunk at offset {offset}, expected {}",
                self.abs_pos
            ));
            self.error = Some(err.clone());
            return Err(err);
        }
        if offset < self.abs_pos {
            let overlap = ((self.abs_pos - offset) as usize).min(bytes.len());
            let _ = bytes.split_to(overlap);
            if bytes.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(bytes))
    }

    async fn next_chunk(&mut self) -> Result<bool, SourceError> {
        loop {
            if self.done {
                return match &self.error {
                    Some(err) => Err(err.clone()),
                    None => Ok(false),
                };
            }
            let item = match self.rx.try_recv() {
                Ok(item) => item,
                Err(flume::TryRecvError::Empty) => {
                    let waited = Instant::now();
                    match self.rx.recv_async().await {
                        Ok(item) => {
                            let nanos = waited.elapsed().as_nanos() as u64;
                            self.blocked_nanos += nanos;
                            self.reporter.report(Event::QueueBlocked { nanos });
                            item
                        }
                        Err(_) => {
                            self.done = true;
                            return Ok(false);
                        }
                    }
                }
                Err(flume::TryRecvError::Disconnected) => {
                    self.done = true;
                    return Ok(false);
                }
            };
            match item {
                Ok((offset, bytes)) => {
                    self.shared
                        .buffered
                        .fetch_sub(bytes.len() as u64, Ordering::Relaxed);
                    if let Some(bytes) = self.align_chunk(offset, bytes)? {
                        self.current = bytes;
                        return Ok(true);
                    }
                }
                Err(err) => {
                    self.done = true;
                    self.error = Some(err.clone());
                    return Err(err);
                }
            }
        }
    }
}
