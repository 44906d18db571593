//! K-way merge of per-fragment partition streams into one ordered scan.
//!
//! Every selected fragment across every selected replica contributes one
//! stream; the scanner interleaves them in `(token, key)` order and emits
//! each logical partition once. When replicas disagree on a partition's
//! bytes, the copy from a repaired fragment outranks an unrepaired one, and
//! a primary replica outranks a backup.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use async_stream::stream;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::{
    events::{Event, Reporter},
    observability::log_debug,
    sstable::{Partition, TableError},
    token::Token,
};

/// One constituent partition stream.
pub type PartitionStream = Pin<Box<dyn Stream<Item = Result<Partition, TableError>> + Send>>;

struct HeapEntry {
    partition: Partition,
    priority: u8,
    idx: usize,
}

impl HeapEntry {
    fn new(partition: Partition, idx: usize) -> Self {
        let priority = u8::from(partition.repaired) * 2 + u8::from(partition.primary);
        Self {
            partition,
            priority,
            idx,
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert token and key so the smallest
        // partition surfaces first. Among copies of the same partition the
        // higher-priority copy pops first and the rest dedupe away.
        other
            .partition
            .token
            .cmp(&self.partition.token)
            .then_with(|| other.partition.key.cmp(&self.partition.key))
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Ordered, deduplicated merge over all selected fragments.
pub struct CompactionScanner {
    streams: Vec<Option<PartitionStream>>,
    heap: BinaryHeap<HeapEntry>,
    pending_errors: VecDeque<TableError>,
    last: Option<(Token, Bytes)>,
    duplicates: u64,
}

impl std::fmt::Debug for CompactionScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionScanner")
            .field("streams", &self.streams.len())
            .field("heap", &self.heap.len())
            .field("pending_errors", &self.pending_errors)
            .field("last", &self.last)
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

impl CompactionScanner {
    /// Seed the heap with the head of every stream.
    pub async fn from_streams(
        streams: Vec<PartitionStream>,
        reporter: &Arc<dyn Reporter>,
    ) -> Self {
        let started = Instant::now();
        let mut scanner = Self {
            streams: streams.into_iter().map(Some).collect(),
            heap: BinaryHeap::new(),
            pending_errors: VecDeque::new(),
            last: None,
            duplicates: 0,
        };
        for idx in 0..scanner.streams.len() {
            scanner.refill(idx).await;
        }
        reporter.report(Event::ScannerOpened {
            nanos: started.elapsed().as_nanos() as u64,
        });
        scanner
    }

    /// Logical partitions that arrived from more than one fragment so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Next merged partition, or an error from one constituent stream.
    ///
    /// An error retires its stream; the merge continues over the rest, so a
    /// caller that tolerates corrupt fragments can keep polling.
    pub async fn next(&mut self) -> Option<Result<Partition, TableError>> {
        loop {
            if let Some(err) = self.pending_errors.pop_front() {
                return Some(Err(err));
            }
            let entry = self.heap.pop()?;
            self.refill(entry.idx).await;

            let id = (entry.partition.token, entry.partition.key.clone());
            if self.last.as_ref() == Some(&id) {
                self.duplicates += 1;
                log_debug!(
                    component = "merge",
                    event = "duplicate_partition",
                    token = %id.0,
                );
                continue;
            }
            self.last = Some(id);
            return Some(Ok(entry.partition));
        }
    }

    /// Consume the scanner as a [`Stream`].
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Partition, TableError>> + Send {
        stream! {
            while let Some(item) = self.next().await {
                yield item;
            }
        }
    }

    async fn refill(&mut self, idx: usize) {
        let Some(stream) = self.streams[idx].as_mut() else {
            return;
        };
        match stream.next().await {
            Some(Ok(partition)) => self.heap.push(HeapEntry::new(partition, idx)),
            Some(Err(err)) => {
                // Retire the stream; its error surfaces once.
                self.streams[idx] = None;
                self.pending_errors.push_back(err);
            }
            None => self.streams[idx] = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use futures_util::stream;

    use super::{CompactionScanner, PartitionStream};
    use crate::{
        events::Reporter,
        sstable::{Partition, TableError},
        streaming::SourceError,
        test_util::CollectingReporter,
    };

    fn partition(key: &[u8], token: i128, payload: &[u8], repaired: bool, primary: bool) -> Partition {
        Partition {
            key: Bytes::copy_from_slice(key),
            token,
            payload: Bytes::copy_from_slice(payload),
            repaired,
            primary,
        }
    }

    fn stream_of(partitions: Vec<Partition>) -> PartitionStream {
        Box::pin(stream::iter(partitions.into_iter().map(Ok)))
    }

    fn reporter() -> Arc<dyn Reporter> {
        Arc::new(CollectingReporter::default())
    }

    #[tokio::test]
    async fn interleaves_streams_in_token_order() {
        let a = stream_of(vec![
            partition(b"a", 10, b"pa", false, true),
            partition(b"c", 30, b"pc", false, true),
        ]);
        let b = stream_of(vec![partition(b"b", 20, b"pb", false, true)]);
        let mut scanner = CompactionScanner::from_streams(vec![a, b], &reporter()).await;

        let mut tokens = Vec::new();
        while let Some(item) = scanner.next().await {
            tokens.push(item.unwrap().token);
        }
        assert_eq!(tokens, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn duplicate_partitions_emit_once_and_repaired_wins() {
        let unrepaired = stream_of(vec![partition(b"k", 5, b"stale", false, true)]);
        let repaired = stream_of(vec![partition(b"k", 5, b"fresh", true, true)]);
        let mut scanner =
            CompactionScanner::from_streams(vec![unrepaired, repaired], &reporter()).await;

        let first = scanner.next().await.unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"fresh");
        assert!(scanner.next().await.is_none());
        assert_eq!(scanner.duplicates(), 1);
    }

    #[tokio::test]
    async fn primary_copy_outranks_backup() {
        let backup = stream_of(vec![partition(b"k", 5, b"backup", false, false)]);
        let primary = stream_of(vec![partition(b"k", 5, b"primary", false, true)]);
        let mut scanner =
            CompactionScanner::from_streams(vec![backup, primary], &reporter()).await;

        let first = scanner.next().await.unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"primary");
        assert!(scanner.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_stream_surfaces_once_and_merge_continues() {
        let healthy = stream_of(vec![
            partition(b"a", 1, b"pa", false, true),
            partition(b"b", 2, b"pb", false, true),
        ]);
        let failing: PartitionStream = Box::pin(stream::iter(vec![Err(TableError::Source(
            SourceError::Supplier("replica went away".into()),
        ))]));
        let mut scanner =
            CompactionScanner::from_streams(vec![healthy, failing], &reporter()).await;

        let mut ok = 0;
        let mut errs = 0;
        while let Some(item) = scanner.next().await {
            match item {
                Ok(_) => ok += 1,
                Err(_) => errs += 1,
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(errs, 1);
    }
}
