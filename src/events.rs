//! Closed telemetry event taxonomy and the reporter seam.
//!
//! Every meaningful decision the reader makes — replica selection outcome,
//! each distinct skip reason, corruption, queue pressure, mutation drops,
//! watermark advances — is emitted as one tagged [`Event`] variant through an
//! injected [`Reporter`]. Reporting is fire-and-forget: the core never blocks
//! or fails because a sink is slow or absent, and [`NoopReporter`] is always a
//! valid implementation.

use std::sync::Arc;

use crate::{
    mutation::TableId,
    token::{Token, TokenRange},
};

/// Why a whole fragment was skipped without opening its data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SstableSkipReason {
    /// The fragment's token span does not intersect the active filters.
    RangeMismatch,
    /// The fragment is fully repaired and this replica is not the repair
    /// authority for the range.
    Repaired,
    /// Every requested partition key is absent from the fragment's bloom
    /// filter.
    MissingInFilter,
    /// Requested partition keys passed the bloom filter but none appear in
    /// the index.
    MissingInIndex,
}

/// Why a single partition inside an opened fragment was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionSkipReason {
    /// The bloom filter ruled the key out before the index was consulted.
    MissingInFilter,
    /// The key was not present in the index file.
    MissingInIndex,
    /// The partition's token falls outside the active filters.
    OutOfRange,
}

/// Why a decoded (or undecodable) mutation was dropped rather than published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationDropReason {
    /// The per-mutation checksum did not match the payload.
    ChecksumMismatch,
    /// The length prefix was zero or implausibly large.
    InvalidSize,
    /// The versioned codec could not decode the payload.
    DecodeFailed,
    /// The mutation targets a table the job is not tracking.
    UntrackedTable,
    /// The mutation's token falls outside the job's assigned range.
    OutOfTokenRange,
    /// The mutation's timestamp is at or below the table's watermark floor.
    Stale,
}

/// One telemetry event. Variants mirror the orchestration contract exactly;
/// consumers match on what they care about and ignore the rest.
#[derive(Clone, Debug)]
pub enum Event {
    /// A replica set satisfying the consistency level was chosen.
    ReplicaSetSelected {
        /// Token range the selection covers.
        range: TokenRange,
        /// Number of primary replicas selected.
        primaries: usize,
        /// Number of backup replicas selected.
        backups: usize,
        /// Time spent selecting, nanoseconds.
        nanos: u64,
    },
    /// Too few replicas responded to satisfy the consistency level.
    ReplicaSelectionFailed {
        /// Uncovered token range.
        range: TokenRange,
        /// Replicas that were available.
        available: usize,
        /// Replicas the level requires.
        required: usize,
    },
    /// Opening a replica's fragments failed; a backup will be tried.
    ReplicaOpenFailed {
        /// Host identity of the failed replica.
        host: String,
    },
    /// A replica's snapshot of fragments was listed.
    SnapshotListed {
        /// Host identity of the replica.
        host: String,
        /// Time spent listing, nanoseconds.
        nanos: u64,
    },
    /// A fragment was opened for reading.
    SstableOpened {
        /// Time to open, nanoseconds.
        nanos: u64,
    },
    /// A whole fragment was skipped before any data-file byte was read.
    SstableSkipped {
        /// Why it was skipped.
        reason: SstableSkipReason,
        /// Fragment's first token.
        first: Token,
        /// Fragment's last token.
        last: Token,
    },
    /// A fragment could not be decoded.
    SstableCorrupt {
        /// Keyspace owning the fragment.
        keyspace: String,
        /// Table owning the fragment.
        table: String,
        /// Component file that failed to decode.
        file: String,
    },
    /// A fragment's streams were closed.
    SstableClosed {
        /// Time the fragment was open, nanoseconds.
        open_nanos: u64,
    },
    /// The summary file was decoded.
    SummaryRead {
        /// Time to read and decode, nanoseconds.
        nanos: u64,
    },
    /// The index file was decoded.
    IndexRead {
        /// Time to read and decode, nanoseconds.
        nanos: u64,
    },
    /// The compression-info file was decoded.
    CompressionInfoRead {
        /// Time to read and decode, nanoseconds.
        nanos: u64,
    },
    /// A single partition was skipped inside an opened fragment.
    PartitionSkipped {
        /// Why it was skipped.
        reason: PartitionSkipReason,
        /// The partition's token.
        token: Token,
    },
    /// The next in-range partition was emitted.
    PartitionRead {
        /// Time since the previous partition, nanoseconds.
        nanos: u64,
    },
    /// Leading out-of-range bytes were seeked past, never transferred.
    DataStartSkipped {
        /// Bytes skipped by starting the request at an offset.
        bytes: u64,
    },
    /// Trailing out-of-range bytes were never requested.
    DataEndSkipped {
        /// Bytes excluded by ending the request early.
        bytes: u64,
    },
    /// A compressed block was expanded.
    DecompressedBytes {
        /// Compressed length.
        compressed: usize,
        /// Decompressed length.
        raw: usize,
    },
    /// The merge scanner over all selected replicas was assembled.
    ScannerOpened {
        /// Time to open every constituent reader, nanoseconds.
        nanos: u64,
    },
    /// The streaming queue hit capacity; the consumer is the bottleneck.
    QueueFull,
    /// The consumer waited for bytes; the producer is the bottleneck.
    QueueBlocked {
        /// Time spent blocked on this wait, nanoseconds.
        nanos: u64,
    },
    /// The producer appended bytes to the queue.
    QueueBytesWritten {
        /// Bytes written.
        len: usize,
    },
    /// The consumer took bytes off the queue.
    QueueBytesRead {
        /// Bytes read.
        len: usize,
        /// Bytes still buffered after the read.
        fill: usize,
        /// Percent of the requested range consumed so far.
        percent_complete: u8,
    },
    /// A requested skip was satisfied.
    QueueBytesSkipped {
        /// Bytes discarded from already-buffered memory.
        buffered: u64,
        /// Bytes skipped by advancing the supplier's read position.
        ranged: u64,
    },
    /// A streaming queue finished and closed.
    StreamEnded {
        /// Total time the stream was open, nanoseconds.
        run_nanos: u64,
        /// Cumulative time the consumer spent blocked, nanoseconds.
        blocked_nanos: u64,
    },
    /// The byte supplier failed; the failure was surfaced to the consumer.
    StreamFailed,
    /// A commit-log segment header was validated.
    SegmentHeaderRead {
        /// Time to read, nanoseconds.
        nanos: u64,
    },
    /// A commit-log segment header could not be validated.
    SegmentHeaderFailed,
    /// A commit-log segment was fully processed.
    SegmentRead {
        /// Time to read the segment, nanoseconds.
        nanos: u64,
    },
    /// A segment ended mid-mutation; the remainder was skipped.
    SegmentTruncated,
    /// Commit-log bytes transferred from a replica.
    CommitLogBytesFetched {
        /// Bytes fetched.
        bytes: u64,
    },
    /// Commit-log bytes seeked past without transfer.
    CommitLogBytesSkipped {
        /// Bytes skipped.
        bytes: u64,
    },
    /// A mutation was successfully decoded.
    MutationRead {
        /// Serialized size in bytes.
        bytes: usize,
    },
    /// Lag between a mutation's write timestamp and the moment it was read.
    MutationReceiveLatency {
        /// Latency in microseconds.
        micros: i64,
    },
    /// A mutation was dropped; the reason is policy, not failure.
    MutationDropped {
        /// Why it was dropped.
        reason: MutationDropReason,
    },
    /// A mutation met the copy threshold and was published.
    MutationPublished {
        /// Whether it published after its natural batch.
        late: bool,
    },
    /// A micro-batch closed with a group below the copy threshold.
    InsufficientCopies {
        /// Distinct replicas that reported the mutation.
        copies: usize,
        /// Minimum required copies.
        required: usize,
    },
    /// A table's watermark floor was raised.
    WatermarkAdvanced {
        /// The table whose floor moved.
        table: TableId,
        /// New floor, microseconds.
        timestamp_micros: i64,
    },
    /// A micro-batch finished collecting from all replicas.
    BatchRead {
        /// Mutations collected this batch.
        mutations: usize,
        /// Wall time of the collection phase, nanoseconds.
        nanos: u64,
    },
}

/// Sink for [`Event`]s. Implementations must be cheap and non-blocking;
/// the core calls [`Reporter::report`] inline on hot paths.
pub trait Reporter: Send + Sync {
    /// Observe one event.
    fn report(&self, event: Event);
}

/// Reporter that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _event: Event) {}
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, event: Event) {
        (**self).report(event);
    }
}
