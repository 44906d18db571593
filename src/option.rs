//! Configuration bundle for read tasks and the CDC micro-batch loop.

use std::time::Duration;

use crate::replica::ConsistencyLevel;

const DEFAULT_QUEUE_CHUNK_LEN: usize = 64 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 16;
const DEFAULT_MAX_MUTATION_LEN: usize = 64 * 1024 * 1024;

/// Options shared by the read path and the CDC path.
///
/// Built with `with_*` setters:
///
/// ```
/// use tablestream::{ConsistencyLevel, ReadOptions};
///
/// let options = ReadOptions::new(ConsistencyLevel::Quorum)
///     .with_min_mutation_copies(2)
///     .with_queue_capacity(8);
/// assert_eq!(options.min_mutation_copies(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct ReadOptions {
    consistency: ConsistencyLevel,
    min_mutation_copies: usize,
    queue_chunk_len: usize,
    queue_capacity: usize,
    batch_read_timeout: Duration,
    max_mutation_len: usize,
}

impl ReadOptions {
    /// Options with defaults for everything but the consistency level.
    pub fn new(consistency: ConsistencyLevel) -> Self {
        Self {
            consistency,
            min_mutation_copies: 1,
            queue_chunk_len: DEFAULT_QUEUE_CHUNK_LEN,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_read_timeout: Duration::from_secs(10),
            max_mutation_len: DEFAULT_MAX_MUTATION_LEN,
        }
    }

    /// Minimum distinct replicas that must report a mutation before it is
    /// published.
    pub fn with_min_mutation_copies(mut self, copies: usize) -> Self {
        self.min_mutation_copies = copies.max(1);
        self
    }

    /// Chunk size, in bytes, for streaming-queue transfers.
    pub fn with_queue_chunk_len(mut self, len: usize) -> Self {
        self.queue_chunk_len = len.max(1);
        self
    }

    /// Streaming-queue capacity, in chunks.
    pub fn with_queue_capacity(mut self, chunks: usize) -> Self {
        self.queue_capacity = chunks.max(1);
        self
    }

    /// Bound on how long one micro-batch waits for all replicas' commit-log
    /// readers.
    pub fn with_batch_read_timeout(mut self, timeout: Duration) -> Self {
        self.batch_read_timeout = timeout;
        self
    }

    /// Upper bound on a plausible serialized mutation; larger length
    /// prefixes are treated as corruption.
    pub fn with_max_mutation_len(mut self, len: usize) -> Self {
        self.max_mutation_len = len.max(1);
        self
    }

    /// The read consistency level.
    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Minimum replica copies per published mutation.
    pub fn min_mutation_copies(&self) -> usize {
        self.min_mutation_copies
    }

    /// Streaming-queue chunk size in bytes.
    pub fn queue_chunk_len(&self) -> usize {
        self.queue_chunk_len
    }

    /// Streaming-queue capacity in chunks.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Micro-batch collection timeout.
    pub fn batch_read_timeout(&self) -> Duration {
        self.batch_read_timeout
    }

    /// Maximum plausible serialized mutation length.
    pub fn max_mutation_len(&self) -> usize {
        self.max_mutation_len
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new(ConsistencyLevel::One)
    }
}
