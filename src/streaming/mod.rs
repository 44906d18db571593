//! Bounded, backpressure-aware byte pipeline between a byte supplier and a
//! sequential decoder.
//!
//! One producer task pulls chunks from a [`ByteSupplier`] (disk or network)
//! into a bounded queue; one consumer drains it through [`StreamingReader`].
//! The queue is the only shared structure between the I/O side and the decode
//! side, and its instrumentation distinguishes a full queue (consumer is
//! CPU-bound) from a blocked consumer (job is I/O-bound).

mod queue;
mod source;

pub use queue::{QueueConfig, StreamingQueue, StreamingReader};
pub use source::ByteSupplier;

/// Error produced by the byte pipeline.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SourceError {
    /// The underlying byte supplier failed.
    #[error("byte supplier failure: {0}")]
    Supplier(String),
    /// The stream ended before the decoder's request could be satisfied.
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof {
        /// Absolute offset the consumer had reached.
        offset: u64,
    },
    /// The stream was cancelled before completing.
    #[error("stream cancelled")]
    Cancelled,
}
