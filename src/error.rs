//! Top-level error type for streaming read tasks.
//!
//! Per-fragment and per-mutation failures are contained and counted where
//! they happen; only consistency-level failures (or exhaustion of both
//! primary and backup replicas) surface here and terminate a task.

use crate::{
    commitlog::CommitLogError, replica::SelectionError, sstable::TableError,
    streaming::SourceError,
};

/// Error returned for a streaming read task.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Replica selection error
    #[error("replica selection error: {0}")]
    Selection(#[from] SelectionError),
    /// Table fragment error
    #[error("table error: {0}")]
    Table(#[from] TableError),
    /// Byte source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    /// Commit log error
    #[error("commit log error: {0}")]
    CommitLog(#[from] CommitLogError),
}
