#![deny(missing_docs)]
//! Multi-replica, consistency-aware streaming reader for immutable table
//! fragments (sstables) and change-data-capture commit logs.
//!
//! A read task selects enough replicas to satisfy a consistency level, opens
//! only the fragments whose token span and partition keys survive the
//! filters, streams their data files through bounded backpressure-aware
//! queues, and merges the per-fragment partition streams into one ordered,
//! deduplicated scan. The CDC side decodes commit-log segments into
//! mutation records and publishes each mutation once enough distinct
//! replicas have reported it.
//!
//! Every meaningful decision is observable through the [`events::Event`]
//! taxonomy; the formats on disk are versioned behind
//! [`codec::TableCodec`] and [`codec::MutationCodec`].

mod error;
mod observability;
mod option;
mod task;

pub use crate::{
    error::ReadError,
    option::ReadOptions,
    replica::ConsistencyLevel,
    task::ReadTask,
    token::{Token, TokenRange},
};

/// Change-data-capture aggregation over commit-log mutations.
pub mod cdc;

/// Versioned on-disk format decoding.
pub mod codec;

/// Commit-log segment decoding.
pub mod commitlog;

/// Telemetry events and the reporter seam.
pub mod events;

/// Token-range and partition-key filtering.
pub mod filter;

/// K-way merge across fragments and replicas.
pub mod merge;

/// Decoded mutation records and their grouping identity.
pub mod mutation;

/// Replica identity, consistency levels, and selection.
pub mod replica;

/// Fragment components and the table-file reader.
pub mod sstable;

/// Bounded byte pipeline between suppliers and decoders.
pub mod streaming;

/// In-memory fixtures and collectors for exercising the crate.
pub mod test_util;

/// Ring tokens and token ranges.
pub mod token;
