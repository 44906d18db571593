//! Opening, filtering, and sequential decoding of one table fragment.
//!
//! A fragment is an immutable set of sibling component files: a summary
//! (coarse token span), an index (per-partition offsets), an optional bloom
//! filter, optional compression info, and the data file itself. The reader
//! opens them in that order so the cheapest rejection always runs first.

pub(crate) mod bloom;
pub(crate) mod compression;
pub(crate) mod index;
pub(crate) mod reader;
pub(crate) mod summary;

use std::{fmt, sync::Arc};

pub use bloom::BloomFilter;
pub use compression::{ChunkSpec, CompressionInfo};
pub use index::IndexEntry;
pub use reader::{OpenOutcome, Partition, TableFileReader};
pub use summary::{Summary, SummaryEntry};

use crate::streaming::{ByteSupplier, SourceError};

/// Component files making up one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Coarse token-span summary.
    Summary,
    /// Per-partition index.
    Index,
    /// Bloom filter over partition keys.
    Filter,
    /// Compressed-chunk layout.
    CompressionInfo,
    /// Partition data.
    Data,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Summary => "summary",
            FileKind::Index => "index",
            FileKind::Filter => "filter",
            FileKind::CompressionInfo => "compression-info",
            FileKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// Error reading one fragment.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A component file could not be decoded. The fragment is excluded; the
    /// caller decides whether the scan continues.
    #[error("corrupt sstable {keyspace}/{table} {name} ({file}): {reason}")]
    Corrupt {
        /// Keyspace owning the fragment.
        keyspace: String,
        /// Table owning the fragment.
        table: String,
        /// Fragment name.
        name: String,
        /// Component that failed.
        file: FileKind,
        /// Decode failure detail.
        reason: String,
    },
    /// The byte pipeline under a component stream failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Byte suppliers for each component file of a fragment.
#[derive(Clone)]
pub struct SstableComponents {
    /// Summary component.
    pub summary: Arc<dyn ByteSupplier>,
    /// Index component.
    pub index: Arc<dyn ByteSupplier>,
    /// Bloom filter component, when the fragment has one.
    pub filter: Option<Arc<dyn ByteSupplier>>,
    /// Compression info, present only for compressed data files.
    pub compression: Option<Arc<dyn ByteSupplier>>,
    /// Data component.
    pub data: Arc<dyn ByteSupplier>,
}

impl fmt::Debug for SstableComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SstableComponents")
            .field("filter", &self.filter.is_some())
            .field("compression", &self.compression.is_some())
            .finish_non_exhaustive()
    }
}

/// One immutable fragment and where to find its component files.
#[derive(Clone, Debug)]
pub struct SstableHandle {
    /// Keyspace owning the fragment.
    pub keyspace: String,
    /// Table owning the fragment.
    pub table: String,
    /// Fragment name, unique within its replica.
    pub name: String,
    /// Timestamp of the last repair covering this fragment, if fully
    /// repaired.
    pub repaired_at: Option<i64>,
    /// Component suppliers.
    pub components: SstableComponents,
}

impl SstableHandle {
    pub(crate) fn corrupt(&self, file: FileKind, reason: impl fmt::Display) -> TableError {
        TableError::Corrupt {
            keyspace: self.keyspace.clone(),
            table: self.table.clone(),
            name: self.name.clone(),
            file,
            reason: reason.to_string(),
        }
    }
}
