//! Versioned decoding contract for on-disk formats.
//!
//! The orchestration core is agnostic to the concrete table-file and mutation
//! wire formats: every raw decode routes through a [`TableCodec`] /
//! [`MutationCodec`] supplied per format version. [`v1::V1Codec`] is the
//! bundled version and doubles as the fixture format for tests.

pub mod v1;

use bytes::Bytes;

use crate::{
    mutation::TableId,
    sstable::{BloomFilter, CompressionInfo, IndexEntry, Summary},
    token::Token,
};

/// Error produced while decoding a versioned format.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes do not form a valid value for this version.
    #[error("{0}")]
    Corrupt(&'static str),
    /// The format version marker is not one this codec understands.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
}

/// A mutation's decoded fields, before the reading side attaches the
/// replica origin and payload digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedMutation {
    /// Table the mutation targets.
    pub table_id: TableId,
    /// Ring token of the mutated partition.
    pub token: Token,
    /// Highest client write timestamp, microseconds.
    pub max_timestamp_micros: i64,
    /// Opaque serialized partition update.
    pub payload: Bytes,
}

/// Decoder for one version of the table-file formats.
///
/// All methods take fully buffered component bytes except
/// [`TableCodec::decode_index_entry`], which parses one entry at a time so
/// index entries can be produced lazily and discarded.
pub trait TableCodec: Send + Sync {
    /// Format version this codec implements.
    fn version(&self) -> u16;

    /// Decode a summary component.
    fn decode_summary(&self, bytes: &[u8]) -> Result<Summary, CodecError>;

    /// Decode the next index entry from `bytes`, returning the entry and the
    /// number of bytes consumed, or `None` at a clean end of input.
    fn decode_index_entry(&self, bytes: &[u8])
        -> Result<Option<(IndexEntry, usize)>, CodecError>;

    /// Decode a bloom-filter component.
    fn decode_filter(&self, bytes: &[u8]) -> Result<BloomFilter, CodecError>;

    /// Decode a compression-info component.
    fn decode_compression_info(&self, bytes: &[u8]) -> Result<CompressionInfo, CodecError>;

    /// Expand one compressed chunk to exactly `raw_len` bytes.
    fn decompress_chunk(&self, chunk: &[u8], raw_len: usize) -> Result<Bytes, CodecError>;
}

/// Decoder for one version of the mutation wire format.
pub trait MutationCodec: Send + Sync {
    /// Format version this codec implements.
    fn version(&self) -> u16;

    /// Decode one serialized mutation payload.
    fn decode_mutation(&self, bytes: &[u8]) -> Result<DecodedMutation, CodecError>;
}
