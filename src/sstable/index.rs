//! Per-partition index entries.

use bytes::Bytes;

use crate::token::Token;

/// One partition's location within a data file.
///
/// Produced lazily while decoding an index file; not retained after the
/// read plan for the fragment is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Raw partition key bytes.
    pub key: Bytes,
    /// Ring token of the key.
    pub token: Token,
    /// Byte offset of the partition within the (uncompressed) data file.
    pub offset: u64,
    /// Serialized size of the partition in bytes.
    pub size: u64,
}

impl IndexEntry {
    /// Offset one past the partition's last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
