//! The byte-supplying collaborator contract.

use bytes::Bytes;

use super::SourceError;

/// Supplier of raw file bytes, backed by local disk or a remote node.
///
/// Suppliers are positionless: the pipeline's producer asks for explicit
/// `(offset, max_len)` windows, which is what lets a skip advance the read
/// position without transferring the discarded bytes at all. Partial results
/// are allowed; an empty result signals end-of-stream, distinct from an
/// error.
#[async_trait::async_trait]
pub trait ByteSupplier: Send + Sync {
    /// Total length of the underlying file in bytes.
    async fn size(&self) -> Result<u64, SourceError>;

    /// Read up to `max_len` bytes starting at `offset`.
    async fn fetch(&self, offset: u64, max_len: usize) -> Result<Bytes, SourceError>;
}
