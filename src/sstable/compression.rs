//! Block layout of a compressed data file.
//!
//! Index offsets address the uncompressed byte space; this component maps
//! those positions to the compressed chunks that must actually be fetched.

/// Location of one compressed chunk within the on-disk data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Byte offset of the chunk in the compressed file.
    pub offset: u64,
    /// Compressed length of the chunk in bytes.
    pub len: u32,
}

/// Decoded compression-info component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionInfo {
    /// Total uncompressed data length.
    pub data_len: u64,
    /// Uncompressed length of every chunk but the last.
    pub block_len: u32,
    /// Chunks in file order.
    pub chunks: Vec<ChunkSpec>,
}

impl CompressionInfo {
    /// Index of the chunk containing the uncompressed position `offset`.
    pub fn chunk_index_for(&self, offset: u64) -> usize {
        (offset / u64::from(self.block_len)) as usize
    }

    /// Uncompressed start position of chunk `index`.
    pub fn chunk_start(&self, index: usize) -> u64 {
        index as u64 * u64::from(self.block_len)
    }

    /// Uncompressed length of chunk `index` (the last chunk may be short).
    pub fn raw_chunk_len(&self, index: usize) -> u64 {
        let start = self.chunk_start(index);
        u64::from(self.block_len).min(self.data_len - start)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkSpec, CompressionInfo};

    fn info() -> CompressionInfo {
        CompressionInfo {
            data_len: 250,
            block_len: 100,
            chunks: vec![
                ChunkSpec { offset: 0, len: 90 },
                ChunkSpec { offset: 90, len: 95 },
                ChunkSpec {
                    offset: 185,
                    len: 40,
                },
            ],
        }
    }

    #[test]
    fn maps_uncompressed_offsets_to_chunks() {
        let info = info();
        assert_eq!(info.chunk_index_for(0), 0);
        assert_eq!(info.chunk_index_for(99), 0);
        assert_eq!(info.chunk_index_for(100), 1);
        assert_eq!(info.chunk_index_for(249), 2);
    }

    #[test]
    fn last_chunk_is_short() {
        let info = info();
        assert_eq!(info.raw_chunk_len(0), 100);
        assert_eq!(info.raw_chunk_len(1), 100);
        assert_eq!(info.raw_chunk_len(2), 50);
        assert_eq!(info.chunk_start(2), 200);
    }
}
