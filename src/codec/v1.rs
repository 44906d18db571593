//! Version-1 table-file and mutation formats.
//!
//! All integers are little-endian. Component layouts:
//!
//! - summary: magic, version, first token, last token, entry count, then
//!   `(token, index offset)` entries in token order
//! - index: repeated `(key len, key, token, data offset, data size)` entries
//! - filter: hash rounds, bit count, bit array
//! - compression info: magic, version, data length, block length, chunk
//!   count, then `(offset, compressed len)` chunk specs
//! - mutation: table id, token, max timestamp, payload length, payload
//!
//! Version 1 applies no chunk transform: compressed and raw lengths must
//! match. The seam exists so later versions can plug real block codecs.

use bytes::Bytes;

use super::{CodecError, DecodedMutation, MutationCodec, TableCodec};
use crate::{
    mutation::TableId,
    sstable::{BloomFilter, ChunkSpec, CompressionInfo, IndexEntry, Summary, SummaryEntry},
    token::Token,
};

/// Magic identifying a v1 summary component (`"TBS1"`).
pub const SUMMARY_MAGIC: u32 = 0x5442_5331;
/// Magic identifying a v1 compression-info component (`"TBC1"`).
pub const COMPRESSION_MAGIC: u32 = 0x5442_4331;
/// Format version implemented by [`V1Codec`].
pub const FORMAT_VERSION: u16 = 1;

/// The bundled version-1 codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct V1Codec;

struct SliceReader<'a> {
    buf: &'a [u8],
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Corrupt(what));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, CodecError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn i64(&mut self, what: &'static str) -> Result<i64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, what)?);
        Ok(i64::from_le_bytes(raw))
    }

    fn u128(&mut self, what: &'static str) -> Result<u128, CodecError> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(self.take(16, what)?);
        Ok(u128::from_le_bytes(raw))
    }

    fn i128(&mut self, what: &'static str) -> Result<i128, CodecError> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(self.take(16, what)?);
        Ok(i128::from_le_bytes(raw))
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }
}

impl TableCodec for V1Codec {
    fn version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn decode_summary(&self, bytes: &[u8]) -> Result<Summary, CodecError> {
        let mut reader = SliceReader::new(bytes);
        if reader.u32("summary header truncated")? != SUMMARY_MAGIC {
            return Err(CodecError::Corrupt("summary magic mismatch"));
        }
        let version = reader.u16("summary header truncated")?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let first_token = reader.i128("summary header truncated")?;
        let last_token = reader.i128("summary header truncated")?;
        if first_token > last_token {
            return Err(CodecError::Corrupt("summary token span inverted"));
        }
        let count = reader.u32("summary header truncated")? as usize;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let token = reader.i128("summary entry truncated")?;
            let index_offset = reader.u64("summary entry truncated")?;
            entries.push(SummaryEntry {
                token,
                index_offset,
            });
        }
        if reader.remaining() != 0 {
            return Err(CodecError::Corrupt("summary trailing bytes"));
        }
        Ok(Summary {
            first_token,
            last_token,
            entries,
        })
    }

    fn decode_index_entry(
        &self,
        bytes: &[u8],
    ) -> Result<Option<(IndexEntry, usize)>, CodecError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let mut reader = SliceReader::new(bytes);
        let key_len = reader.u16("index entry truncated")? as usize;
        if key_len == 0 {
            return Err(CodecError::Corrupt("index entry empty key"));
        }
        let key = reader.take(key_len, "index entry truncated")?;
        let token = reader.i128("index entry truncated")?;
        let offset = reader.u64("index entry truncated")?;
        let size = reader.u64("index entry truncated")?;
        let consumed = 2 + key_len + 16 + 8 + 8;
        Ok(Some((
            IndexEntry {
                key: Bytes::copy_from_slice(key),
                token,
                offset,
                size,
            },
            consumed,
        )))
    }

    fn decode_filter(&self, bytes: &[u8]) -> Result<BloomFilter, CodecError> {
        let mut reader = SliceReader::new(bytes);
        let num_hashes = reader.u32("filter header truncated")?;
        let num_bits = reader.u32("filter header truncated")? as usize;
        let byte_len = num_bits.div_ceil(8);
        let bits = reader.take(byte_len, "filter bits truncated")?.to_vec();
        if reader.remaining() != 0 {
            return Err(CodecError::Corrupt("filter trailing bytes"));
        }
        BloomFilter::from_parts(bits, num_bits, num_hashes)
            .ok_or(CodecError::Corrupt("filter dimensions invalid"))
    }

    fn decode_compression_info(&self, bytes: &[u8]) -> Result<CompressionInfo, CodecError> {
        let mut reader = SliceReader::new(bytes);
        if reader.u32("compression info truncated")? != COMPRESSION_MAGIC {
            return Err(CodecError::Corrupt("compression info magic mismatch"));
        }
        let version = reader.u16("compression info truncated")?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let data_len = reader.u64("compression info truncated")?;
        let block_len = reader.u32("compression info truncated")?;
        if block_len == 0 {
            return Err(CodecError::Corrupt("compression block length zero"));
        }
        let count = reader.u32("compression info truncated")? as usize;
        let expected = (data_len.div_ceil(u64::from(block_len))) as usize;
        if count != expected {
            return Err(CodecError::Corrupt("compression chunk count mismatch"));
        }
        let mut chunks = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let offset = reader.u64("compression chunk truncated")?;
            let len = reader.u32("compression chunk truncated")?;
            chunks.push(ChunkSpec { offset, len });
        }
        if reader.remaining() != 0 {
            return Err(CodecError::Corrupt("compression info trailing bytes"));
        }
        Ok(CompressionInfo {
            data_len,
            block_len,
            chunks,
        })
    }

    fn decompress_chunk(&self, chunk: &[u8], raw_len: usize) -> Result<Bytes, CodecError> {
        if chunk.len() != raw_len {
            return Err(CodecError::Corrupt("chunk length mismatch"));
        }
        Ok(Bytes::copy_from_slice(chunk))
    }
}

impl MutationCodec for V1Codec {
    fn version(&self) -> u16 {
        FORMAT_VERSION
    }

    fn decode_mutation(&self, bytes: &[u8]) -> Result<DecodedMutation, CodecError> {
        let mut reader = SliceReader::new(bytes);
        let table_id = TableId(reader.u128("mutation truncated")?);
        let token: Token = reader.i128("mutation truncated")?;
        let max_timestamp_micros = reader.i64("mutation truncated")?;
        let payload_len = reader.u32("mutation truncated")? as usize;
        let payload = reader.take(payload_len, "mutation payload truncated")?;
        if reader.remaining() != 0 {
            return Err(CodecError::Corrupt("mutation trailing bytes"));
        }
        Ok(DecodedMutation {
            table_id,
            token,
            max_timestamp_micros,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Serialize a summary component in v1 layout. Inverse of
/// [`V1Codec::decode_summary`], used by writers and fixtures.
pub fn encode_summary(summary: &Summary) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&SUMMARY_MAGIC.to_le_bytes());
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&summary.first_token.to_le_bytes());
    buf.extend_from_slice(&summary.last_token.to_le_bytes());
    buf.extend_from_slice(&(summary.entries.len() as u32).to_le_bytes());
    for entry in &summary.entries {
        buf.extend_from_slice(&entry.token.to_le_bytes());
        buf.extend_from_slice(&entry.index_offset.to_le_bytes());
    }
    buf
}

/// Serialize index entries in v1 layout.
pub fn encode_index(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&entry.key);
        buf.extend_from_slice(&entry.token.to_le_bytes());
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        buf.extend_from_slice(&entry.size.to_le_bytes());
    }
    buf
}

/// Serialize a bloom filter in v1 layout.
pub fn encode_filter(filter: &BloomFilter) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&filter.num_hashes().to_le_bytes());
    buf.extend_from_slice(&(filter.num_bits() as u32).to_le_bytes());
    buf.extend_from_slice(filter.bits());
    buf
}

/// Serialize a compression-info component in v1 layout.
pub fn encode_compression_info(info: &CompressionInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&COMPRESSION_MAGIC.to_le_bytes());
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&info.data_len.to_le_bytes());
    buf.extend_from_slice(&info.block_len.to_le_bytes());
    buf.extend_from_slice(&(info.chunks.len() as u32).to_le_bytes());
    for chunk in &info.chunks {
        buf.extend_from_slice(&chunk.offset.to_le_bytes());
        buf.extend_from_slice(&chunk.len.to_le_bytes());
    }
    buf
}

/// Serialize a mutation payload in v1 layout.
pub fn encode_mutation(mutation: &DecodedMutation) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&mutation.table_id.0.to_le_bytes());
    buf.extend_from_slice(&mutation.token.to_le_bytes());
    buf.extend_from_slice(&mutation.max_timestamp_micros.to_le_bytes());
    buf.extend_from_slice(&(mutation.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&mutation.payload);
    buf
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::sstable::SummaryEntry;

    #[test]
    fn summary_round_trip() {
        let summary = Summary {
            first_token: -500,
            last_token: 12_000,
            entries: vec![
                SummaryEntry {
                    token: -500,
                    index_offset: 0,
                },
                SummaryEntry {
                    token: 6_000,
                    index_offset: 128,
                },
            ],
        };
        let bytes = encode_summary(&summary);
        assert_eq!(V1Codec.decode_summary(&bytes).unwrap(), summary);
    }

    #[test]
    fn summary_rejects_bad_magic() {
        let mut bytes = encode_summary(&Summary {
            first_token: 0,
            last_token: 1,
            entries: vec![],
        });
        bytes[0] ^= 0xFF;
        assert!(matches!(
            V1Codec.decode_summary(&bytes),
            Err(CodecError::Corrupt("summary magic mismatch"))
        ));
    }

    #[test]
    fn summary_rejects_inverted_span() {
        let bytes = encode_summary(&Summary {
            first_token: 10,
            last_token: -10,
            entries: vec![],
        });
        assert!(matches!(
            V1Codec.decode_summary(&bytes),
            Err(CodecError::Corrupt("summary token span inverted"))
        ));
    }

    #[test]
    fn index_entries_decode_incrementally() {
        let entries = vec![
            IndexEntry {
                key: Bytes::from_static(b"alpha"),
                token: -42,
                offset: 0,
                size: 600,
            },
            IndexEntry {
                key: Bytes::from_static(b"beta"),
                token: 77,
                offset: 600,
                size: 100,
            },
        ];
        let bytes = encode_index(&entries);
        let (first, consumed) = V1Codec.decode_index_entry(&bytes).unwrap().unwrap();
        assert_eq!(first, entries[0]);
        let (second, rest) = V1Codec
            .decode_index_entry(&bytes[consumed..])
            .unwrap()
            .unwrap();
        assert_eq!(second, entries[1]);
        assert!(V1Codec
            .decode_index_entry(&bytes[consumed + rest..])
            .unwrap()
            .is_none());
    }

    #[test]
    fn index_entry_truncation_is_corrupt() {
        let bytes = encode_index(&[IndexEntry {
            key: Bytes::from_static(b"alpha"),
            token: 1,
            offset: 0,
            size: 10,
        }]);
        assert!(V1Codec.decode_index_entry(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn mutation_round_trip() {
        let mutation = DecodedMutation {
            table_id: TableId(0xDEAD_BEEF),
            token: -77,
            max_timestamp_micros: 1_700_000_000_000_000,
            payload: Bytes::from_static(b"update"),
        };
        let bytes = encode_mutation(&mutation);
        assert_eq!(V1Codec.decode_mutation(&bytes).unwrap(), mutation);
    }

    #[test]
    fn identity_chunk_transform_checks_length() {
        assert!(V1Codec.decompress_chunk(b"abcd", 4).is_ok());
        assert!(V1Codec.decompress_chunk(b"abcd", 5).is_err());
    }
}
