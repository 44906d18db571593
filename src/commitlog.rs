//! Incremental decoding of commit-log segments into mutation records.
//!
//! A segment is a validated header followed by length-prefixed, checksummed
//! mutation frames. Per-frame failures are policy, not errors: a bad
//! checksum or undecodable payload drops that frame and the scan continues,
//! while a truncated or implausibly-sized frame ends the segment early.
//! Only a bad header or a failed byte pipeline aborts the read.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use crate::{
    codec::MutationCodec,
    events::{Event, MutationDropReason, Reporter},
    mutation::{MutationRecord, TableId},
    observability::{log_debug, log_info, log_warn},
    streaming::{SourceError, StreamingReader},
    token::TokenRange,
};

/// Magic identifying a commit-log segment (`"TBL1"`).
pub const SEGMENT_MAGIC: u32 = 0x5442_4C31;

/// Byte length of the fixed segment header.
pub const SEGMENT_HEADER_LEN: u64 = 4 + 2 + 8;

/// Error reading a commit-log segment.
#[derive(Debug, thiserror::Error)]
pub enum CommitLogError {
    /// The segment header did not validate; nothing in the segment can be
    /// trusted.
    #[error("invalid commit-log segment header: {0}")]
    InvalidHeader(&'static str),
    /// The byte pipeline under the segment failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Validated segment header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Monotonic segment identity assigned by the writing node.
    pub segment_id: u64,
    /// Wire-format version of the frames that follow.
    pub version: u16,
}

/// Counters describing one segment pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct SegmentStats {
    /// Frames decoded into records.
    pub read: usize,
    /// Frames dropped by policy.
    pub dropped: usize,
    /// Whether the segment ended mid-frame.
    pub truncated: bool,
    /// Absolute offset one past the last fully-consumed frame; the starting
    /// point for the next incremental pass over this segment.
    pub next_offset: u64,
}

/// Records and counters produced by one segment pass.
#[derive(Debug)]
pub struct SegmentOutcome {
    /// Validated header.
    pub header: SegmentHeader,
    /// Decoded, tracked, in-range records in segment order.
    pub mutations: Vec<MutationRecord>,
    /// Pass counters.
    pub stats: SegmentStats,
}

/// Decoder for commit-log segments of one table set and token range.
pub struct CommitLogReader {
    codec: Arc<dyn MutationCodec>,
    tracked: HashSet<TableId>,
    range: Option<TokenRange>,
    max_mutation_len: usize,
    reporter: Arc<dyn Reporter>,
}

impl CommitLogReader {
    /// Build a reader tracking `tables` within `range`.
    pub fn new(
        codec: Arc<dyn MutationCodec>,
        tables: impl IntoIterator<Item = TableId>,
        range: Option<TokenRange>,
        max_mutation_len: usize,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            codec,
            tracked: tables.into_iter().collect(),
            range,
            max_mutation_len,
            reporter,
        }
    }

    /// Read one segment from `reader`, resuming at `start_offset` if a
    /// previous pass already consumed a prefix of it.
    ///
    /// `origin` is the host identity the resulting records are attributed
    /// to.
    pub async fn read_segment(
        &self,
        origin: &str,
        reader: &mut StreamingReader,
        start_offset: u64,
    ) -> Result<SegmentOutcome, CommitLogError> {
        let started = Instant::now();
        let header = self.read_header(reader).await?;

        if start_offset > reader.position() {
            let skipped = start_offset - reader.position();
            reader.skip(skipped).await?;
            self.reporter
                .report(Event::CommitLogBytesSkipped { bytes: skipped });
        }

        let mut mutations = Vec::new();
        let mut stats = SegmentStats {
            next_offset: reader.position(),
            ..SegmentStats::default()
        };

        loop {
            if !reader.has_remaining().await? {
                break;
            }
            let frame = match self.read_frame(reader).await? {
                FrameResult::Frame { crc, payload } => {
                    stats.next_offset = reader.position();
                    (crc, payload)
                }
                FrameResult::EndMarker => {
                    stats.next_offset = reader.position();
                    break;
                }
                FrameResult::Truncated => {
                    stats.truncated = true;
                    self.reporter.report(Event::SegmentTruncated);
                    log_warn!(
                        component = "commitlog",
                        event = "segment_truncated",
                        segment_id = header.segment_id,
                        offset = stats.next_offset,
                    );
                    break;
                }
                FrameResult::OversizedFrame => {
                    stats.dropped += 1;
                    self.reporter.report(Event::MutationDropped {
                        reason: MutationDropReason::InvalidSize,
                    });
                    break;
                }
            };

            match self.decode_frame(origin, frame.0, &frame.1) {
                Some(record) => {
                    self.reporter.report(Event::MutationRead {
                        bytes: record.size(),
                    });
                    self.reporter.report(Event::MutationReceiveLatency {
                        micros: now_micros() - record.max_timestamp_micros,
                    });
                    mutations.push(record);
                    stats.read += 1;
                }
                None => stats.dropped += 1,
            }
        }

        self.reporter.report(Event::CommitLogBytesFetched {
            bytes: reader.bytes_written(),
        });
        self.reporter.report(Event::SegmentRead {
            nanos: started.elapsed().as_nanos() as u64,
        });
        log_info!(
            component = "commitlog",
            event = "segment_read",
            segment_id = header.segment_id,
            origin,
            read = stats.read,
            dropped = stats.dropped,
            truncated = stats.truncated,
        );
        Ok(SegmentOutcome {
            header,
            mutations,
            stats,
        })
    }

    async fn read_header(
        &self,
        reader: &mut StreamingReader,
    ) -> Result<SegmentHeader, CommitLogError> {
        let started = Instant::now();
        let header = async {
            let bytes = reader
                .read_exact(SEGMENT_HEADER_LEN as usize)
                .await
                .map_err(|err| match err {
                    SourceError::UnexpectedEof { .. } => {
                        CommitLogError::InvalidHeader("segment shorter than its header")
                    }
                    other => CommitLogError::Source(other),
                })?;
            let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if magic != SEGMENT_MAGIC {
                return Err(CommitLogError::InvalidHeader("segment magic mismatch"));
            }
            let version = u16::from_le_bytes([bytes[4], bytes[5]]);
            if version != self.codec.version() {
                return Err(CommitLogError::InvalidHeader("segment version mismatch"));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[6..14]);
            Ok(SegmentHeader {
                segment_id: u64::from_le_bytes(raw),
                version,
            })
        }
        .await;

        match header {
            Ok(header) => {
                self.reporter.report(Event::SegmentHeaderRead {
                    nanos: started.elapsed().as_nanos() as u64,
                });
                Ok(header)
            }
            Err(err) => {
                if matches!(err, CommitLogError::InvalidHeader(_)) {
                    self.reporter.report(Event::SegmentHeaderFailed);
                }
                Err(err)
            }
        }
    }

    async fn read_frame(
        &self,
        reader: &mut StreamingReader,
    ) -> Result<FrameResult, CommitLogError> {
        let len_bytes = match reader.read_exact(4).await {
            Ok(bytes) => bytes,
            Err(SourceError::UnexpectedEof { .. }) => return Ok(FrameResult::Truncated),
            Err(err) => return Err(err.into()),
        };
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        // Writers zero-fill preallocated segments; a zero length is the end
        // of the written region, not a fault.
        if len == 0 {
            return Ok(FrameResult::EndMarker);
        }
        if len as usize > self.max_mutation_len {
            return Ok(FrameResult::OversizedFrame);
        }
        let crc_bytes = match reader.read_exact(4).await {
            Ok(bytes) => bytes,
            Err(SourceError::UnexpectedEof { .. }) => return Ok(FrameResult::Truncated),
            Err(err) => return Err(err.into()),
        };
        let crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let payload = match reader.read_exact(len as usize).await {
            Ok(bytes) => bytes,
            Err(SourceError::UnexpectedEof { .. }) => return Ok(FrameResult::Truncated),
            Err(err) => return Err(err.into()),
        };
        Ok(FrameResult::Frame { crc, payload })
    }

    /// Apply the drop policy chain to one complete frame.
    fn decode_frame(
        &self,
        origin: &str,
        crc: u32,
        payload: &bytes::Bytes,
    ) -> Option<MutationRecord> {
        if crc32fast::hash(payload) != crc {
            self.drop_frame(MutationDropReason::ChecksumMismatch);
            return None;
        }
        let decoded = match self.codec.decode_mutation(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                log_debug!(
                    component = "commitlog",
                    event = "mutation_decode_failed",
                    error = %err,
                );
                self.drop_frame(MutationDropReason::DecodeFailed);
                return None;
            }
        };
        if !self.tracked.contains(&decoded.table_id) {
            self.drop_frame(MutationDropReason::UntrackedTable);
            return None;
        }
        if let Some(range) = &self.range {
            if !range.contains(decoded.token) {
                self.drop_frame(MutationDropReason::OutOfTokenRange);
                return None;
            }
        }
        Some(MutationRecord {
            table_id: decoded.table_id,
            token: decoded.token,
            max_timestamp_micros: decoded.max_timestamp_micros,
            digest: u64::from(crc),
            payload: decoded.payload,
            origin: origin.to_string(),
        })
    }

    fn drop_frame(&self, reason: MutationDropReason) {
        self.reporter.report(Event::MutationDropped { reason });
    }
}

enum FrameResult {
    Frame { crc: u32, payload: bytes::Bytes },
    EndMarker,
    Truncated,
    OversizedFrame,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
