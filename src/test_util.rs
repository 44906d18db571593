//! In-memory suppliers, event collectors, and on-disk-format fixtures.
//!
//! Everything here is deterministic and allocation-backed so behavior can be
//! exercised without real files or a network. The fixture builders produce
//! bytes in the v1 layout via the same encoders a writer would use.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::{
    codec::{
        v1::{
            encode_compression_info, encode_filter, encode_index, encode_mutation,
            encode_summary, FORMAT_VERSION,
        },
        DecodedMutation,
    },
    commitlog::SEGMENT_MAGIC,
    events::{Event, Reporter},
    replica::FragmentStore,
    sstable::{
        BloomFilter, ChunkSpec, CompressionInfo, IndexEntry, SstableComponents, SstableHandle,
        Summary, SummaryEntry, TableError,
    },
    streaming::{ByteSupplier, SourceError},
    token::Token,
};

/// Byte supplier backed by a buffer, with failure and pacing knobs.
pub struct InMemorySupplier {
    data: Bytes,
    fetches: Mutex<Vec<(u64, usize)>>,
    delay: Option<Duration>,
    fail_at: Option<u64>,
    gate: Option<Semaphore>,
}

impl InMemorySupplier {
    /// Supplier over `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            fetches: Mutex::new(Vec::new()),
            delay: None,
            fail_at: None,
            gate: None,
        }
    }

    /// Sleep `delay` before serving each fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every fetch at or past `offset`.
    pub fn failing_after(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Block fetches until [`InMemorySupplier::allow_fetches`] grants them.
    pub fn with_fetch_gate(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Grant `n` more fetches through the gate.
    pub async fn allow_fetches(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n.min(1 << 20));
        }
    }

    /// `(offset, max_len)` of every fetch served so far.
    pub fn fetches(&self) -> Vec<(u64, usize)> {
        match self.fetches.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl ByteSupplier for InMemorySupplier {
    async fn size(&self) -> Result<u64, SourceError> {
        Ok(self.data.len() as u64)
    }

    async fn fetch(&self, offset: u64, max_len: usize) -> Result<Bytes, SourceError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| SourceError::Supplier("fetch gate closed".into()))?;
            permit.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut fetches) = self.fetches.lock() {
            fetches.push((offset, max_len));
        }
        if self.fail_at.is_some_and(|fail_at| offset >= fail_at) {
            return Err(SourceError::Supplier("injected supplier failure".into()));
        }
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = (offset + max_len as u64).min(len);
        Ok(self.data.slice(offset as usize..end as usize))
    }
}

/// Reporter that records every event for later assertions.
#[derive(Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<Event>>,
}

impl CollectingReporter {
    /// Whether any recorded event satisfies `predicate`.
    pub fn has(&self, predicate: impl Fn(&Event) -> bool) -> bool {
        self.events().iter().any(predicate)
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Fragment store holding no fragments.
pub struct EmptyStore;

#[async_trait::async_trait]
impl FragmentStore for EmptyStore {
    async fn snapshot(&self) -> Result<Vec<SstableHandle>, TableError> {
        Ok(Vec::new())
    }
}

/// One partition in a fixture fragment.
#[derive(Clone, Debug)]
pub struct FixturePartition {
    /// Partition key bytes.
    pub key: Bytes,
    /// Ring token.
    pub token: Token,
    /// Serialized payload.
    pub payload: Bytes,
}

impl FixturePartition {
    /// Build a fixture partition.
    pub fn new(key: &[u8], token: Token, payload: impl Into<Bytes>) -> Self {
        Self {
            key: Bytes::copy_from_slice(key),
            token,
            payload: payload.into(),
        }
    }
}

/// Uncompressed chunk length used by compressed fixtures; small so a few
/// hundred bytes of data spans multiple chunks.
const FIXTURE_BLOCK_LEN: u32 = 128;

/// A complete fragment encoded in the v1 layout.
pub struct SstableFixture {
    keyspace: String,
    table: String,
    name: String,
    repaired_at: Option<i64>,
    summary: Bytes,
    index: Bytes,
    filter: Bytes,
    compression: Option<Bytes>,
    data: Bytes,
}

/// Encode `partitions` (sorted by token) into a fixture fragment.
pub fn sstable_fixture(
    keyspace: &str,
    table: &str,
    name: &str,
    partitions: &[FixturePartition],
    compressed: bool,
    repaired_at: Option<i64>,
) -> SstableFixture {
    let mut partitions = partitions.to_vec();
    partitions.sort_by_key(|p| p.token);

    let mut data = Vec::new();
    let mut entries = Vec::with_capacity(partitions.len());
    let mut bloom = BloomFilter::with_capacity(partitions.len().max(1));
    for partition in &partitions {
        bloom.insert(&partition.key);
        entries.push(IndexEntry {
            key: partition.key.clone(),
            token: partition.token,
            offset: data.len() as u64,
            size: partition.payload.len() as u64,
        });
        data.extend_from_slice(&partition.payload);
    }

    let index = encode_index(&entries);
    let mut summary_entries = Vec::new();
    let mut index_offset = 0u64;
    for entry in &entries {
        summary_entries.push(SummaryEntry {
            token: entry.token,
            index_offset,
        });
        index_offset += (2 + entry.key.len() + 16 + 8 + 8) as u64;
    }
    let summary = Summary {
        first_token: entries.first().map(|e| e.token).unwrap_or(0),
        last_token: entries.last().map(|e| e.token).unwrap_or(0),
        entries: summary_entries,
    };

    let compression = compressed.then(|| {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut remaining = data.len() as u64;
        while remaining > 0 {
            let len = remaining.min(u64::from(FIXTURE_BLOCK_LEN)) as u32;
            chunks.push(ChunkSpec { offset, len });
            offset += u64::from(len);
            remaining -= u64::from(len);
        }
        CompressionInfo {
            data_len: data.len() as u64,
            block_len: FIXTURE_BLOCK_LEN,
            chunks,
        }
    });

    SstableFixture {
        keyspace: keyspace.to_string(),
        table: table.to_string(),
        name: name.to_string(),
        repaired_at,
        summary: encode_summary(&summary).into(),
        index: index.into(),
        filter: encode_filter(&bloom).into(),
        compression: compression.map(|info| encode_compression_info(&info).into()),
        data: data.into(),
    }
}

impl SstableFixture {
    /// Flip a summary byte so the fragment fails decoding.
    pub fn with_corrupt_summary(mut self) -> Self {
        let mut bytes = self.summary.to_vec();
        bytes[0] ^= 0xFF;
        self.summary = bytes.into();
        self
    }

    /// Build a handle whose components serve this fixture's bytes.
    pub fn handle(&self) -> SstableHandle {
        SstableHandle {
            keyspace: self.keyspace.clone(),
            table: self.table.clone(),
            name: self.name.clone(),
            repaired_at: self.repaired_at,
            components: SstableComponents {
                summary: Arc::new(InMemorySupplier::new(self.summary.clone())),
                index: Arc::new(InMemorySupplier::new(self.index.clone())),
                filter: Some(Arc::new(InMemorySupplier::new(self.filter.clone()))),
                compression: self
                    .compression
                    .as_ref()
                    .map(|bytes| -> Arc<dyn ByteSupplier> {
                        Arc::new(InMemorySupplier::new(bytes.clone()))
                    }),
                data: Arc::new(InMemorySupplier::new(self.data.clone())),
            },
        }
    }
}

/// Builder for commit-log segment bytes.
pub struct SegmentBuilder {
    buf: Vec<u8>,
}

impl SegmentBuilder {
    /// Start a segment with a valid header.
    pub fn new(segment_id: u64) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&segment_id.to_le_bytes());
        Self { buf }
    }

    /// Append a framed mutation with a valid checksum.
    pub fn mutation(mut self, mutation: &DecodedMutation) -> Self {
        let payload = encode_mutation(mutation);
        self.frame(&payload, crc32fast::hash(&payload));
        self
    }

    /// Append a framed mutation whose checksum does not match.
    pub fn corrupt_mutation(mut self, mutation: &DecodedMutation) -> Self {
        let payload = encode_mutation(mutation);
        self.frame(&payload, crc32fast::hash(&payload) ^ 0xFFFF_FFFF);
        self
    }

    /// Append raw bytes verbatim.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Finish the segment.
    pub fn build(self) -> Bytes {
        self.buf.into()
    }

    /// On-disk length of one framed mutation.
    pub fn frame_len(mutation: &DecodedMutation) -> u64 {
        8 + encode_mutation(mutation).len() as u64
    }

    fn frame(&mut self, payload: &[u8], crc: u32) {
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&crc.to_le_bytes());
        self.buf.extend_from_slice(payload);
    }
}
