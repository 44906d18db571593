//! Sequential reader over one fragment's selected partitions.
//!
//! `open` walks the component files cheapest-first (summary, bloom filter,
//! index, compression info) and either rejects the whole fragment with a
//! distinct skip reason or produces a reader whose data-file request covers
//! only the selected byte window. Bytes before the first selected partition
//! and after the last are never requested from the supplier.

use std::{sync::Arc, time::Instant};

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use super::{
    CompressionInfo, FileKind, IndexEntry, SstableHandle, Summary, TableError,
};
use crate::{
    codec::{CodecError, TableCodec},
    events::{Event, PartitionSkipReason, Reporter, SstableSkipReason},
    filter::{FilterSet, PartitionKeyFilter},
    observability::{log_debug, log_info},
    replica::ReplicaRole,
    streaming::{ByteSupplier, QueueConfig, SourceError, StreamingQueue, StreamingReader},
    token::Token,
};

/// Result of attempting to open a fragment.
pub enum OpenOutcome {
    /// The fragment cannot contain anything of interest.
    Skipped(SstableSkipReason),
    /// The fragment holds selected partitions and is ready to stream.
    Opened(TableFileReader),
}

/// One decoded partition, tagged with the provenance the merge layer needs.
#[derive(Clone, Debug)]
pub struct Partition {
    /// Raw partition key bytes.
    pub key: Bytes,
    /// Ring token of the key.
    pub token: Token,
    /// Serialized partition payload.
    pub payload: Bytes,
    /// Whether the source fragment was repaired.
    pub repaired: bool,
    /// Whether the source replica served as a primary.
    pub primary: bool,
}

enum DataError {
    Source(SourceError),
    Codec(CodecError),
}

impl From<SourceError> for DataError {
    fn from(err: SourceError) -> Self {
        DataError::Source(err)
    }
}

impl From<CodecError> for DataError {
    fn from(err: CodecError) -> Self {
        DataError::Codec(err)
    }
}

/// Streaming reader over a fragment's selected partitions.
pub struct TableFileReader {
    handle: SstableHandle,
    selected: Vec<IndexEntry>,
    data: DataStream,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
    repaired: bool,
    primary: bool,
    opened_at: Instant,
}

impl std::fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenOutcome::Skipped(reason) => f.debug_tuple("Skipped").field(reason).finish(),
            OpenOutcome::Opened(reader) => f.debug_tuple("Opened").field(reader).finish(),
        }
    }
}

impl std::fmt::Debug for TableFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFileReader")
            .field("handle", &self.handle)
            .field("selected", &self.selected.len())
            .field("repaired", &self.repaired)
            .field("primary", &self.primary)
            .finish()
    }
}

impl TableFileReader {
    /// Open `handle` against `filters`, short-circuiting with a skip reason
    /// as soon as any component proves the fragment irrelevant.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        handle: SstableHandle,
        filters: &FilterSet,
        codec: Arc<dyn TableCodec>,
        config: QueueConfig,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
        role: ReplicaRole,
        repair_authority: bool,
    ) -> Result<OpenOutcome, TableError> {
        let opened_at = Instant::now();

        let summary = read_summary(&handle, &codec, config, &reporter, &cancel).await?;
        let (first, last) = summary.span();
        if !filters.overlaps_span(first, last) {
            return Ok(skip(&handle, &reporter, SstableSkipReason::RangeMismatch, first, last));
        }
        if handle.repaired_at.is_some() && !repair_authority {
            return Ok(skip(&handle, &reporter, SstableSkipReason::Repaired, first, last));
        }

        // Bloom pass: rule keys out before a single index byte is read.
        let key_filters =
            match bloom_pass(&handle, filters, &codec, config, &reporter, &cancel).await? {
                Some(surviving) => surviving,
                None => {
                    return Ok(skip(
                        &handle,
                        &reporter,
                        SstableSkipReason::MissingInFilter,
                        first,
                        last,
                    ));
                }
            };

        let selected = match select_entries(
            &handle, filters, &key_filters, &codec, config, &reporter, &cancel,
        )
        .await?
        {
            Some(selected) => selected,
            None => {
                let reason = if key_filters.is_empty() {
                    SstableSkipReason::RangeMismatch
                } else {
                    SstableSkipReason::MissingInIndex
                };
                return Ok(skip(&handle, &reporter, reason, first, last));
            }
        };

        let compression = match &handle.components.compression {
            Some(supplier) => {
                let started = Instant::now();
                let bytes = read_component(supplier, config, &reporter, &cancel).await?;
                let info = codec
                    .decode_compression_info(&bytes)
                    .map_err(|err| component_corrupt(&handle, &reporter, FileKind::CompressionInfo, err))?;
                reporter.report(Event::CompressionInfoRead {
                    nanos: started.elapsed().as_nanos() as u64,
                });
                Some(info)
            }
            None => None,
        };

        let data = open_data_stream(
            &handle,
            &selected,
            compression,
            Arc::clone(&codec),
            config,
            Arc::clone(&reporter),
            cancel.clone(),
        )
        .await?;

        reporter.report(Event::SstableOpened {
            nanos: opened_at.elapsed().as_nanos() as u64,
        });
        log_info!(
            component = "sstable",
            event = "sstable_opened",
            keyspace = %handle.keyspace,
            table = %handle.table,
            name = %handle.name,
            partitions = selected.len(),
        );
        let repaired = handle.repaired_at.is_some();
        Ok(OpenOutcome::Opened(TableFileReader {
            handle,
            selected,
            data,
            reporter,
            cancel,
            repaired,
            primary: role == ReplicaRole::Primary,
            opened_at,
        }))
    }

    /// Number of partitions this reader will emit.
    pub fn partition_count(&self) -> usize {
        self.selected.len()
    }

    /// Stream the selected partitions in index order.
    pub fn into_stream(self) -> impl Stream<Item = Result<Partition, TableError>> + Send {
        let TableFileReader {
            handle,
            selected,
            mut data,
            reporter,
            cancel,
            repaired,
            primary,
            opened_at,
        } = self;
        try_stream! {
            let mut last_emit = Instant::now();
            for entry in selected {
                data.skip_to(entry.offset)
                    .await
                    .map_err(|err| data_error(&handle, &cancel, &reporter, err))?;
                let payload = data
                    .read_exact(entry.size as usize)
                    .await
                    .map_err(|err| data_error(&handle, &cancel, &reporter, err))?;
                reporter.report(Event::PartitionRead {
                    nanos: last_emit.elapsed().as_nanos() as u64,
                });
                last_emit = Instant::now();
                yield Partition {
                    key: entry.key,
                    token: entry.token,
                    payload,
                    repaired,
                    primary,
                };
            }
            data.finish();
            reporter.report(Event::SstableClosed {
                open_nanos: opened_at.elapsed().as_nanos() as u64,
            });
        }
    }
}

fn skip(
    handle: &SstableHandle,
    reporter: &Arc<dyn Reporter>,
    reason: SstableSkipReason,
    first: Token,
    last: Token,
) -> OpenOutcome {
    reporter.report(Event::SstableSkipped { reason, first, last });
    log_debug!(
        component = "sstable",
        event = "sstable_skipped",
        name = %handle.name,
        reason = ?reason,
    );
    OpenOutcome::Skipped(reason)
}

fn component_corrupt(
    handle: &SstableHandle,
    reporter: &Arc<dyn Reporter>,
    file: FileKind,
    err: CodecError,
) -> TableError {
    reporter.report(Event::SstableCorrupt {
        keyspace: handle.keyspace.clone(),
        table: handle.table.clone(),
        file: file.to_string(),
    });
    handle.corrupt(file, err)
}

fn data_error(
    handle: &SstableHandle,
    cancel: &CancellationToken,
    reporter: &Arc<dyn Reporter>,
    err: DataError,
) -> TableError {
    match err {
        DataError::Source(SourceError::UnexpectedEof { .. }) if cancel.is_cancelled() => {
            TableError::Source(SourceError::Cancelled)
        }
        DataError::Source(SourceError::UnexpectedEof { .. }) => component_corrupt(
            handle,
            reporter,
            FileKind::Data,
            CodecError::Corrupt("data file ended before the last selected partition"),
        ),
        DataError::Source(err) => TableError::Source(err),
        DataError::Codec(err) => component_corrupt(handle, reporter, FileKind::Data, err),
    }
}

/// Buffer one whole component file through the bounded queue.
async fn read_component(
    supplier: &Arc<dyn ByteSupplier>,
    config: QueueConfig,
    reporter: &Arc<dyn Reporter>,
    cancel: &CancellationToken,
) -> Result<Bytes, SourceError> {
    let size = supplier.size().await?;
    let mut reader = StreamingQueue::open(
        Arc::clone(supplier),
        0..size,
        config,
        Arc::clone(reporter),
        cancel.clone(),
    );
    let bytes = reader.read_to_end().await?;
    reader.finish();
    Ok(bytes)
}

async fn read_summary(
    handle: &SstableHandle,
    codec: &Arc<dyn TableCodec>,
    config: QueueConfig,
    reporter: &Arc<dyn Reporter>,
    cancel: &CancellationToken,
) -> Result<Summary, TableError> {
    let started = Instant::now();
    let bytes = read_component(&handle.components.summary, config, reporter, cancel).await?;
    let summary = codec
        .decode_summary(&bytes)
        .map_err(|err| component_corrupt(handle, reporter, FileKind::Summary, err))?;
    reporter.report(Event::SummaryRead {
        nanos: started.elapsed().as_nanos() as u64,
    });
    Ok(summary)
}

/// Run the requested keys through the bloom filter, if both exist.
///
/// Returns the key filters that survive, or `None` when every requested key
/// is provably absent.
async fn bloom_pass(
    handle: &SstableHandle,
    filters: &FilterSet,
    codec: &Arc<dyn TableCodec>,
    config: QueueConfig,
    reporter: &Arc<dyn Reporter>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<PartitionKeyFilter>>, TableError> {
    let keys = filters.key_filters();
    let supplier = match (&handle.components.filter, keys.is_empty()) {
        (Some(supplier), false) => supplier,
        _ => return Ok(Some(keys.to_vec())),
    };

    let bytes = read_component(supplier, config, reporter, cancel).await?;
    let bloom = codec
        .decode_filter(&bytes)
        .map_err(|err| component_corrupt(handle, reporter, FileKind::Filter, err))?;

    let mut surviving = Vec::with_capacity(keys.len());
    for filter in keys {
        if bloom.might_contain(filter.key()) {
            surviving.push(filter.clone());
        } else {
            reporter.report(Event::PartitionSkipped {
                reason: PartitionSkipReason::MissingInFilter,
                token: filter.token(),
            });
        }
    }
    if surviving.is_empty() {
        return Ok(None);
    }
    Ok(Some(surviving))
}

/// Decode the index one entry at a time and keep the entries that pass the
/// full filter conjunction.
///
/// Returns `None` when nothing was selected; the caller distinguishes an
/// empty range selection from key filters that passed the bloom filter but
/// never appeared in the index.
#[allow(clippy::too_many_arguments)]
async fn select_entries(
    handle: &SstableHandle,
    filters: &FilterSet,
    key_filters: &[PartitionKeyFilter],
    codec: &Arc<dyn TableCodec>,
    config: QueueConfig,
    reporter: &Arc<dyn Reporter>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<IndexEntry>>, TableError> {
    let started = Instant::now();
    let bytes = read_component(&handle.components.index, config, reporter, cancel).await?;
    let mut remaining = &bytes[..];
    let mut selected = Vec::new();
    let mut matched = vec![false; key_filters.len()];

    while let Some((entry, consumed)) = codec
        .decode_index_entry(remaining)
        .map_err(|err| component_corrupt(handle, reporter, FileKind::Index, err))?
    {
        remaining = &remaining[consumed..];
        if !filters.in_range(entry.token) {
            reporter.report(Event::PartitionSkipped {
                reason: PartitionSkipReason::OutOfRange,
                token: entry.token,
            });
            continue;
        }
        if !key_filters.is_empty() {
            let hit = key_filters
                .iter()
                .position(|filter| filter.matches(&entry.key));
            match hit {
                Some(i) => matched[i] = true,
                // Not a requested key; no event, the index is expected to
                // hold mostly unrequested partitions.
                None => continue,
            }
        }
        selected.push(entry);
    }

    for (filter, matched) in key_filters.iter().zip(&matched) {
        if !matched {
            reporter.report(Event::PartitionSkipped {
                reason: PartitionSkipReason::MissingInIndex,
                token: filter.token(),
            });
        }
    }
    reporter.report(Event::IndexRead {
        nanos: started.elapsed().as_nanos() as u64,
    });

    if selected.is_empty() {
        return Ok(None);
    }
    selected.sort_by_key(|entry| entry.offset);
    Ok(Some(selected))
}

/// Open the data file over exactly the byte window the selection needs.
async fn open_data_stream(
    handle: &SstableHandle,
    selected: &[IndexEntry],
    compression: Option<CompressionInfo>,
    codec: Arc<dyn TableCodec>,
    config: QueueConfig,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) -> Result<DataStream, TableError> {
    // `selected` is non-empty and offset-sorted by construction.
    let start = selected[0].offset;
    let end = selected[selected.len() - 1].end();
    let supplier = &handle.components.data;
    let file_len = supplier.size().await?;

    let stream = match compression {
        None => {
            report_window_skips(&reporter, start, file_len.saturating_sub(end));
            let reader = StreamingQueue::open(
                Arc::clone(supplier),
                start..end.min(file_len),
                config,
                Arc::clone(&reporter),
                cancel,
            );
            DataStream::Plain { reader }
        }
        Some(info) => {
            if end > info.data_len || info.chunks.is_empty() {
                return Err(component_corrupt(
                    handle,
                    &reporter,
                    FileKind::CompressionInfo,
                    CodecError::Corrupt("chunk layout shorter than the indexed data"),
                ));
            }
            let first_chunk = info.chunk_index_for(start);
            let last_chunk = info.chunk_index_for(end - 1);
            if last_chunk >= info.chunks.len() {
                return Err(component_corrupt(
                    handle,
                    &reporter,
                    FileKind::CompressionInfo,
                    CodecError::Corrupt("chunk layout shorter than the indexed data"),
                ));
            }
            let window_start = info.chunks[first_chunk].offset;
            let window_end =
                info.chunks[last_chunk].offset + u64::from(info.chunks[last_chunk].len);
            report_window_skips(&reporter, window_start, file_len.saturating_sub(window_end));
            let reader = StreamingQueue::open(
                Arc::clone(supplier),
                window_start..window_end.min(file_len),
                config,
                Arc::clone(&reporter),
                cancel,
            );
            DataStream::Compressed {
                reader,
                info,
                codec,
                reporter,
                next_chunk: first_chunk,
                buffered: Bytes::new(),
                pos: start,
            }
        }
    };
    Ok(stream)
}

fn report_window_skips(reporter: &Arc<dyn Reporter>, leading: u64, trailing: u64) {
    if leading > 0 {
        reporter.report(Event::DataStartSkipped { bytes: leading });
    }
    if trailing > 0 {
        reporter.report(Event::DataEndSkipped { bytes: trailing });
    }
}

/// Data-file byte stream addressed in uncompressed coordinates.
///
/// The plain variant is the queue reader itself; the compressed variant
/// fetches whole chunks, expands them through the codec, and serves reads
/// from the expanded buffer.
enum DataStream {
    Plain {
        reader: StreamingReader,
    },
    Compressed {
        reader: StreamingReader,
        info: CompressionInfo,
        codec: Arc<dyn TableCodec>,
        reporter: Arc<dyn Reporter>,
        next_chunk: usize,
        buffered: Bytes,
        pos: u64,
    },
}

impl DataStream {
    /// Advance to uncompressed position `target`, never moving backwards.
    async fn skip_to(&mut self, target: u64) -> Result<(), DataError> {
        match self {
            DataStream::Plain { reader } => {
                let ahead = target.saturating_sub(reader.position());
                if ahead > 0 {
                    reader.skip(ahead).await?;
                }
                Ok(())
            }
            DataStream::Compressed {
                reader,
                info,
                next_chunk,
                buffered,
                pos,
                ..
            } => {
                if target <= *pos {
                    return Ok(());
                }
                let in_buffer = buffered.len() as u64;
                if target - *pos <= in_buffer {
                    let _ = buffered.split_to((target - *pos) as usize);
                    *pos = target;
                    return Ok(());
                }
                *buffered = Bytes::new();
                let idx = info.chunk_index_for(target).max(*next_chunk);
                let chunk_offset = info.chunks[idx].offset;
                let ahead = chunk_offset.saturating_sub(reader.position());
                if ahead > 0 {
                    reader.skip(ahead).await?;
                }
                *next_chunk = idx;
                *pos = target;
                Ok(())
            }
        }
    }

    /// Read exactly `n` uncompressed bytes from the current position.
    async fn read_exact(&mut self, n: usize) -> Result<Bytes, DataError> {
        if let DataStream::Plain { reader } = self {
            return Ok(reader.read_exact(n).await?);
        }
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            if let DataStream::Compressed { buffered, pos, .. } = self {
                if !buffered.is_empty() {
                    let take = (n - out.len()).min(buffered.len());
                    out.extend_from_slice(&buffered.split_to(take));
                    *pos += take as u64;
                    continue;
                }
            }
            self.load_next_chunk().await?;
        }
        Ok(out.freeze())
    }

    /// Fetch, expand, and front-trim the next chunk so `buffered` starts at
    /// `pos`.
    async fn load_next_chunk(&mut self) -> Result<(), DataError> {
        let DataStream::Compressed {
            reader,
            info,
            codec,
            reporter,
            next_chunk,
            buffered,
            pos,
        } = self
        else {
            unreachable!()
        };
        if *next_chunk >= info.chunks.len() {
            return Err(DataError::Source(SourceError::UnexpectedEof {
                offset: reader.position(),
            }));
        }
        let idx = *next_chunk;
        let spec = info.chunks[idx];
        let compressed = reader.read_exact(spec.len as usize).await?;
        let raw_len = info.raw_chunk_len(idx) as usize;
        let raw = codec.decompress_chunk(&compressed, raw_len)?;
        reporter.report(Event::DecompressedBytes {
            compressed: compressed.len(),
            raw: raw.len(),
        });
        let trim = (*pos - info.chunk_start(idx)) as usize;
        *buffered = raw.slice(trim..);
        *next_chunk = idx + 1;
        Ok(())
    }

    fn finish(self) {
        match self {
            DataStream::Plain { reader } => reader.finish(),
            DataStream::Compressed { reader, .. } => reader.finish(),
        }
    }
}
