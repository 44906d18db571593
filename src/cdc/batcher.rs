//! The micro-batch collection loop.
//!
//! Each batch polls every replica's commit-log feed concurrently, bounded by
//! a wall-clock budget, then folds whatever arrived into the aggregator on
//! the calling task. A replica that fails or runs past the budget costs its
//! copies, not the batch: the copy threshold decides correctness.

use std::{sync::Arc, time::Instant};

use futures_util::{stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    commitlog::{CommitLogError, CommitLogReader},
    events::{Event, Reporter},
    mutation::MutationRecord,
    observability::{log_info, log_warn},
    option::ReadOptions,
    streaming::{ByteSupplier, QueueConfig, StreamingQueue},
};

use super::{BatchOutcome, CdcAggregator};

/// One segment with unread data and where the previous batch left off.
pub struct SegmentSlice {
    /// Byte supplier for the whole segment file.
    pub supplier: Arc<dyn ByteSupplier>,
    /// Absolute offset the previous pass reached; zero for a fresh segment.
    pub start_offset: u64,
}

/// One replica's commit-log feed.
#[async_trait::async_trait]
pub trait SegmentFeed: Send + Sync {
    /// Host identity records from this feed are attributed to.
    fn host(&self) -> &str;

    /// Segments that may hold unread frames, oldest first.
    async fn poll_segments(&self) -> Result<Vec<SegmentSlice>, CommitLogError>;
}

/// Drives repeated micro-batches over a fixed set of replica feeds.
pub struct MicroBatcher {
    reader: Arc<CommitLogReader>,
    aggregator: CdcAggregator,
    feeds: Vec<Arc<dyn SegmentFeed>>,
    options: ReadOptions,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
    batch_id: u64,
}

impl MicroBatcher {
    /// Build a batcher over `feeds`.
    pub fn new(
        reader: Arc<CommitLogReader>,
        aggregator: CdcAggregator,
        feeds: Vec<Arc<dyn SegmentFeed>>,
        options: ReadOptions,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            aggregator,
            feeds,
            options,
            reporter,
            cancel,
            batch_id: 0,
        }
    }

    /// Groups currently waiting for more replica copies.
    pub fn pending_len(&self) -> usize {
        self.aggregator.pending_len()
    }

    /// Collect one micro-batch from all feeds and aggregate it.
    pub async fn run_batch(&mut self) -> BatchOutcome {
        self.batch_id += 1;
        let started = Instant::now();
        let config = QueueConfig {
            chunk_len: self.options.queue_chunk_len(),
            capacity: self.options.queue_capacity(),
        };

        let mut collections: FuturesUnordered<_> = self
            .feeds
            .iter()
            .map(|feed| collect_feed(feed, &self.reader, config, &self.reporter, &self.cancel))
            .collect();

        let deadline = tokio::time::sleep(self.options.batch_read_timeout());
        tokio::pin!(deadline);
        let mut mutations = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    log_warn!(
                        component = "cdc",
                        event = "batch_timeout",
                        batch_id = self.batch_id,
                    );
                    break;
                }
                _ = self.cancel.cancelled() => break,
                next = collections.next() => match next {
                    Some(collected) => mutations.extend(collected),
                    None => break,
                },
            }
        }
        drop(collections);

        self.reporter.report(Event::BatchRead {
            mutations: mutations.len(),
            nanos: started.elapsed().as_nanos() as u64,
        });
        let outcome = self.aggregator.aggregate(self.batch_id, mutations);
        log_info!(
            component = "cdc",
            event = "batch_complete",
            batch_id = self.batch_id,
            published = outcome.published.len(),
            pending = outcome.insufficient,
        );
        outcome
    }
}

/// Read every slice one feed currently offers. Failures cost this feed's
/// copies only.
async fn collect_feed(
    feed: &Arc<dyn SegmentFeed>,
    reader: &Arc<CommitLogReader>,
    config: QueueConfig,
    reporter: &Arc<dyn Reporter>,
    cancel: &CancellationToken,
) -> Vec<MutationRecord> {
    let slices = match feed.poll_segments().await {
        Ok(slices) => slices,
        Err(err) => {
            log_warn!(
                component = "cdc",
                event = "feed_poll_failed",
                host = feed.host(),
                error = %err,
            );
            return Vec::new();
        }
    };

    let mut mutations = Vec::new();
    for slice in slices {
        let size = match slice.supplier.size().await {
            Ok(size) => size,
            Err(err) => {
                log_warn!(
                    component = "cdc",
                    event = "segment_size_failed",
                    host = feed.host(),
                    error = %err,
                );
                continue;
            }
        };
        let mut segment_reader = StreamingQueue::open(
            Arc::clone(&slice.supplier),
            0..size,
            config,
            Arc::clone(reporter),
            cancel.clone(),
        );
        match reader
            .read_segment(feed.host(), &mut segment_reader, slice.start_offset)
            .await
        {
            Ok(outcome) => mutations.extend(outcome.mutations),
            Err(err) => {
                log_warn!(
                    component = "cdc",
                    event = "segment_read_failed",
                    host = feed.host(),
                    error = %err,
                );
            }
        }
        segment_reader.finish();
    }
    mutations
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio_util::sync::CancellationToken;

    use super::{MicroBatcher, SegmentFeed, SegmentSlice};
    use crate::{
        cdc::{CdcAggregator, Watermarker},
        codec::{v1::V1Codec, DecodedMutation},
        commitlog::{CommitLogError, CommitLogReader},
        mutation::TableId,
        option::ReadOptions,
        replica::ConsistencyLevel,
        test_util::{CollectingReporter, InMemorySupplier, SegmentBuilder},
    };

    const TABLE: TableId = TableId(7);

    struct FixedFeed {
        host: String,
        segment: bytes::Bytes,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SegmentFeed for FixedFeed {
        fn host(&self) -> &str {
            &self.host
        }

        async fn poll_segments(&self) -> Result<Vec<SegmentSlice>, CommitLogError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![SegmentSlice {
                supplier: Arc::new(InMemorySupplier::new(self.segment.clone())),
                start_offset: 0,
            }])
        }
    }

    fn mutation(token: i128, timestamp: i64) -> DecodedMutation {
        DecodedMutation {
            table_id: TABLE,
            token,
            max_timestamp_micros: timestamp,
            payload: bytes::Bytes::from_static(b"update"),
        }
    }

    fn feed(host: &str, delay: Duration, mutations: &[DecodedMutation]) -> Arc<dyn SegmentFeed> {
        let mut builder = SegmentBuilder::new(1);
        for m in mutations {
            builder = builder.mutation(m);
        }
        Arc::new(FixedFeed {
            host: host.to_string(),
            segment: builder.build(),
            delay,
        })
    }

    fn batcher(
        feeds: Vec<Arc<dyn SegmentFeed>>,
        min_copies: usize,
        timeout: Duration,
    ) -> MicroBatcher {
        let reporter = Arc::new(CollectingReporter::default());
        let reader = Arc::new(CommitLogReader::new(
            Arc::new(V1Codec),
            [TABLE],
            None,
            1 << 20,
            reporter.clone(),
        ));
        let aggregator = CdcAggregator::new(
            min_copies,
            Arc::new(Watermarker::new()),
            reporter.clone(),
        );
        MicroBatcher::new(
            reader,
            aggregator,
            feeds,
            ReadOptions::new(ConsistencyLevel::Quorum).with_batch_read_timeout(timeout),
            reporter,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn publishes_when_enough_replicas_report() {
        let m = mutation(10, 100);
        let feeds = vec![
            feed("a", Duration::ZERO, std::slice::from_ref(&m)),
            feed("b", Duration::ZERO, std::slice::from_ref(&m)),
            feed("c", Duration::ZERO, &[]),
        ];
        let mut batcher = batcher(feeds, 2, Duration::from_secs(5));

        let outcome = batcher.run_batch().await;
        assert_eq!(outcome.published.len(), 1);
        assert!(!outcome.published[0].late);
        assert_eq!(outcome.insufficient, 0);
    }

    #[tokio::test]
    async fn slow_replica_costs_its_copies_not_the_batch() {
        let m = mutation(10, 100);
        let feeds = vec![
            feed("a", Duration::ZERO, std::slice::from_ref(&m)),
            feed("b", Duration::from_secs(60), std::slice::from_ref(&m)),
        ];
        let mut batcher = batcher(feeds, 2, Duration::from_millis(100));

        let first = batcher.run_batch().await;
        assert!(first.published.is_empty());
        assert_eq!(first.insufficient, 1);
        assert_eq!(batcher.pending_len(), 1);
    }

    #[tokio::test]
    async fn late_copy_publishes_in_a_later_batch() {
        let m = mutation(10, 100);
        let only_a = vec![feed("a", Duration::ZERO, std::slice::from_ref(&m))];
        let mut batcher = batcher(only_a, 2, Duration::from_secs(5));
        let first = batcher.run_batch().await;
        assert!(first.published.is_empty());

        batcher.feeds = vec![feed("b", Duration::ZERO, std::slice::from_ref(&m))];
        let second = batcher.run_batch().await;
        assert_eq!(second.published.len(), 1);
        assert!(second.published[0].late);
    }
}
