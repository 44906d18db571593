//! Cross-replica grouping and the publish threshold.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    events::{Event, MutationDropReason, Reporter},
    mutation::{MutationKey, MutationRecord},
    observability::log_debug,
};

use super::Watermarker;

/// A mutation that met the copy threshold.
#[derive(Clone, Debug)]
pub struct PublishedMutation {
    /// The record, as read from the first replica that reported it.
    pub record: MutationRecord,
    /// Whether the threshold was met in a later batch than the one that
    /// first saw the mutation.
    pub late: bool,
}

/// What one micro-batch produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Mutations published this batch, in first-seen order.
    pub published: Vec<PublishedMutation>,
    /// Groups still below the copy threshold when the batch closed.
    pub insufficient: usize,
}

struct PendingGroup {
    record: MutationRecord,
    origins: HashSet<String>,
    first_batch: u64,
    arrival: u64,
}

/// Groups mutation records by content identity and publishes each group once
/// `min_copies` distinct replicas have reported it.
///
/// Groups that miss the threshold stay pending across batches; the record
/// publishes late once the remaining copies arrive, or drops once the
/// table's watermark passes it.
pub struct CdcAggregator {
    min_copies: usize,
    watermarker: Arc<Watermarker>,
    pending: HashMap<MutationKey, PendingGroup>,
    reporter: Arc<dyn Reporter>,
    arrivals: u64,
}

impl CdcAggregator {
    /// Build an aggregator publishing at `min_copies` distinct replicas.
    pub fn new(
        min_copies: usize,
        watermarker: Arc<Watermarker>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            min_copies: min_copies.max(1),
            watermarker,
            pending: HashMap::new(),
            reporter,
            arrivals: 0,
        }
    }

    /// Groups currently below the copy threshold.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fold one batch of records in and close the batch.
    pub fn aggregate(
        &mut self,
        batch_id: u64,
        mutations: Vec<MutationRecord>,
    ) -> BatchOutcome {
        let mut ready = Vec::new();
        for record in mutations {
            if self
                .watermarker
                .is_stale(record.table_id, record.max_timestamp_micros)
            {
                self.reporter.report(Event::MutationDropped {
                    reason: MutationDropReason::Stale,
                });
                continue;
            }
            let key = record.group_key();
            let origin = record.origin.clone();
            self.arrivals += 1;
            let arrivals = self.arrivals;
            let group = self.pending.entry(key).or_insert_with(|| PendingGroup {
                record,
                origins: HashSet::new(),
                first_batch: batch_id,
                arrival: arrivals,
            });
            group.origins.insert(origin);
            if group.origins.len() >= self.min_copies && !ready.contains(&key) {
                ready.push(key);
            }
        }

        let mut published = Vec::new();
        for key in ready {
            let Some(group) = self.pending.remove(&key) else {
                continue;
            };
            let late = group.first_batch < batch_id;
            self.watermarker.advance(
                group.record.table_id,
                group.record.max_timestamp_micros,
                self.reporter.as_ref(),
            );
            self.reporter.report(Event::MutationPublished { late });
            published.push((group.arrival, PublishedMutation {
                record: group.record,
                late,
            }));
        }
        published.sort_by_key(|(arrival, _)| *arrival);

        self.sweep_stale();
        for group in self.pending.values() {
            self.reporter.report(Event::InsufficientCopies {
                copies: group.origins.len(),
                required: self.min_copies,
            });
        }
        log_debug!(
            component = "cdc",
            event = "batch_aggregated",
            batch_id,
            published = published.len(),
            pending = self.pending.len(),
        );
        BatchOutcome {
            published: published.into_iter().map(|(_, p)| p).collect(),
            insufficient: self.pending.len(),
        }
    }

    /// Drop pending groups the watermark has passed; a replica that
    /// redelivers a published mutation must not resurrect it.
    fn sweep_stale(&mut self) {
        let stale: Vec<MutationKey> = self
            .pending
            .iter()
            .filter(|(key, _)| {
                self.watermarker
                    .is_stale(key.table_id, key.max_timestamp_micros)
            })
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            self.pending.remove(&key);
            self.reporter.report(Event::MutationDropped {
                reason: MutationDropReason::Stale,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::CdcAggregator;
    use crate::{
        cdc::Watermarker,
        events::{Event, MutationDropReason},
        mutation::{MutationRecord, TableId},
        test_util::CollectingReporter,
    };

    const TABLE: TableId = TableId(7);

    fn record(token: i128, timestamp: i64, origin: &str) -> MutationRecord {
        MutationRecord {
            table_id: TABLE,
            token,
            max_timestamp_micros: timestamp,
            digest: (token as u64) ^ (timestamp as u64),
            payload: Bytes::from_static(b"update"),
            origin: origin.to_string(),
        }
    }

    fn aggregator(min_copies: usize) -> (CdcAggregator, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let agg = CdcAggregator::new(min_copies, Arc::new(Watermarker::new()), reporter.clone());
        (agg, reporter)
    }

    #[tokio::test]
    async fn publishes_at_the_copy_threshold() {
        let (mut agg, reporter) = aggregator(2);

        let one_copy = agg.aggregate(1, vec![record(10, 100, "a")]);
        assert!(one_copy.published.is_empty());
        assert_eq!(one_copy.insufficient, 1);
        assert!(reporter.has(
            |e| matches!(e, Event::InsufficientCopies { copies: 1, required: 2 })
        ));

        let second_copy = agg.aggregate(2, vec![record(10, 100, "b")]);
        assert_eq!(second_copy.published.len(), 1);
        assert!(second_copy.published[0].late);
        assert_eq!(agg.pending_len(), 0);
    }

    #[tokio::test]
    async fn same_batch_quorum_publishes_on_time() {
        let (mut agg, _) = aggregator(2);
        let outcome = agg.aggregate(1, vec![record(10, 100, "a"), record(10, 100, "b")]);
        assert_eq!(outcome.published.len(), 1);
        assert!(!outcome.published[0].late);
    }

    #[tokio::test]
    async fn duplicate_copies_from_one_replica_do_not_count_twice() {
        let (mut agg, _) = aggregator(2);
        let outcome = agg.aggregate(1, vec![record(10, 100, "a"), record(10, 100, "a")]);
        assert!(outcome.published.is_empty());
        assert_eq!(outcome.insufficient, 1);
    }

    #[tokio::test]
    async fn redelivery_after_publish_is_stale() {
        let (mut agg, reporter) = aggregator(1);
        let first = agg.aggregate(1, vec![record(10, 100, "a")]);
        assert_eq!(first.published.len(), 1);

        let redelivered = agg.aggregate(2, vec![record(10, 100, "b")]);
        assert!(redelivered.published.is_empty());
        assert_eq!(redelivered.insufficient, 0);
        assert!(reporter.has(|e| matches!(
            e,
            Event::MutationDropped {
                reason: MutationDropReason::Stale
            }
        )));
    }

    #[tokio::test]
    async fn watermark_sweep_clears_passed_pending_groups() {
        let (mut agg, _) = aggregator(2);
        // An old under-replicated mutation, then a newer fully-replicated one
        // on the same table.
        let _ = agg.aggregate(1, vec![record(10, 50, "a")]);
        assert_eq!(agg.pending_len(), 1);
        let outcome = agg.aggregate(2, vec![record(20, 100, "a"), record(20, 100, "b")]);
        assert_eq!(outcome.published.len(), 1);
        // The old group is now below the floor and gone.
        assert_eq!(agg.pending_len(), 0);
    }

    #[tokio::test]
    async fn distinct_mutations_publish_in_arrival_order() {
        let (mut agg, _) = aggregator(1);
        let outcome = agg.aggregate(
            1,
            vec![record(30, 100, "a"), record(10, 101, "a"), record(20, 102, "a")],
        );
        let tokens: Vec<_> = outcome.published.iter().map(|p| p.record.token).collect();
        assert_eq!(tokens, vec![30, 10, 20]);
    }
}
