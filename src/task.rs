//! Orchestration of one streaming read task.
//!
//! A task owns the policy pieces (options, codec, reporter, cancellation)
//! and turns a replica candidate list plus a filter set into a running
//! [`CompactionScanner`]. The first primary replica is the repair authority
//! for the range: it alone serves repaired fragments, so each repaired
//! partition enters the merge exactly once. A primary that fails to open is
//! replaced by a backup, which inherits the authority flag; corrupt
//! fragments cost only themselves.

use std::{collections::VecDeque, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    codec::TableCodec,
    error::ReadError,
    events::{Event, Reporter},
    filter::FilterSet,
    merge::{CompactionScanner, PartitionStream},
    observability::{log_info, log_warn},
    option::ReadOptions,
    replica::{Replica, ReplicaRole, ReplicaSelector},
    sstable::{OpenOutcome, TableError, TableFileReader},
    streaming::QueueConfig,
    token::TokenRange,
};

/// One configured streaming read over a token range.
pub struct ReadTask {
    options: ReadOptions,
    codec: Arc<dyn TableCodec>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl ReadTask {
    /// Build a task from its policy pieces.
    pub fn new(
        options: ReadOptions,
        codec: Arc<dyn TableCodec>,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            codec,
            reporter,
            cancel,
        }
    }

    /// Select replicas for `filters`' token range from `candidates`, open
    /// every relevant fragment, and assemble the merge scanner.
    ///
    /// `replication_factor` is the ring's ownership count for the range,
    /// which may exceed the candidates that responded.
    pub async fn open(
        &self,
        filters: &FilterSet,
        candidates: Vec<Replica>,
        replication_factor: usize,
    ) -> Result<CompactionScanner, ReadError> {
        let range = filters
            .range()
            .map(|f| f.range())
            .unwrap_or_else(TokenRange::full);
        let selector = ReplicaSelector::new(self.options.consistency(), Arc::clone(&self.reporter));
        let set = selector.select(range, candidates, replication_factor)?;
        let required = set.primaries.len();
        let mut backups: VecDeque<Replica> = set.backups.into();

        let mut streams: Vec<PartitionStream> = Vec::new();
        let mut opened = 0usize;
        for (i, primary) in set.primaries.into_iter().enumerate() {
            // Exactly one replica serves repaired fragments for the range.
            let repair_authority = i == 0;
            let mut replica = primary;
            loop {
                match self
                    .open_replica(&replica, filters, ReplicaRole::Primary, repair_authority)
                    .await
                {
                    Ok(mut replica_streams) => {
                        streams.append(&mut replica_streams);
                        opened += 1;
                        break;
                    }
                    Err(err) => {
                        self.reporter.report(Event::ReplicaOpenFailed {
                            host: replica.host().to_string(),
                        });
                        log_warn!(
                            component = "task",
                            event = "replica_open_failed",
                            host = replica.host(),
                            error = %err,
                        );
                        // The backup inherits the authority flag so repaired
                        // fragments stay covered exactly once.
                        match backups.pop_front() {
                            Some(backup) => replica = backup,
                            None => {
                                self.reporter.report(Event::ReplicaSelectionFailed {
                                    range,
                                    available: opened,
                                    required,
                                });
                                return Err(ReadError::Selection(
                                    crate::replica::SelectionError::InsufficientReplicas {
                                        range,
                                        required,
                                        available: opened,
                                    },
                                ));
                            }
                        }
                    }
                }
            }
        }

        log_info!(
            component = "task",
            event = "scanner_assembled",
            range = %range,
            replicas = opened,
            streams = streams.len(),
        );
        Ok(CompactionScanner::from_streams(streams, &self.reporter).await)
    }

    /// Open every relevant fragment on one replica.
    ///
    /// A corrupt fragment is excluded and the rest of the replica still
    /// serves; a failed byte pipeline fails the whole replica so a backup
    /// can take over.
    async fn open_replica(
        &self,
        replica: &Replica,
        filters: &FilterSet,
        role: ReplicaRole,
        repair_authority: bool,
    ) -> Result<Vec<PartitionStream>, TableError> {
        let config = QueueConfig {
            chunk_len: self.options.queue_chunk_len(),
            capacity: self.options.queue_capacity(),
        };
        let snapshot = replica.list_snapshot(&self.reporter).await?;
        let mut streams: Vec<PartitionStream> = Vec::new();
        for handle in snapshot {
            let outcome = TableFileReader::open(
                handle,
                filters,
                Arc::clone(&self.codec),
                config,
                Arc::clone(&self.reporter),
                self.cancel.clone(),
                role,
                repair_authority,
            )
            .await;
            match outcome {
                Ok(OpenOutcome::Opened(reader)) => streams.push(Box::pin(reader.into_stream())),
                Ok(OpenOutcome::Skipped(_)) => {}
                Err(TableError::Corrupt { .. }) => {
                    // Already reported; the fragment is excluded from the
                    // merge and the replica keeps serving.
                }
                Err(err) => return Err(err),
            }
        }
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::ReadTask;
    use crate::{
        codec::v1::V1Codec,
        error::ReadError,
        events::Event,
        filter::FilterSet,
        option::ReadOptions,
        replica::{ConsistencyLevel, FragmentStore, Replica},
        sstable::{SstableHandle, TableError},
        streaming::SourceError,
        test_util::{sstable_fixture, CollectingReporter, FixturePartition},
        token::TokenRange,
    };

    struct FixtureStore {
        handles: Vec<SstableHandle>,
    }

    #[async_trait::async_trait]
    impl FragmentStore for FixtureStore {
        async fn snapshot(&self) -> Result<Vec<SstableHandle>, TableError> {
            Ok(self.handles.clone())
        }
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl FragmentStore for BrokenStore {
        async fn snapshot(&self) -> Result<Vec<SstableHandle>, TableError> {
            Err(TableError::Source(SourceError::Supplier(
                "host unreachable".into(),
            )))
        }
    }

    fn replica_with(host: &str, partitions: &[FixturePartition]) -> Replica {
        let fixture = sstable_fixture("ks", "tbl", "frag", partitions, false, None);
        Replica::new(
            host,
            Arc::new(FixtureStore {
                handles: vec![fixture.handle()],
            }),
        )
    }

    fn partitions() -> Vec<FixturePartition> {
        vec![
            FixturePartition::new(b"alpha", 10, vec![1u8; 64]),
            FixturePartition::new(b"bravo", 20, vec![2u8; 64]),
        ]
    }

    fn task(consistency: ConsistencyLevel, reporter: Arc<CollectingReporter>) -> ReadTask {
        ReadTask::new(
            ReadOptions::new(consistency),
            Arc::new(V1Codec),
            reporter,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn quorum_read_merges_and_dedupes_replica_copies() {
        let reporter = Arc::new(CollectingReporter::default());
        let task = task(ConsistencyLevel::Quorum, reporter.clone());
        let candidates = vec![
            replica_with("a", &partitions()),
            replica_with("b", &partitions()),
            replica_with("c", &partitions()),
        ];

        let mut scanner = task
            .open(
                &FilterSet::range_only(TokenRange::closed(0, 100)),
                candidates,
                3,
            )
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(item) = scanner.next().await {
            tokens.push(item.unwrap().token);
        }
        // Two primaries each contribute both partitions; each emits once.
        assert_eq!(tokens, vec![10, 20]);
        assert_eq!(scanner.duplicates(), 2);
        assert!(reporter.has(|e| matches!(e, Event::ScannerOpened { .. })));
        assert!(reporter.has(|e| matches!(e, Event::SnapshotListed { .. })));
    }

    #[tokio::test]
    async fn failed_primary_promotes_a_backup() {
        let reporter = Arc::new(CollectingReporter::default());
        let task = task(ConsistencyLevel::One, reporter.clone());
        let candidates = vec![
            Replica::new("down", Arc::new(BrokenStore)),
            replica_with("backup", &partitions()),
        ];

        let mut scanner = task
            .open(
                &FilterSet::range_only(TokenRange::closed(0, 100)),
                candidates,
                2,
            )
            .await
            .unwrap();

        let mut count = 0;
        while let Some(item) = scanner.next().await {
            item.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
        assert!(reporter.has(
            |e| matches!(e, Event::ReplicaOpenFailed { host } if host == "down")
        ));
    }

    #[tokio::test]
    async fn exhausting_backups_fails_the_task() {
        let reporter = Arc::new(CollectingReporter::default());
        let task = task(ConsistencyLevel::One, reporter.clone());
        let candidates = vec![Replica::new("down", Arc::new(BrokenStore))];

        let err = task
            .open(
                &FilterSet::range_only(TokenRange::closed(0, 100)),
                candidates,
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::Selection(_)));
    }

    #[tokio::test]
    async fn corrupt_fragment_excluded_replica_still_serves() {
        let good = sstable_fixture("ks", "tbl", "frag-good", &partitions(), false, None);
        let bad = sstable_fixture("ks", "tbl", "frag-bad", &partitions(), false, None)
            .with_corrupt_summary();
        let replica = Replica::new(
            "a",
            Arc::new(FixtureStore {
                handles: vec![bad.handle(), good.handle()],
            }),
        );
        let reporter = Arc::new(CollectingReporter::default());
        let task = task(ConsistencyLevel::One, reporter.clone());

        let mut scanner = task
            .open(
                &FilterSet::range_only(TokenRange::closed(0, 100)),
                vec![replica],
                1,
            )
            .await
            .unwrap();

        let mut count = 0;
        while let Some(item) = scanner.next().await {
            item.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
        assert!(reporter.has(|e| matches!(e, Event::SstableCorrupt { .. })));
    }
}
