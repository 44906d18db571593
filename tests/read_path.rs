//! End-to-end read-path scenarios across replicas, filters, and the merge.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tablestream::{
    codec::v1::V1Codec,
    events::{Event, PartitionSkipReason, SstableSkipReason},
    filter::{FilterSet, PartitionKeyFilter, RangeFilter},
    replica::{FragmentStore, Replica},
    sstable::{SstableHandle, TableError},
    test_util::{sstable_fixture, CollectingReporter, FixturePartition},
    ConsistencyLevel, ReadOptions, ReadTask, TokenRange,
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

fn table_partitions() -> Vec<FixturePartition> {
    vec![
        FixturePartition::new(b"apricot", -800, vec![0xA0; 600]),
        FixturePartition::new(b"banana", -100, vec![0xB1; 450]),
        FixturePartition::new(b"cherry", 150, vec![0xC2; 512]),
        FixturePartition::new(b"damson", 420, vec![0xD3; 300]),
        FixturePartition::new(b"elder", 990, vec![0xE4; 700]),
    ]
}

fn replica_with(
    host: &str,
    fragments: Vec<(&str, &[FixturePartition], Option<i64>)>,
) -> Replica {
    let handles = fragments
        .into_iter()
        .map(|(name, partitions, repaired_at)| {
            sstable_fixture("ks", "orders", name, partitions, false, repaired_at).handle()
        })
        .collect();
    Replica::new(host, Arc::new(FixtureStore { handles }))
}

fn task(consistency: ConsistencyLevel, reporter: Arc<CollectingReporter>) -> ReadTask {
    ReadTask::new(
        ReadOptions::new(consistency),
        Arc::new(V1Codec),
        reporter,
        CancellationToken::new(),
    )
}

async fn collect(
    task: &ReadTask,
    filters: &FilterSet,
    candidates: Vec<Replica>,
    replication_factor: usize,
) -> Vec<(Vec<u8>, i128)> {
    let mut scanner = task
        .open(filters, candidates, replication_factor)
        .await
        .unwrap();
    let mut out = Vec::new();
    while let Some(item) = scanner.next().await {
        let partition = item.unwrap();
        out.push((partition.key.to_vec(), partition.token));
    }
    out
}

#[tokio::test]
async fn quorum_scan_emits_each_partition_once_in_token_order() {
    let partitions = table_partitions();
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::Quorum, reporter.clone());
    let candidates = vec![
        replica_with("a", vec![("frag-1", &partitions, None)]),
        replica_with("b", vec![("frag-1", &partitions, None)]),
        replica_with("c", vec![("frag-1", &partitions, None)]),
    ];

    let emitted = collect(&task, &FilterSet::default(), candidates, 3).await;
    let tokens: Vec<i128> = emitted.iter().map(|(_, t)| *t).collect();
    assert_eq!(tokens, vec![-800, -100, 150, 420, 990]);
    assert!(reporter.has(|e| matches!(e, Event::ReplicaSetSelected { primaries: 2, .. })));
}

#[tokio::test]
async fn range_filter_never_transfers_out_of_range_data_bytes() {
    let partitions = table_partitions();
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::One, reporter.clone());
    let candidates = vec![replica_with("a", vec![("frag-1", &partitions, None)])];

    let emitted = collect(
        &task,
        &FilterSet::range_only(TokenRange::closed(0, 500)),
        candidates,
        1,
    )
    .await;
    assert_eq!(
        emitted,
        vec![(b"cherry".to_vec(), 150), (b"damson".to_vec(), 420)]
    );

    // The leading two and trailing one partitions stay unrequested.
    let leading: u64 = 600 + 450;
    let trailing: u64 = 700;
    assert!(reporter.has(
        |e| matches!(e, Event::DataStartSkipped { bytes } if *bytes == leading)
    ));
    assert!(reporter.has(
        |e| matches!(e, Event::DataEndSkipped { bytes } if *bytes == trailing)
    ));
}

#[tokio::test]
async fn repaired_fragments_served_by_exactly_one_replica() {
    let partitions = table_partitions();
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::All, reporter.clone());
    let repaired = Some(1_700_000_000i64);
    let candidates = vec![
        replica_with("a", vec![("frag-rep", &partitions, repaired)]),
        replica_with("b", vec![("frag-rep", &partitions, repaired)]),
        replica_with("c", vec![("frag-rep", &partitions, repaired)]),
    ];

    let emitted = collect(&task, &FilterSet::default(), candidates, 3).await;
    // One authority serves the repaired fragment; the other two replicas
    // skip it, so nothing arrives twice even without dedupe pressure.
    assert_eq!(emitted.len(), 5);
    let repaired_skips = reporter
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::SstableSkipped {
                    reason: SstableSkipReason::Repaired,
                    ..
                }
            )
        })
        .count();
    assert_eq!(repaired_skips, 2);
}

#[tokio::test]
async fn scan_is_idempotent_across_runs() {
    let partitions = table_partitions();
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::Quorum, reporter);

    let build_candidates = || {
        vec![
            replica_with("a", vec![("frag-1", &partitions, None)]),
            replica_with("b", vec![("frag-1", &partitions, None)]),
            replica_with("c", vec![("frag-1", &partitions, None)]),
        ]
    };
    let filters = FilterSet::range_only(TokenRange::closed(-1000, 1000));
    let first = collect(&task, &filters, build_candidates(), 3).await;
    let second = collect(&task, &filters, build_candidates(), 3).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn bloom_and_index_misses_are_distinguished() {
    let partitions = table_partitions();
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::One, reporter.clone());

    // A key absent from the bloom filter skips the fragment without an
    // index read.
    let absent = FilterSet::new(None, vec![PartitionKeyFilter::new(&b"zucchini"[..], 150)]);
    let mut scanner = task
        .open(
            &absent,
            vec![replica_with("a", vec![("frag-1", &partitions, None)])],
            1,
        )
        .await
        .unwrap();
    assert!(scanner.next().await.is_none());
    assert!(reporter.has(|e| matches!(
        e,
        Event::SstableSkipped {
            reason: SstableSkipReason::MissingInFilter,
            ..
        }
    )));
    assert!(!reporter.has(|e| matches!(e, Event::IndexRead { .. })));
}

#[tokio::test]
async fn key_filter_scan_reads_one_partition_across_fragments() {
    let partitions = table_partitions();
    let older = vec![
        FixturePartition::new(b"fig", -900, vec![0x0F; 200]),
        FixturePartition::new(b"grape", 700, vec![0x1F; 200]),
    ];
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::One, reporter.clone());
    let candidates = vec![replica_with(
        "a",
        vec![("frag-new", &partitions, None), ("frag-old", &older, None)],
    )];

    let filters = FilterSet::new(
        Some(RangeFilter::new(TokenRange::closed(-1000, 1000))),
        vec![PartitionKeyFilter::new(&b"damson"[..], 420)],
    );
    let emitted = collect(&task, &filters, candidates, 1).await;
    assert_eq!(emitted, vec![(b"damson".to_vec(), 420)]);
    // The fragment without the key never contributes partitions. Depending
    // on its bloom bits it is skipped at the filter or the index.
    assert!(reporter.has(|e| matches!(
        e,
        Event::SstableSkipped {
            reason: SstableSkipReason::MissingInFilter | SstableSkipReason::MissingInIndex,
            ..
        }
    ) || matches!(
        e,
        Event::PartitionSkipped {
            reason: PartitionSkipReason::MissingInFilter | PartitionSkipReason::MissingInIndex,
            ..
        }
    )));
}

#[tokio::test]
async fn compressed_and_plain_fragments_agree() {
    let partitions = table_partitions();
    let plain = sstable_fixture("ks", "orders", "frag-p", &partitions, false, None);
    let compressed = sstable_fixture("ks", "orders", "frag-c", &partitions, true, None);
    let reporter = Arc::new(CollectingReporter::default());
    let task = task(ConsistencyLevel::One, reporter);

    let filters = FilterSet::range_only(TokenRange::closed(0, 500));
    let from_plain = collect(
        &task,
        &filters,
        vec![Replica::new(
            "a",
            Arc::new(FixtureStore {
                handles: vec![plain.handle()],
            }),
        )],
        1,
    )
    .await;
    let from_compressed = collect(
        &task,
        &filters,
        vec![Replica::new(
            "a",
            Arc::new(FixtureStore {
                handles: vec![compressed.handle()],
            }),
        )],
        1,
    )
    .await;
    assert_eq!(from_plain, from_compressed);
}
