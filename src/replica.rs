//! Replica identity, consistency levels, and replica-set selection.

use std::{fmt, sync::Arc, time::Instant};

use crate::{
    events::{Event, Reporter},
    observability::{log_info, log_warn},
    sstable::{SstableHandle, TableError},
    token::TokenRange,
};

/// Minimum number and placement of replicas that must agree for a read to be
/// considered successful.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// One replica suffices.
    One,
    /// Two replicas.
    Two,
    /// A majority of the replication factor.
    Quorum,
    /// Every replica.
    All,
}

impl ConsistencyLevel {
    /// Number of replicas this level requires given the replication factor.
    pub fn required(&self, replication_factor: usize) -> usize {
        match self {
            ConsistencyLevel::One => 1,
            ConsistencyLevel::Two => 2,
            ConsistencyLevel::Quorum => replication_factor / 2 + 1,
            ConsistencyLevel::All => replication_factor,
        }
    }
}

/// Whether a selected replica serves the read or stands by for failover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaRole {
    /// Serves the read.
    Primary,
    /// Tried only when a primary fails.
    Backup,
}

/// Supplier of a replica's fragment snapshot.
#[async_trait::async_trait]
pub trait FragmentStore: Send + Sync {
    /// List the fragments this replica holds for the job's table.
    async fn snapshot(&self) -> Result<Vec<SstableHandle>, TableError>;
}

/// One storage node holding some subset of the table's fragments.
///
/// Discovered per read request and discarded when the request completes.
#[derive(Clone)]
pub struct Replica {
    host: String,
    store: Arc<dyn FragmentStore>,
}

impl Replica {
    /// Build a replica from its host identity and fragment store.
    pub fn new(host: impl Into<String>, store: Arc<dyn FragmentStore>) -> Self {
        Self {
            host: host.into(),
            store,
        }
    }

    /// Host identity.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// List this replica's fragment snapshot, reporting the listing time.
    pub async fn list_snapshot(
        &self,
        reporter: &Arc<dyn Reporter>,
    ) -> Result<Vec<SstableHandle>, TableError> {
        let started = Instant::now();
        let snapshot = self.store.snapshot().await?;
        reporter.report(Event::SnapshotListed {
            host: self.host.clone(),
            nanos: started.elapsed().as_nanos() as u64,
        });
        Ok(snapshot)
    }
}

impl fmt::Debug for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Replica selection failure.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// Fewer replicas responded than the consistency level requires; `range`
    /// names the uncovered portion of the ring.
    #[error("{available} of {required} required replicas available for token range {range}")]
    InsufficientReplicas {
        /// Uncovered token range.
        range: TokenRange,
        /// Replicas the consistency level requires.
        required: usize,
        /// Replicas that responded.
        available: usize,
    },
}

/// Primary and backup sets chosen for one token range.
#[derive(Clone, Debug)]
pub struct ReplicaSet {
    /// Replicas that serve the read.
    pub primaries: Vec<Replica>,
    /// Replicas held back for failover.
    pub backups: Vec<Replica>,
}

/// Chooses replica sets sufficient to satisfy a consistency level.
pub struct ReplicaSelector {
    level: ConsistencyLevel,
    reporter: Arc<dyn Reporter>,
}

impl ReplicaSelector {
    /// Build a selector for one consistency level.
    pub fn new(level: ConsistencyLevel, reporter: Arc<dyn Reporter>) -> Self {
        Self { level, reporter }
    }

    /// Choose primary and backup sets from the replicas that responded for
    /// `range`. `replication_factor` is the full ownership count for the
    /// range, including replicas that did not respond.
    ///
    /// Never under-reads: if fewer replicas responded than the level
    /// requires, this fails rather than returning a smaller primary set.
    pub fn select(
        &self,
        range: TokenRange,
        candidates: Vec<Replica>,
        replication_factor: usize,
    ) -> Result<ReplicaSet, SelectionError> {
        let started = Instant::now();
        let required = self.level.required(replication_factor.max(1));
        if candidates.len() < required {
            self.reporter.report(Event::ReplicaSelectionFailed {
                range,
                available: candidates.len(),
                required,
            });
            log_warn!(
                component = "replica",
                event = "replica_selection_failed",
                range = %range,
                available = candidates.len(),
                required,
            );
            return Err(SelectionError::InsufficientReplicas {
                range,
                required,
                available: candidates.len(),
            });
        }

        let mut candidates = candidates;
        let backups = candidates.split_off(required);
        let set = ReplicaSet {
            primaries: candidates,
            backups,
        };
        self.reporter.report(Event::ReplicaSetSelected {
            range,
            primaries: set.primaries.len(),
            backups: set.backups.len(),
            nanos: started.elapsed().as_nanos() as u64,
        });
        log_info!(
            component = "replica",
            event = "replica_set_selected",
            range = %range,
            primaries = set.primaries.len(),
            backups = set.backups.len(),
        );
        Ok(set)
    }
}
