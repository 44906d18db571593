//! Change-data-capture mutation records decoded from commit-log segments.

use bytes::Bytes;

use crate::token::Token;

/// Identity of a table a mutation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u128);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// One CDC change decoded from a commit-log segment.
///
/// Created by the commit-log reader, consumed and discarded once published or
/// dropped.
#[derive(Clone, Debug)]
pub struct MutationRecord {
    /// Table the mutation targets.
    pub table_id: TableId,
    /// Ring token of the mutated partition.
    pub token: Token,
    /// Highest client write timestamp carried by the mutation, in
    /// microseconds.
    pub max_timestamp_micros: i64,
    /// Content digest used to match equivalent records across replicas.
    pub digest: u64,
    /// Opaque serialized payload.
    pub payload: Bytes,
    /// Host identity of the replica this record was read from.
    pub origin: String,
}

impl MutationRecord {
    /// Content-derived grouping key: two records with the same key are
    /// treated as independent replica copies of the same mutation.
    pub fn group_key(&self) -> MutationKey {
        MutationKey {
            table_id: self.table_id,
            token: self.token,
            max_timestamp_micros: self.max_timestamp_micros,
            digest: self.digest,
        }
    }

    /// Serialized payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Content-derived identity of a mutation, independent of which replica
/// reported it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MutationKey {
    /// Table the mutation targets.
    pub table_id: TableId,
    /// Ring token of the mutated partition.
    pub token: Token,
    /// Highest client write timestamp, microseconds.
    pub max_timestamp_micros: i64,
    /// Payload digest.
    pub digest: u64,
}
