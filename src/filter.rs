//! Pure predicates narrowing which partitions and tokens are of interest.
//!
//! Filters are supplied by the caller, immutable, and evaluated cheapest
//! first: whole-fragment span checks before any per-partition work, and
//! per-partition token checks before key comparisons.

use bytes::Bytes;

use crate::token::{Token, TokenRange};

/// Token-range predicate assigned to a read task.
#[derive(Clone, Debug)]
pub struct RangeFilter {
    range: TokenRange,
}

impl RangeFilter {
    /// Wrap a token range as a filter.
    pub fn new(range: TokenRange) -> Self {
        Self { range }
    }

    /// The underlying token range.
    pub fn range(&self) -> TokenRange {
        self.range
    }

    /// Whether `token` is of interest.
    pub fn contains(&self, token: Token) -> bool {
        self.range.contains(token)
    }

    /// Whether a fragment spanning `[first, last]` can contain in-range data.
    pub fn overlaps(&self, first: Token, last: Token) -> bool {
        self.range.overlaps(first, last)
    }
}

/// Exact partition-key predicate with its precomputed ring token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionKeyFilter {
    key: Bytes,
    token: Token,
}

impl PartitionKeyFilter {
    /// Build a filter for one partition key and its token.
    pub fn new(key: impl Into<Bytes>, token: Token) -> Self {
        Self {
            key: key.into(),
            token,
        }
    }

    /// The raw key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The key's ring token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Whether `key` matches this filter.
    pub fn matches(&self, key: &[u8]) -> bool {
        self.key.as_ref() == key
    }
}

/// Conjunction of an optional range filter and zero or more key filters.
#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    range: Option<RangeFilter>,
    keys: Vec<PartitionKeyFilter>,
}

impl FilterSet {
    /// Build a filter set from its parts.
    pub fn new(range: Option<RangeFilter>, keys: Vec<PartitionKeyFilter>) -> Self {
        Self { range, keys }
    }

    /// Filter set with only a token range.
    pub fn range_only(range: TokenRange) -> Self {
        Self {
            range: Some(RangeFilter::new(range)),
            keys: Vec::new(),
        }
    }

    /// The range filter, if one was supplied.
    pub fn range(&self) -> Option<&RangeFilter> {
        self.range.as_ref()
    }

    /// The partition-key filters.
    pub fn key_filters(&self) -> &[PartitionKeyFilter] {
        &self.keys
    }

    /// Whether a fragment spanning `[first, last]` can contain anything of
    /// interest. This is the cheapest rejection and runs before any file
    /// beyond the summary is touched.
    pub fn overlaps_span(&self, first: Token, last: Token) -> bool {
        if let Some(range) = &self.range {
            if !range.overlaps(first, last) {
                return false;
            }
        }
        if !self.keys.is_empty()
            && !self
                .keys
                .iter()
                .any(|filter| filter.token() >= first && filter.token() <= last)
        {
            return false;
        }
        true
    }

    /// Whether `token` alone passes the range portion of the conjunction.
    pub fn in_range(&self, token: Token) -> bool {
        match &self.range {
            Some(range) => range.contains(token),
            None => true,
        }
    }

    /// Whether an individual partition passes the full conjunction.
    pub fn matches(&self, key: &[u8], token: Token) -> bool {
        if !self.in_range(token) {
            return false;
        }
        if !self.keys.is_empty() && !self.keys.iter().any(|filter| filter.matches(key)) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterSet, PartitionKeyFilter, RangeFilter};
    use crate::token::TokenRange;

    #[test]
    fn span_overlap_requires_both_filters() {
        let filters = FilterSet::new(
            Some(RangeFilter::new(TokenRange::closed(0, 100))),
            vec![PartitionKeyFilter::new(&b"k1"[..], 40)],
        );
        assert!(filters.overlaps_span(30, 60));
        // In range but no key filter token falls inside the span.
        assert!(!filters.overlaps_span(60, 90));
        // Key token inside but the range filter rejects the span.
        assert!(!filters.overlaps_span(101, 200));
    }

    #[test]
    fn partition_match_is_a_conjunction() {
        let filters = FilterSet::new(
            Some(RangeFilter::new(TokenRange::closed(0, 100))),
            vec![PartitionKeyFilter::new(&b"k1"[..], 40)],
        );
        assert!(filters.matches(b"k1", 40));
        assert!(!filters.matches(b"k2", 40));
        assert!(!filters.matches(b"k1", 200));
    }

    #[test]
    fn empty_set_matches_everything() {
        let filters = FilterSet::default();
        assert!(filters.overlaps_span(i128::MIN, i128::MAX));
        assert!(filters.matches(b"anything", -5));
    }
}
