//! Ring positions and token ranges.
//!
//! A token is a position on the partitioning ring derived from a partition
//! key. `i128` is wide enough for both 64-bit and 127-bit partitioner
//! families, so no arbitrary-precision integer type is needed.

use std::fmt;

/// A ring position derived from a partition key.
pub type Token = i128;

/// A contiguous portion of the partitioning ring owned by one read task.
///
/// Immutable once assigned: all filtering for that task is expressed against
/// it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TokenRange {
    lower: Token,
    upper: Token,
    lower_inclusive: bool,
    upper_inclusive: bool,
}

impl TokenRange {
    /// Build a range that includes both bounds.
    pub fn closed(lower: Token, upper: Token) -> Self {
        Self {
            lower,
            upper,
            lower_inclusive: true,
            upper_inclusive: true,
        }
    }

    /// The whole ring.
    pub fn full() -> Self {
        Self::closed(Token::MIN, Token::MAX)
    }

    /// Build a `(lower, upper]` range, the ring's native ownership shape.
    pub fn open_closed(lower: Token, upper: Token) -> Self {
        Self {
            lower,
            upper,
            lower_inclusive: false,
            upper_inclusive: true,
        }
    }

    /// Lower bound of the range.
    pub fn lower(&self) -> Token {
        self.lower
    }

    /// Upper bound of the range.
    pub fn upper(&self) -> Token {
        self.upper
    }

    /// Whether `token` falls within this range.
    pub fn contains(&self, token: Token) -> bool {
        let lower_ok = if self.lower_inclusive {
            token >= self.lower
        } else {
            token > self.lower
        };
        if !lower_ok {
            return false;
        }
        if self.upper_inclusive {
            token <= self.upper
        } else {
            token < self.upper
        }
    }

    /// Whether this range intersects the inclusive span `[first, last]`.
    ///
    /// Fragment spans are inclusive on both ends, so the check differs from
    /// [`TokenRange::contains`] only in how the range's own bounds apply.
    pub fn overlaps(&self, first: Token, last: Token) -> bool {
        let below = if self.lower_inclusive {
            last >= self.lower
        } else {
            last > self.lower
        };
        let above = if self.upper_inclusive {
            first <= self.upper
        } else {
            first < self.upper
        };
        below && above
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lower_inclusive { '[' } else { '(' };
        let close = if self.upper_inclusive { ']' } else { ')' };
        write!(f, "{}{}..{}{}", open, self.lower, self.upper, close)
    }
}

#[cfg(test)]
mod tests {
    use super::TokenRange;

    #[test]
    fn closed_contains_both_bounds() {
        let range = TokenRange::closed(-10, 10);
        assert!(range.contains(-10));
        assert!(range.contains(0));
        assert!(range.contains(10));
        assert!(!range.contains(-11));
        assert!(!range.contains(11));
    }

    #[test]
    fn open_closed_excludes_lower() {
        let range = TokenRange::open_closed(0, 100);
        assert!(!range.contains(0));
        assert!(range.contains(1));
        assert!(range.contains(100));
    }

    #[test]
    fn overlap_against_fragment_span() {
        let range = TokenRange::closed(50, 150);
        assert!(range.overlaps(0, 50));
        assert!(range.overlaps(150, 500));
        assert!(range.overlaps(80, 90));
        assert!(!range.overlaps(0, 49));
        assert!(!range.overlaps(151, 400));

        let exclusive = TokenRange::open_closed(50, 150);
        assert!(!exclusive.overlaps(0, 50));
        assert!(exclusive.overlaps(0, 51));
    }
}
