//! Coarse block index over a fragment's index file.
//!
//! The summary is the cheapest component to read and decides whether the
//! whole fragment can be rejected before any other file is opened.

use crate::token::Token;

/// One coarse entry: a sampled token and its offset into the index file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SummaryEntry {
    /// Sampled token.
    pub token: Token,
    /// Byte offset of the sampled entry within the index file.
    pub index_offset: u64,
}

/// Decoded summary component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    /// Lowest token present in the fragment.
    pub first_token: Token,
    /// Highest token present in the fragment.
    pub last_token: Token,
    /// Sampled entries in ascending token order.
    pub entries: Vec<SummaryEntry>,
}

impl Summary {
    /// Inclusive token span of the fragment.
    pub fn span(&self) -> (Token, Token) {
        (self.first_token, self.last_token)
    }
}
