//! Change-data-capture: cross-replica mutation aggregation.
//!
//! The commit-log reader turns each replica's segments into mutation
//! records; this layer groups the records by content identity, publishes a
//! mutation once enough distinct replicas have reported it, and tracks a
//! raise-only per-table watermark so redelivered or long-dead mutations are
//! dropped instead of published twice.

mod aggregator;
mod batcher;
mod watermark;

pub use aggregator::{BatchOutcome, CdcAggregator, PublishedMutation};
pub use batcher::{MicroBatcher, SegmentFeed, SegmentSlice};
pub use watermark::Watermarker;
