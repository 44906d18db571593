//! Logging infrastructure for tablestream observability.
//!
//! tablestream uses `tracing` for structured logging. All events use target
//! "tablestream" and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! tablestream never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: module/subsystem (e.g., "sstable", "commitlog")
//! - Use `%` for Display, `?` for Debug formatting
//! - Avoid high-cardinality fields without sampling

/// Target for all tablestream log events.
pub(crate) const STREAM_TARGET: &str = "tablestream";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "replica",
///     event = "replica_set_selected",
///     range = %range,
///     primaries = primaries.len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::STREAM_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::STREAM_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::STREAM_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
#[allow(unused_macros)]
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::STREAM_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
#[allow(unused_imports)]
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
