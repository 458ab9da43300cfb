//! Structured log events.
//!
//! Events are emitted through `tracing` under the `tablet` target. Each one
//! names the emitting `component` ("compaction", "rowset" or "tablet") and a
//! snake_case `event`; further fields use `%` for `Display` values. The crate
//! leaves subscriber setup to the embedding application.

pub(crate) const TABLET_TARGET: &str = "tablet";

/// Row set swaps, selections and other lifecycle milestones.
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TABLET_TARGET, $($field)*)
    };
}

/// Per-drain detail such as flush row counts.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TABLET_TARGET, $($field)*)
    };
}

/// Cleanup that failed without affecting correctness.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TABLET_TARGET, $($field)*)
    };
}

/// Failures that abort a flush or compaction.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::TABLET_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
