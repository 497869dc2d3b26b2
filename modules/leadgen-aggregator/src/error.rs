//! Typed failures inside an aggregation run.
//!
//! None of these escape a run: source and merge failures are logged and
//! recorded on the snapshot or in `AggregationStats`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    /// A source returned an error. Records it yielded before failing are kept.
    #[error("source {name} failed: {message}")]
    SourceFailed { name: String, message: String },

    #[error("source {0} panicked")]
    SourcePanicked(String),

    #[error("source {0} cancelled")]
    SourceCancelled(String),

    /// The merge task could not complete; the previous snapshot stays published.
    #[error("merge failed: {0}")]
    Merge(String),

    #[error("merge panicked")]
    MergePanicked,
}
