mod convergence;
pub mod dedup;
pub mod error;
pub mod fixtures;
pub mod merge;
pub mod normalizer;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod similarity;
pub mod state;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use error::AggregateError;
pub use merge::{MergeOutput, MergePipeline, MergeStage};
pub use orchestrator::{AggregationHandle, Aggregator};
pub use registry::AggregationRegistry;
pub use stats::AggregationStats;
pub use traits::{BatchSource, RegisteredSource, SourceAdapter, StreamingSource};
