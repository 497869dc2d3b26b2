//! Source adapter abstractions.
//!
//! Sources come in two shapes: batch (one complete list when done) and
//! streaming (records as they are discovered). The orchestrator consumes
//! both through `SourceAdapter::chunks`, so it never inspects which shape
//! it is driving.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use leadgen_common::{Query, RawRecord, SourceKind};

/// Records from a streaming source. An `Err` item ends the source; items
/// yielded before it are kept.
pub type RecordStream = BoxStream<'static, Result<RawRecord>>;

/// Record batches as the orchestrator appends them, one lock per chunk.
pub type ChunkStream = BoxStream<'static, Result<Vec<RawRecord>>>;

#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Collect every record for the query.
    async fn run(&self, query: &Query) -> Result<Vec<RawRecord>>;
}

pub trait StreamingSource: Send + Sync {
    /// Start producing records for the query.
    fn run(&self, query: Query) -> RecordStream;
}

#[derive(Clone)]
pub enum SourceAdapter {
    Batch(Arc<dyn BatchSource>),
    Streaming(Arc<dyn StreamingSource>),
}

impl SourceAdapter {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Batch(_) => SourceKind::Batch,
            SourceAdapter::Streaming(_) => SourceKind::Streaming,
        }
    }

    /// A batch source yields a single chunk when it completes; a streaming
    /// source yields one single-record chunk per item.
    pub fn chunks(&self, query: Query) -> ChunkStream {
        match self {
            SourceAdapter::Batch(source) => {
                let source = Arc::clone(source);
                stream::once(async move { source.run(&query).await }).boxed()
            }
            SourceAdapter::Streaming(source) => source
                .run(query)
                .map(|item| item.map(|record| vec![record]))
                .boxed(),
        }
    }
}

/// A source adapter under the name its bucket and progress are reported as.
#[derive(Clone)]
pub struct RegisteredSource {
    pub name: String,
    pub adapter: SourceAdapter,
}

impl RegisteredSource {
    pub fn batch(name: impl Into<String>, source: impl BatchSource + 'static) -> Self {
        Self {
            name: name.into(),
            adapter: SourceAdapter::Batch(Arc::new(source)),
        }
    }

    pub fn streaming(name: impl Into<String>, source: impl StreamingSource + 'static) -> Self {
        Self {
            name: name.into(),
            adapter: SourceAdapter::Streaming(Arc::new(source)),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.adapter.kind()
    }
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}
