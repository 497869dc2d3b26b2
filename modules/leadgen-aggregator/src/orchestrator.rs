//! Aggregation orchestrator: launches every source concurrently against
//! one query and hands out a handle to the run's published snapshot.
//!
//! Each source runs in its own task and appends chunks into its bucket
//! under the shared lock. A failing or panicking source is logged and
//! finished with whatever it produced; the other sources never notice.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::{FutureExt, StreamExt};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use leadgen_common::{AggregatorConfig, FileConfig, LeadgenError, Query, SchemaConfig, Snapshot};

use crate::convergence::ConvergenceLoop;
use crate::error::AggregateError;
use crate::merge::{MergePipeline, MergeStage};
use crate::state::{AggregationState, SharedState, CANCELLED};
use crate::stats::AggregationStats;
use crate::traits::RegisteredSource;

/// Starts aggregation runs against one schema and set of tunables.
#[derive(Clone)]
pub struct Aggregator {
    stage: Arc<dyn MergeStage>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(schema: SchemaConfig, config: AggregatorConfig) -> Result<Self, LeadgenError> {
        let pipeline = MergePipeline::new(schema, &config)?;
        Self::with_stage(Arc::new(pipeline), config)
    }

    /// Use `stage` for every merge instead of the schema-driven pipeline.
    pub fn with_stage(
        stage: Arc<dyn MergeStage>,
        config: AggregatorConfig,
    ) -> Result<Self, LeadgenError> {
        config.validate()?;
        Ok(Self { stage, config })
    }

    pub fn from_file_config(config: FileConfig) -> Result<Self, LeadgenError> {
        Self::new(config.schema, config.aggregator)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Launch every source and the convergence loop. Must be called from
    /// within a tokio runtime.
    ///
    /// The returned handle can be polled immediately; the first snapshot is
    /// empty and incomplete (complete if `sources` is empty).
    pub fn start(
        &self,
        query: Query,
        sources: Vec<RegisteredSource>,
    ) -> Result<AggregationHandle, LeadgenError> {
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.name.as_str()) {
                return Err(LeadgenError::Config(format!(
                    "source `{}` registered twice",
                    source.name
                )));
            }
        }

        let id = Uuid::new_v4();
        let state = AggregationState::new(&sources);
        let started_at = state.started_at;
        let snapshot = Arc::new(ArcSwap::from_pointee(Snapshot::initial(state.progress())));
        let state: SharedState = Arc::new(tokio::sync::Mutex::new(state));
        let stats = Arc::new(ArcSwap::from_pointee(AggregationStats::default()));
        let wake = Arc::new(Notify::new());
        let (done_tx, done_rx) = watch::channel(false);

        info!(
            run_id = %id,
            query = %query,
            sources = sources.len(),
            "Starting aggregation run"
        );

        let tasks = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                tokio::spawn(collect_source(
                    index,
                    source,
                    query.clone(),
                    Arc::clone(&state),
                    Arc::clone(&wake),
                ))
                .abort_handle()
            })
            .collect();

        let convergence = ConvergenceLoop {
            run_id: id,
            query: query.clone(),
            state: Arc::clone(&state),
            stage: Arc::clone(&self.stage),
            snapshot: Arc::clone(&snapshot),
            stats: Arc::clone(&stats),
            wake: Arc::clone(&wake),
            done: done_tx,
            poll_interval: self.config.poll_interval(),
            min_growth: self.config.min_growth,
            started_at,
        };
        tokio::spawn(convergence.run());

        Ok(AggregationHandle {
            inner: Arc::new(RunInner {
                id,
                query,
                state,
                snapshot,
                stats,
                wake,
                done: done_rx,
                tasks,
            }),
        })
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Drive one source to completion and record how it ended.
async fn collect_source(
    index: usize,
    source: RegisteredSource,
    query: Query,
    state: SharedState,
    wake: Arc<Notify>,
) {
    let name = source.name.clone();
    let kind = source.kind();

    let outcome = AssertUnwindSafe(drain_source(index, &source, query, &state))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(records)) => {
            info!(source = %name, %kind, records, "Source finished");
            None
        }
        Ok(Err(e)) => {
            warn!(source = %name, %kind, error = %e, "Source failed, keeping partial results");
            Some(e.to_string())
        }
        Err(_) => {
            let e = AggregateError::SourcePanicked(name.clone());
            error!(source = %name, %kind, error = %e, "Source panicked, keeping partial results");
            Some(e.to_string())
        }
    };

    let complete = {
        let mut state = state.lock().await;
        state.finish(index, error);
        state.is_complete()
    };
    if complete {
        wake.notify_one();
    }
}

/// Append every chunk the source yields. Returns the number of records kept.
async fn drain_source(
    index: usize,
    source: &RegisteredSource,
    query: Query,
    state: &SharedState,
) -> Result<usize, AggregateError> {
    let mut chunks = source.adapter.chunks(query);
    let mut kept = 0;

    while let Some(chunk) = chunks.next().await {
        let records = chunk.map_err(|e| AggregateError::SourceFailed {
            name: source.name.clone(),
            message: format!("{e:#}"),
        })?;
        let count = records.len();
        if !state.lock().await.append(index, records) {
            // Finished elsewhere (cancelled); nothing more is accepted.
            return Err(AggregateError::SourceCancelled(source.name.clone()));
        }
        kept += count;
    }

    Ok(kept)
}

struct RunInner {
    id: Uuid,
    query: Query,
    state: SharedState,
    snapshot: Arc<ArcSwap<Snapshot>>,
    stats: Arc<ArcSwap<AggregationStats>>,
    wake: Arc<Notify>,
    done: watch::Receiver<bool>,
    tasks: Vec<AbortHandle>,
}

/// A running (or finished) aggregation. Cheap to clone.
#[derive(Clone)]
pub struct AggregationHandle {
    inner: Arc<RunInner>,
}

impl AggregationHandle {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    /// The latest published snapshot. Never blocks.
    pub fn poll(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.snapshot.load().is_complete
    }

    /// Counters as of the last convergence tick.
    pub fn stats(&self) -> Arc<AggregationStats> {
        self.inner.stats.load_full()
    }

    /// Stop every source still running. Records already collected stay and
    /// are merged into the final snapshot. Returns false if nothing was
    /// running.
    pub async fn cancel(&self) -> bool {
        for task in &self.inner.tasks {
            task.abort();
        }
        let cancelled = self.inner.state.lock().await.finish_running(CANCELLED);
        if cancelled > 0 {
            info!(run_id = %self.inner.id, sources = cancelled, "Aggregation run cancelled");
            self.inner.wake.notify_one();
        }
        cancelled > 0
    }

    /// Wait until the final snapshot is published and return it.
    pub async fn wait(&self) -> Arc<Snapshot> {
        let mut done = self.inner.done.clone();
        // Err only if the loop task is gone, in which case the last
        // published snapshot is all there is.
        let _ = done.wait_for(|finished| *finished).await;
        self.poll()
    }
}

impl fmt::Debug for AggregationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationHandle")
            .field("id", &self.inner.id)
            .field("query", &self.inner.query)
            .field("is_complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureBatchSource;
    use crate::testing::{fast_config, lead_schema, raw, GatedSource, HangingSource};

    fn aggregator() -> Aggregator {
        Aggregator::new(lead_schema(), fast_config()).unwrap()
    }

    fn query() -> Query {
        Query::new("Plumbers", "Austin, TX")
    }

    #[tokio::test]
    async fn duplicate_source_names_are_rejected() {
        let err = aggregator()
            .start(
                query(),
                vec![
                    RegisteredSource::batch("maps", FixtureBatchSource::new(Vec::new())),
                    RegisteredSource::batch("maps", FixtureBatchSource::new(Vec::new())),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, LeadgenError::Config(_)), "{err}");
    }

    #[tokio::test]
    async fn poll_is_valid_immediately_after_start() {
        let handle = aggregator()
            .start(
                query(),
                vec![RegisteredSource::streaming("maps", HangingSource::new(Vec::new()))],
            )
            .unwrap();

        let snapshot = handle.poll();
        assert!(!snapshot.is_complete);
        assert!(snapshot.processed_data.is_empty());
        assert_eq!(snapshot.sources.len(), 1);
        assert!(snapshot.sources[0].in_progress);

        handle.cancel().await;
    }

    #[tokio::test]
    async fn empty_source_list_completes_with_no_records() {
        let handle = aggregator().start(query(), Vec::new()).unwrap();
        assert!(handle.is_complete());

        let snapshot = handle.wait().await;
        assert!(snapshot.is_complete);
        assert!(snapshot.processed_data.is_empty());
    }

    #[tokio::test]
    async fn cancel_keeps_collected_records() {
        let (gated, gate) = GatedSource::new();
        let handle = aggregator()
            .start(query(), vec![RegisteredSource::streaming("maps", gated)])
            .unwrap();

        gate.send(raw(&[("company_name", "Acme Plumbing"), ("phone", "555-1234")]));
        crate::testing::wait_until(&handle, |s| s.total_scraped == 1).await;

        assert!(handle.cancel().await);
        let snapshot = handle.wait().await;

        assert!(snapshot.is_complete);
        assert_eq!(snapshot.processed_data.len(), 1);
        assert_eq!(snapshot.sources[0].error.as_deref(), Some(CANCELLED));
        assert!(!handle.cancel().await);
        assert_eq!(handle.stats().sources_cancelled, 1);
    }
}
