//! The convergence loop: periodically re-merge everything collected so far
//! and publish it as the run's snapshot.
//!
//! One loop per run. Each tick checks raw growth under the state lock,
//! copies the buckets, merges the copy on the blocking pool, and swaps
//! the result into the published snapshot. The loop ends after the first
//! tick that publishes a snapshot with `is_complete = true`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leadgen_common::{CanonicalRecord, Query, Snapshot, SourceProgress};

use crate::error::AggregateError;
use crate::merge::MergeStage;
use crate::state::{SharedState, CANCELLED};
use crate::stats::AggregationStats;

/// A completed run whose final merge keeps failing publishes its last good
/// records after this many attempts.
const MAX_FINAL_MERGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TickOutcome {
    Continue,
    Finished,
}

pub(crate) struct ConvergenceLoop {
    pub run_id: Uuid,
    pub query: Query,
    pub state: SharedState,
    pub stage: Arc<dyn MergeStage>,
    pub snapshot: Arc<ArcSwap<Snapshot>>,
    pub stats: Arc<ArcSwap<AggregationStats>>,
    pub wake: Arc<Notify>,
    pub done: watch::Sender<bool>,
    pub poll_interval: Duration,
    pub min_growth: usize,
    pub started_at: Instant,
}

impl ConvergenceLoop {
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stats = AggregationStats::default();
        let mut final_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            match self.tick(&mut stats, &mut final_failures).await {
                TickOutcome::Continue => self.stats.store(Arc::new(stats.clone())),
                TickOutcome::Finished => break,
            }
        }

        let progress = self.state.lock().await.progress();
        for source in &progress {
            match source.error.as_deref() {
                Some(CANCELLED) => stats.sources_cancelled += 1,
                Some(_) => stats.source_failures += 1,
                None => {}
            }
        }
        self.stats.store(Arc::new(stats.clone()));

        info!(run_id = %self.run_id, query = %self.query, "{stats}");
        let _ = self.done.send(true);
    }

    async fn tick(&self, stats: &mut AggregationStats, final_failures: &mut u32) -> TickOutcome {
        // checking
        let (batches, total, complete, progress) = {
            let state = self.state.lock().await;
            let total = state.total_raw();
            let complete = state.is_complete();
            let unmerged = total.saturating_sub(state.last_merged_count);
            let due = if complete {
                unmerged > 0
            } else {
                unmerged >= self.min_growth
            };

            if !due {
                stats.ticks_skipped += 1;
                if complete {
                    let progress = state.progress();
                    drop(state);
                    self.republish_complete(progress);
                    return TickOutcome::Finished;
                }
                debug!(run_id = %self.run_id, raw = total, unmerged, "No new data, skipping merge");
                return TickOutcome::Continue;
            }

            (state.copy_buckets(), total, complete, state.progress())
        };

        // merging
        let stage = Arc::clone(&self.stage);
        let query = self.query.clone();
        let merged = tokio::task::spawn_blocking(move || stage.merge(&batches, &query)).await;

        let output = match merged {
            Ok(output) => output,
            Err(join_err) => {
                let err = if join_err.is_panic() {
                    AggregateError::MergePanicked
                } else {
                    AggregateError::Merge(join_err.to_string())
                };
                stats.merge_failures += 1;
                error!(run_id = %self.run_id, raw = total, error = %err, "Merge failed, keeping previous snapshot");

                if complete {
                    *final_failures += 1;
                    if *final_failures >= MAX_FINAL_MERGE_ATTEMPTS {
                        warn!(
                            run_id = %self.run_id,
                            attempts = *final_failures,
                            "Giving up on final merge, publishing last good records"
                        );
                        self.republish_complete(progress);
                        return TickOutcome::Finished;
                    }
                }
                return TickOutcome::Continue;
            }
        };

        // publishing
        stats.merges_run += 1;
        stats.raw_scraped = output.raw;
        stats.canonical_records = output.records.len();
        stats.duplicates_collapsed = output.duplicates;

        info!(
            run_id = %self.run_id,
            raw = output.raw,
            canonical = output.records.len(),
            duplicates = output.duplicates,
            complete,
            "Published snapshot"
        );
        self.publish(output.records, output.raw, complete, progress);
        self.state.lock().await.mark_merged(total);

        if complete {
            TickOutcome::Finished
        } else {
            TickOutcome::Continue
        }
    }

    fn publish(
        &self,
        processed_data: Vec<CanonicalRecord>,
        total_scraped: usize,
        is_complete: bool,
        sources: Vec<SourceProgress>,
    ) {
        self.snapshot.store(Arc::new(Snapshot {
            processed_data,
            elapsed_time: self.started_at.elapsed().as_secs_f64(),
            total_scraped,
            is_complete,
            sources,
            published_at: Utc::now(),
        }));
    }

    /// Mark the run complete without merging again.
    fn republish_complete(&self, progress: Vec<SourceProgress>) {
        let previous = self.snapshot.load_full();
        debug!(run_id = %self.run_id, canonical = previous.processed_data.len(), "Republishing final snapshot");
        self.publish(
            previous.processed_data.clone(),
            previous.total_scraped,
            true,
            progress,
        );
    }
}
