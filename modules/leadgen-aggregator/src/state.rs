//! Shared state for one aggregation run.
//!
//! `AggregationState` lives behind a single `tokio::sync::Mutex`. Every
//! bucket append, flag flip, and snapshot copy happens under that lock, and
//! no critical section awaits anything, so a stalled source can never hold
//! it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use leadgen_common::{RawRecord, SourceKind, SourceProgress};

use crate::traits::RegisteredSource;

pub type SharedState = Arc<Mutex<AggregationState>>;

/// Error recorded on sources stopped by `AggregationHandle::cancel`.
pub const CANCELLED: &str = "cancelled";

/// One source's bucket and status. Buckets are append-only.
#[derive(Debug)]
pub struct SourceSlot {
    pub name: String,
    pub kind: SourceKind,
    pub bucket: Vec<RawRecord>,
    pub in_progress: bool,
    pub error: Option<String>,
}

/// A private copy of one bucket, taken for a merge.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub records: Vec<RawRecord>,
}

#[derive(Debug)]
pub struct AggregationState {
    /// In registration order. Source tasks address their slot by index.
    pub slots: Vec<SourceSlot>,
    /// Raw count consumed by the last successful merge. Only grows.
    pub last_merged_count: usize,
    pub started_at: Instant,
}

impl AggregationState {
    pub fn new(sources: &[RegisteredSource]) -> Self {
        Self {
            slots: sources
                .iter()
                .map(|s| SourceSlot {
                    name: s.name.clone(),
                    kind: s.kind(),
                    bucket: Vec::new(),
                    in_progress: true,
                    error: None,
                })
                .collect(),
            last_merged_count: 0,
            started_at: Instant::now(),
        }
    }

    /// Append a chunk to a running source's bucket. Chunks arriving after
    /// the source was finished (e.g. cancelled) are dropped.
    pub fn append(&mut self, index: usize, records: Vec<RawRecord>) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.in_progress => {
                slot.bucket.extend(records);
                true
            }
            _ => false,
        }
    }

    /// Mark a source finished. The first outcome recorded wins.
    pub fn finish(&mut self, index: usize, error: Option<String>) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.in_progress => {
                slot.in_progress = false;
                slot.error = error;
                true
            }
            _ => false,
        }
    }

    /// Finish every running source with `reason`. Returns how many were running.
    pub fn finish_running(&mut self, reason: &str) -> usize {
        let mut finished = 0;
        for slot in self.slots.iter_mut().filter(|s| s.in_progress) {
            slot.in_progress = false;
            slot.error = Some(reason.to_string());
            finished += 1;
        }
        finished
    }

    pub fn total_raw(&self) -> usize {
        self.slots.iter().map(|s| s.bucket.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| !s.in_progress)
    }

    pub fn progress(&self) -> Vec<SourceProgress> {
        self.slots
            .iter()
            .map(|s| SourceProgress {
                name: s.name.clone(),
                kind: s.kind,
                scraped: s.bucket.len(),
                in_progress: s.in_progress,
                error: s.error.clone(),
            })
            .collect()
    }

    pub fn copy_buckets(&self) -> Vec<SourceBatch> {
        self.slots
            .iter()
            .map(|s| SourceBatch {
                source: s.name.clone(),
                records: s.bucket.clone(),
            })
            .collect()
    }

    /// Advance the merge watermark. Never moves it backwards.
    pub fn mark_merged(&mut self, total: usize) {
        self.last_merged_count = self.last_merged_count.max(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw, FailingSource, HangingSource};

    fn state() -> AggregationState {
        AggregationState::new(&[
            RegisteredSource::batch("directory_a", FailingSource::new("boom")),
            RegisteredSource::streaming("maps", HangingSource::new(Vec::new())),
        ])
    }

    #[test]
    fn new_state_has_empty_running_buckets() {
        let state = state();
        assert_eq!(state.total_raw(), 0);
        assert!(!state.is_complete());
        assert!(state.slots.iter().all(|s| s.in_progress && s.bucket.is_empty()));
        assert_eq!(state.slots[1].kind, SourceKind::Streaming);
    }

    #[test]
    fn append_preserves_order_within_bucket() {
        let mut state = state();
        state.append(1, vec![raw(&[("name", "first")])]);
        state.append(1, vec![raw(&[("name", "second")]), raw(&[("name", "third")])]);

        let names: Vec<_> = state.slots[1]
            .bucket
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(state.total_raw(), 3);
    }

    #[test]
    fn finished_source_rejects_appends_and_second_outcome() {
        let mut state = state();
        assert!(state.finish(0, Some("boom".into())));
        assert!(!state.append(0, vec![raw(&[("name", "late")])]));
        assert!(!state.finish(0, None));
        assert_eq!(state.slots[0].error.as_deref(), Some("boom"));
        assert_eq!(state.total_raw(), 0);
    }

    #[test]
    fn complete_once_every_source_finishes() {
        let mut state = state();
        state.finish(0, None);
        assert!(!state.is_complete());
        assert_eq!(state.finish_running(CANCELLED), 1);
        assert!(state.is_complete());
        assert_eq!(state.slots[1].error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut state = state();
        state.mark_merged(5);
        state.mark_merged(3);
        assert_eq!(state.last_merged_count, 5);
    }

    #[test]
    fn copy_buckets_is_detached_from_live_state() {
        let mut state = state();
        state.append(1, vec![raw(&[("name", "Acme")])]);
        let copy = state.copy_buckets();
        state.append(1, vec![raw(&[("name", "Zenith")])]);

        assert_eq!(copy[1].records.len(), 1);
        assert_eq!(copy[1].source, "maps");
        assert_eq!(state.slots[1].bucket.len(), 2);
    }
}
