//! Test-support helpers: record builders, a lead schema, and scripted
//! sources for driving aggregation runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use leadgen_common::{AggregatorConfig, Query, RawRecord, SchemaConfig, Snapshot};

use crate::merge::{MergeOutput, MergePipeline, MergeStage};
use crate::orchestrator::AggregationHandle;
use crate::state::SourceBatch;
use crate::stats::AggregationStats;
use crate::traits::{BatchSource, RecordStream, StreamingSource};

/// Build a raw record from string pairs.
pub fn raw(pairs: &[(&str, &str)]) -> RawRecord {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// A raw record in canonical field names.
pub fn lead(name: &str, phone: &str, address: &str) -> RawRecord {
    raw(&[("company_name", name), ("phone", phone), ("address", address)])
}

/// The lead schema plus a mapping for `directory_a`, which reports
/// `Company`, `Tel` and `Street`.
pub fn lead_schema() -> SchemaConfig {
    SchemaConfig::leads().with_mapping(
        "directory_a",
        &[
            ("Company", "company_name"),
            ("Tel", "phone"),
            ("Street", "address"),
        ],
    )
}

/// Default tunables with a short poll interval.
pub fn fast_config() -> AggregatorConfig {
    AggregatorConfig::default().with_poll_interval(Duration::from_millis(20))
}

/// Poll until `done` holds for the published snapshot. Panics after 5s.
pub async fn wait_until(
    handle: &AggregationHandle,
    done: impl Fn(&Snapshot) -> bool,
) -> Arc<Snapshot> {
    let poll = async {
        loop {
            let snapshot = handle.poll();
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(Duration::from_secs(5), poll).await {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("snapshot condition not met; last: {:?}", handle.poll()),
    }
}

/// Poll until `done` holds for the run's live stats. Panics after 5s.
pub async fn wait_for_stats(
    handle: &AggregationHandle,
    done: impl Fn(&AggregationStats) -> bool,
) -> Arc<AggregationStats> {
    let poll = async {
        loop {
            let stats = handle.stats();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(Duration::from_secs(5), poll).await {
        Ok(stats) => stats,
        Err(_) => panic!("stats condition not met; last: {:?}", handle.stats()),
    }
}

// ---------------------------------------------------------------------------
// Scripted merge
// ---------------------------------------------------------------------------

/// The lead pipeline, except that every merge panics while failing is set.
pub struct SwitchableMerge {
    inner: MergePipeline,
    failing: AtomicBool,
}

impl SwitchableMerge {
    pub fn new(schema: SchemaConfig, config: &AggregatorConfig) -> Self {
        Self {
            inner: MergePipeline::new(schema, config).expect("valid merge config"),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MergeStage for SwitchableMerge {
    fn merge(&self, batches: &[SourceBatch], query: &Query) -> MergeOutput {
        if self.failing.load(Ordering::SeqCst) {
            panic!("merge stage failed");
        }
        self.inner.run(batches, query)
    }
}

// ---------------------------------------------------------------------------
// Scripted sources
// ---------------------------------------------------------------------------

/// Batch source that always errors.
pub struct FailingSource {
    message: String,
}

impl FailingSource {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl BatchSource for FailingSource {
    async fn run(&self, _query: &Query) -> Result<Vec<RawRecord>> {
        bail!("{}", self.message)
    }
}

/// Batch source that panics.
pub struct PanickingSource;

#[async_trait]
impl BatchSource for PanickingSource {
    async fn run(&self, _query: &Query) -> Result<Vec<RawRecord>> {
        panic!("source exploded")
    }
}

/// Streaming source that yields its records and then never finishes.
pub struct HangingSource {
    records: Vec<RawRecord>,
}

impl HangingSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl StreamingSource for HangingSource {
    fn run(&self, _query: Query) -> RecordStream {
        stream::iter(self.records.clone().into_iter().map(Ok))
            .chain(stream::pending())
            .boxed()
    }
}

/// Streaming source driven by the test through a [`Gate`].
pub struct GatedSource {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<RawRecord>>>>,
}

/// Feeds a [`GatedSource`]. Dropping it ends the stream.
pub struct Gate {
    sender: mpsc::UnboundedSender<Result<RawRecord>>,
}

impl GatedSource {
    pub fn new() -> (Self, Gate) {
        let (sender, receiver) = mpsc::unbounded();
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
            Gate { sender },
        )
    }
}

impl StreamingSource for GatedSource {
    /// The gate feeds the first run only; later runs see an empty stream.
    fn run(&self, _query: Query) -> RecordStream {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match receiver {
            Some(receiver) => receiver.boxed(),
            None => stream::empty().boxed(),
        }
    }
}

impl Gate {
    pub fn send(&self, record: RawRecord) {
        let _ = self.sender.unbounded_send(Ok(record));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.sender.unbounded_send(Err(anyhow::anyhow!("{message}")));
    }
}
