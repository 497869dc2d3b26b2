//! Fixture sources that replay recorded records.
//!
//! Used by the replay binary and by tests. A fixture file is JSON:
//!
//! ```text
//! { "sources": [
//!     { "name": "maps", "kind": "streaming", "delay_ms": 50,
//!       "records": [ { "company_name": "Acme Plumbing", ... } ] } ] }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use leadgen_common::{Query, RawRecord, SourceKind};

use crate::traits::{BatchSource, RecordStream, RegisteredSource, StreamingSource};

/// Returns a fixed list after an optional delay, or fails.
#[derive(Debug, Clone, Default)]
pub struct FixtureBatchSource {
    records: Vec<RawRecord>,
    delay: Duration,
    failure: Option<String>,
}

impl FixtureBatchSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl BatchSource for FixtureBatchSource {
    async fn run(&self, _query: &Query) -> Result<Vec<RawRecord>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(self.records.clone())
    }
}

/// Yields records one at a time with a delay before each, optionally
/// failing after the first `n`.
#[derive(Debug, Clone, Default)]
pub struct FixtureStreamSource {
    records: Vec<RawRecord>,
    item_delay: Duration,
    failure: Option<(usize, String)>,
}

impl FixtureStreamSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn failing_after(mut self, yielded: usize, message: impl Into<String>) -> Self {
        self.failure = Some((yielded, message.into()));
        self
    }
}

impl StreamingSource for FixtureStreamSource {
    fn run(&self, _query: Query) -> RecordStream {
        let limit = self
            .failure
            .as_ref()
            .map_or(self.records.len(), |(n, _)| *n);
        let items = self.records.iter().take(limit).cloned().map(Ok);
        let tail = self
            .failure
            .as_ref()
            .map(|(n, message)| Err(anyhow!("{message} (after {n} records)")));
        let delay = self.item_delay;

        stream::iter(items.chain(tail).collect::<Vec<_>>())
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed()
    }
}

/// A set of fixture sources loaded from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureFile {
    pub sources: Vec<FixtureSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSpec {
    pub name: String,
    pub kind: SourceKind,
    /// Batch: delay before returning. Streaming: delay before each record.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub fail: Option<String>,
    /// Streaming only: records yielded before `fail` is raised.
    #[serde(default)]
    pub fail_after: Option<usize>,
    #[serde(default)]
    pub records: Vec<RawRecord>,
}

impl FixtureFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse fixture file: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_sources(self) -> Vec<RegisteredSource> {
        self.sources.into_iter().map(FixtureSpec::into_source).collect()
    }
}

impl FixtureSpec {
    fn into_source(self) -> RegisteredSource {
        let delay = Duration::from_millis(self.delay_ms);
        match self.kind {
            SourceKind::Batch => {
                let mut source = FixtureBatchSource::new(self.records).with_delay(delay);
                if let Some(message) = self.fail {
                    source = source.failing(message);
                }
                RegisteredSource::batch(self.name, source)
            }
            SourceKind::Streaming => {
                let total = self.records.len();
                let mut source = FixtureStreamSource::new(self.records).with_item_delay(delay);
                match (self.fail, self.fail_after) {
                    (Some(message), after) => {
                        source = source.failing_after(after.unwrap_or(total), message);
                    }
                    (None, Some(after)) => {
                        source = source.failing_after(after, "stream interrupted");
                    }
                    (None, None) => {}
                }
                RegisteredSource::streaming(self.name, source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::raw;

    fn query() -> Query {
        Query::new("Plumbers", "Austin, TX")
    }

    #[tokio::test]
    async fn batch_fixture_returns_records_or_fails() {
        let records = vec![raw(&[("name", "Acme")])];
        let ok = FixtureBatchSource::new(records.clone());
        assert_eq!(ok.run(&query()).await.unwrap(), records);

        let failing = FixtureBatchSource::new(records).failing("directory offline");
        let err = failing.run(&query()).await.unwrap_err();
        assert_eq!(err.to_string(), "directory offline");
    }

    #[tokio::test]
    async fn stream_fixture_fails_after_n_items() {
        let source = FixtureStreamSource::new(vec![
            raw(&[("name", "A")]),
            raw(&[("name", "B")]),
            raw(&[("name", "C")]),
        ])
        .failing_after(2, "rate limited");

        let items: Vec<_> = source.run(query()).collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        let err = items[2].as_ref().unwrap_err();
        assert!(err.to_string().contains("rate limited"), "{err}");
    }

    #[test]
    fn fixture_file_builds_registered_sources() {
        let file = FixtureFile::from_json(
            r#"{
                "sources": [
                    { "name": "directory_a", "kind": "batch",
                      "records": [ { "Company": "Acme Plumbing", "Tel": "555-1234" } ] },
                    { "name": "maps", "kind": "streaming", "delay_ms": 5,
                      "fail": "blocked", "fail_after": 1,
                      "records": [ { "company_name": "Acme" }, { "company_name": "Zenith" } ] }
                ]
            }"#,
        )
        .unwrap();

        let sources = file.into_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind(), SourceKind::Batch);
        assert_eq!(sources[1].name, "maps");
        assert_eq!(sources[1].kind(), SourceKind::Streaming);
    }

    #[test]
    fn fixture_file_rejects_unknown_kind() {
        let err = FixtureFile::from_json(r#"{ "sources": [ { "name": "x", "kind": "carrier_pigeon" } ] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("carrier_pigeon"), "{err}");
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FixtureFile::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"), "{err:#}");
    }
}
