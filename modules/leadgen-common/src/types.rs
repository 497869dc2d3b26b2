use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::schema::RootSchema;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Raw input ---

/// One record exactly as a source produced it. Keys vary per source
/// (`name` on one directory, `Company` on another).
pub type RawRecord = Map<String, Value>;

/// Render a raw value as text for the canonical schema.
///
/// Scalars render as-is, arrays of scalars join with ", " (sources that
/// list several phone numbers), and anything else degrades to empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Object(_) => String::new(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !matches!(v, Value::Array(_) | Value::Object(_)))
            .map(value_text)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// --- Query ---

/// What every source is asked for: a business category in a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Query {
    pub category: String,
    pub location: String,
}

impl Query {
    pub fn new(category: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            location: location.into(),
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.category, self.location)
    }
}

// --- Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Returns its complete list once finished.
    Batch,
    /// Yields records one at a time as they are discovered.
    Streaming,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Batch => write!(f, "batch"),
            SourceKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// Per-source progress as of the last published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceProgress {
    pub name: String,
    pub kind: SourceKind,
    pub scraped: usize,
    pub in_progress: bool,
    pub error: Option<String>,
}

// --- Canonical output ---

/// A business record in the caller's canonical field set.
///
/// Missing fields read as empty. `sources` lists every source that
/// contributed a record collapsed into this one, first contributor first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalRecord {
    pub fields: BTreeMap<String, String>,
    pub sources: Vec<String>,
}

impl CanonicalRecord {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            sources: vec![source.into()],
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn is_blank(&self, field: &str) -> bool {
        self.get(field).trim().is_empty()
    }

    /// Record that `source` contributed to this record. No repeats.
    pub fn add_source(&mut self, source: &str) {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
    }
}

// --- Snapshot ---

/// The externally visible result of an aggregation run.
///
/// Published whole and never mutated afterwards; readers holding an older
/// snapshot keep a consistent view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    pub processed_data: Vec<CanonicalRecord>,
    /// Seconds since the run started, measured when this snapshot was published.
    pub elapsed_time: f64,
    /// Raw records across all sources consumed by the merge behind `processed_data`.
    pub total_scraped: usize,
    pub is_complete: bool,
    pub sources: Vec<SourceProgress>,
    pub published_at: DateTime<Utc>,
}

impl Snapshot {
    /// The snapshot visible before any merge has run.
    pub fn initial(sources: Vec<SourceProgress>) -> Self {
        let is_complete = sources.iter().all(|s| !s.in_progress);
        Self {
            processed_data: Vec::new(),
            elapsed_time: 0.0,
            total_scraped: 0,
            is_complete,
            sources,
            published_at: Utc::now(),
        }
    }
}

/// JSON Schema for `Snapshot`, the shape `poll` results are serialized in.
pub fn snapshot_schema() -> RootSchema {
    schema_for!(Snapshot)
}
