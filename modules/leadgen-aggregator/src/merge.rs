//! The merge pipeline: normalize → parse → deduplicate.
//!
//! Runs against private copies of the source buckets, never the live
//! state. Every stage is a pure function of its input, so two runs over the
//! same buckets produce the same records.

use leadgen_common::{AggregatorConfig, CanonicalRecord, LeadgenError, Query, SchemaConfig};

use crate::dedup::{deduplicate, DedupRules};
use crate::normalizer::merge_data_sources;
use crate::parser::parse_data;
use crate::state::SourceBatch;

#[derive(Debug, Clone)]
pub struct MergePipeline {
    schema: SchemaConfig,
    rules: DedupRules,
}

/// Records plus the counts that went into producing them.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub records: Vec<CanonicalRecord>,
    /// Raw records consumed.
    pub raw: usize,
    /// Canonical records before dedup.
    pub normalized: usize,
    pub duplicates: usize,
}

/// One full merge over private bucket copies. Runs on the blocking pool.
pub trait MergeStage: Send + Sync {
    fn merge(&self, batches: &[SourceBatch], query: &Query) -> MergeOutput;
}

impl MergePipeline {
    pub fn new(schema: SchemaConfig, config: &AggregatorConfig) -> Result<Self, LeadgenError> {
        schema.validate()?;
        config.validate()?;
        let rules = DedupRules::new(&schema.roles, config);
        Ok(Self { schema, rules })
    }

    pub fn run(&self, batches: &[SourceBatch], query: &Query) -> MergeOutput {
        let raw = batches.iter().map(|b| b.records.len()).sum();

        let normalized = merge_data_sources(&self.schema, batches);
        let normalized_count = normalized.len();
        let parsed = parse_data(normalized, &self.schema, query, &self.rules.phone_separator);
        let outcome = deduplicate(&parsed, &self.rules);

        MergeOutput {
            records: outcome.records,
            raw,
            normalized: normalized_count,
            duplicates: outcome.duplicates,
        }
    }
}

impl MergeStage for MergePipeline {
    fn merge(&self, batches: &[SourceBatch], query: &Query) -> MergeOutput {
        self.run(batches, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lead_schema, raw};

    fn pipeline() -> MergePipeline {
        MergePipeline::new(lead_schema(), &AggregatorConfig::default()).unwrap()
    }

    fn batches() -> Vec<SourceBatch> {
        vec![
            SourceBatch {
                source: "directory_a".into(),
                records: vec![raw(&[
                    ("Company", "Acme Plumbing LLC"),
                    ("Tel", "555-1234"),
                    ("Street", "12 Oak St"),
                ])],
            },
            SourceBatch {
                source: "maps".into(),
                records: vec![
                    raw(&[
                        ("company_name", "ACME Plumbing"),
                        ("phone", "555-1234"),
                        ("address", "99 Elm Ave"),
                    ]),
                    raw(&[("company_name", "Zenith Roofing"), ("phone", "555-0000")]),
                ],
            },
        ]
    }

    fn query() -> Query {
        Query::new("Plumbers", "Austin, TX")
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let mut schema = lead_schema();
        schema.fields.clear();
        assert!(MergePipeline::new(schema, &AggregatorConfig::default()).is_err());
    }

    #[test]
    fn run_normalizes_parses_and_collapses() {
        let output = pipeline().run(&batches(), &query());

        assert_eq!(output.raw, 3);
        assert_eq!(output.normalized, 3);
        assert_eq!(output.duplicates, 1);
        assert_eq!(output.records.len(), 2);

        let acme = &output.records[0];
        assert_eq!(acme.get("company_name"), "Acme Plumbing LLC");
        assert_eq!(acme.get("phone"), "555-1234");
        assert_eq!(acme.get("address"), "12 Oak St");
        assert_eq!(acme.get("city"), "Austin");
        assert_eq!(acme.get("industry"), "Plumbers");
        assert_eq!(acme.sources, vec!["directory_a", "maps"]);
    }

    #[test]
    fn merged_phone_lists_use_one_separator() {
        let config = AggregatorConfig {
            phone_separator: ",".into(),
            ..AggregatorConfig::default()
        };
        let pipeline = MergePipeline::new(lead_schema(), &config).unwrap();
        let batches = vec![
            SourceBatch {
                source: "directory_a".into(),
                records: vec![raw(&[
                    ("Company", "Acme Plumbing LLC"),
                    ("Tel", "555-1111, 555-2222"),
                ])],
            },
            SourceBatch {
                source: "maps".into(),
                records: vec![raw(&[
                    ("company_name", "ACME Plumbing"),
                    ("phone", "555-2222, 555-3333"),
                ])],
            },
        ];

        let output = pipeline.run(&batches, &query());
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].get("phone"), "555-1111,555-2222,555-3333");
    }

    #[test]
    fn empty_buckets_produce_empty_output() {
        let output = pipeline().run(&[], &query());
        assert!(output.records.is_empty());
        assert_eq!(output.raw, 0);
    }

    #[test]
    fn rerunning_on_same_buckets_is_stable() {
        let pipeline = pipeline();
        let input = batches();
        assert_eq!(pipeline.run(&input, &query()), pipeline.run(&input, &query()));
    }
}
