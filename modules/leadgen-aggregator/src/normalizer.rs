//! Field normalization: per-source raw records → canonical field set.
//!
//! Pure and infallible. Unmapped source fields are dropped, canonical
//! fields without a value are present and empty, and malformed values
//! degrade to empty through `value_text`.

use leadgen_common::{value_text, CanonicalRecord, FieldMapping, RawRecord, SchemaConfig};

use crate::state::SourceBatch;

/// Normalize every batch, concatenated in batch order. Each source keeps
/// its own insertion order.
pub fn merge_data_sources(schema: &SchemaConfig, batches: &[SourceBatch]) -> Vec<CanonicalRecord> {
    batches
        .iter()
        .flat_map(|batch| {
            let mapping = schema.mappings.get(&batch.source);
            batch
                .records
                .iter()
                .map(move |raw| normalize_record(schema, mapping, &batch.source, raw))
        })
        .collect()
}

/// Map one raw record. Without a mapping table, fields whose names already
/// match a canonical field pass through.
pub fn normalize_record(
    schema: &SchemaConfig,
    mapping: Option<&FieldMapping>,
    source: &str,
    raw: &RawRecord,
) -> CanonicalRecord {
    let mut record = CanonicalRecord::from_source(source);
    for field in &schema.fields {
        record.set(field.clone(), String::new());
    }

    match mapping {
        Some(table) => {
            for (from, to) in table {
                if !record.is_blank(to) {
                    continue;
                }
                if let Some(value) = raw.get(from) {
                    record.set(to.clone(), value_text(value));
                }
            }
        }
        None => {
            for field in &schema.fields {
                if let Some(value) = raw.get(field) {
                    record.set(field.clone(), value_text(value));
                }
            }
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::{lead_schema, raw};

    fn batch(source: &str, records: Vec<RawRecord>) -> SourceBatch {
        SourceBatch {
            source: source.to_string(),
            records,
        }
    }

    #[test]
    fn mapped_source_renames_fields_and_drops_unmapped() {
        let schema = lead_schema();
        let records = merge_data_sources(
            &schema,
            &[batch(
                "directory_a",
                vec![raw(&[
                    ("Company", "Acme Plumbing"),
                    ("Tel", "555-1234"),
                    ("Street", "12 Oak St"),
                    ("Fax", "555-0000"),
                ])],
            )],
        );

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.get("company_name"), "Acme Plumbing");
        assert_eq!(r.get("phone"), "555-1234");
        assert_eq!(r.get("address"), "12 Oak St");
        assert!(!r.fields.contains_key("Fax"));
        assert_eq!(r.sources, vec!["directory_a"]);
    }

    #[test]
    fn every_canonical_field_is_present() {
        let schema = lead_schema();
        let records = merge_data_sources(
            &schema,
            &[batch("directory_a", vec![raw(&[("Company", "Acme")])])],
        );

        for field in &schema.fields {
            assert!(records[0].fields.contains_key(field), "missing {field}");
        }
        assert_eq!(records[0].get("website"), "");
    }

    #[test]
    fn unmapped_source_passes_matching_fields_through() {
        let schema = lead_schema();
        let records = merge_data_sources(
            &schema,
            &[batch(
                "maps",
                vec![raw(&[("company_name", "Acme"), ("title", "ignored")])],
            )],
        );

        assert_eq!(records[0].get("company_name"), "Acme");
        assert!(!records[0].fields.contains_key("title"));
    }

    #[test]
    fn numbers_and_phone_lists_render_as_text() {
        let schema = lead_schema();
        let mut record = RawRecord::new();
        record.insert("company_name".into(), json!("Acme"));
        record.insert("rating".into(), json!(4.5));
        record.insert("phone".into(), json!(["555-1234", "555-9999"]));
        record.insert("address".into(), json!({"street": "12 Oak St"}));

        let records = merge_data_sources(&schema, &[batch("maps", vec![record])]);

        assert_eq!(records[0].get("rating"), "4.5");
        assert_eq!(records[0].get("phone"), "555-1234, 555-9999");
        assert_eq!(records[0].get("address"), "");
    }

    #[test]
    fn first_non_empty_mapped_value_wins() {
        let schema = lead_schema().with_mapping(
            "forum_listings",
            &[("alt_phone", "phone"), ("main_phone", "phone"), ("title", "company_name")],
        );
        let records = merge_data_sources(
            &schema,
            &[batch(
                "forum_listings",
                vec![raw(&[("title", "Acme"), ("alt_phone", ""), ("main_phone", "555-1234")])],
            )],
        );

        assert_eq!(records[0].get("phone"), "555-1234");
    }

    #[test]
    fn preserves_per_source_order_across_batches() {
        let schema = lead_schema();
        let records = merge_data_sources(
            &schema,
            &[
                batch("maps", vec![raw(&[("company_name", "A")]), raw(&[("company_name", "B")])]),
                batch("directory_a", vec![raw(&[("Company", "C")])]),
            ],
        );

        let names: Vec<_> = records.iter().map(|r| r.get("company_name")).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn same_input_gives_same_output() {
        let schema = lead_schema();
        let input = vec![batch(
            "directory_a",
            vec![raw(&[("Company", "Acme"), ("Tel", "555-1234")])],
        )];
        assert_eq!(
            merge_data_sources(&schema, &input),
            merge_data_sources(&schema, &input)
        );
    }
}
