//! Post-normalization cleanup on the canonical schema.
//!
//! Never drops a record and never fails one: a field that cannot be
//! cleaned keeps its raw value.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use leadgen_common::{CanonicalRecord, FieldRoles, Query, SchemaConfig};

static RE_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:[.,](\d+))?").unwrap());
static RE_SPACE_BEFORE_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+,").unwrap());

/// A single field value that could not be cleaned as its role expects.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum FieldError {
    #[error("not a URL: {0}")]
    InvalidUrl(String),

    #[error("no rating in: {0}")]
    InvalidRating(String),
}

/// City and state derived from a free-text query location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationParts {
    pub city: String,
    pub state: String,
}

impl LocationParts {
    /// `"Austin, TX"` → (Austin, TX). A single part fills the city only.
    pub fn parse(location: &str) -> Self {
        let mut parts = location
            .split(',')
            .map(collapse_whitespace)
            .filter(|p| !p.is_empty());
        Self {
            city: parts.next().unwrap_or_default(),
            state: parts.next().unwrap_or_default(),
        }
    }
}

/// Clean every record in place and fill location/category fields the
/// query can supply. Phone lists are rejoined with `phone_separator`.
pub fn parse_data(
    records: Vec<CanonicalRecord>,
    schema: &SchemaConfig,
    query: &Query,
    phone_separator: &str,
) -> Vec<CanonicalRecord> {
    let location = LocationParts::parse(&query.location);
    let category = collapse_whitespace(&query.category);
    records
        .into_iter()
        .map(|record| {
            parse_record(record, &schema.roles, &location, &category, phone_separator)
        })
        .collect()
}

fn parse_record(
    mut record: CanonicalRecord,
    roles: &FieldRoles,
    location: &LocationParts,
    category: &str,
    phone_separator: &str,
) -> CanonicalRecord {
    for value in record.fields.values_mut() {
        *value = collapse_whitespace(value);
    }

    if let Some(field) = &roles.address {
        let cleaned = clean_address(record.get(field));
        record.set(field.clone(), cleaned);
    }
    if let Some(field) = &roles.phone {
        let cleaned = clean_phone_list(record.get(field), phone_separator);
        record.set(field.clone(), cleaned);
    }
    if let Some(field) = &roles.website {
        clean_with(&mut record, field, clean_website);
    }
    if let Some(field) = &roles.rating {
        clean_with(&mut record, field, clean_rating);
    }

    fill_blank(&mut record, roles.city.as_deref(), &location.city);
    fill_blank(&mut record, roles.state.as_deref(), &location.state);
    fill_blank(&mut record, roles.category.as_deref(), category);

    record
}

fn clean_with(
    record: &mut CanonicalRecord,
    field: &str,
    clean: fn(&str) -> Result<String, FieldError>,
) {
    let raw = record.get(field);
    if raw.is_empty() {
        return;
    }
    match clean(raw) {
        Ok(cleaned) => record.set(field, cleaned),
        Err(e) => debug!(field, error = %e, "Keeping raw value"),
    }
}

fn fill_blank(record: &mut CanonicalRecord, field: Option<&str>, value: &str) {
    if let Some(field) = field {
        if record.is_blank(field) && !value.is_empty() {
            record.set(field, value);
        }
    }
}

/// Trim, drop control characters, and collapse internal whitespace.
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_address(address: &str) -> String {
    let address = RE_SPACE_BEFORE_COMMA.replace_all(address, ",");
    address
        .trim_end_matches(|c: char| c == ',' || c == ' ')
        .to_string()
}

fn clean_phone_list(phones: &str, separator: &str) -> String {
    phones
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn clean_website(raw: &str) -> Result<String, FieldError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = url::Url::parse(&candidate).map_err(|_| FieldError::InvalidUrl(raw.to_string()))?;
    match url.host_str() {
        Some(host) if host.contains('.') => Ok(url.to_string()),
        _ => Err(FieldError::InvalidUrl(raw.to_string())),
    }
}

fn clean_rating(raw: &str) -> Result<String, FieldError> {
    let caps = RE_DECIMAL
        .captures(raw)
        .ok_or_else(|| FieldError::InvalidRating(raw.to_string()))?;
    let whole = &caps[1];
    Ok(match caps.get(2) {
        Some(frac) => format!("{whole}.{}", frac.as_str()),
        None => whole.to_string(),
    })
}
