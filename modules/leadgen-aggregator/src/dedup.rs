//! Fuzzy deduplication of canonical business records.
//!
//! First-seen wins. Each incoming record is compared against the records
//! kept so far; a kept record whose name scores at or above the name
//! threshold is a candidate, and a candidate is a duplicate when either a
//! phone number matches or the addresses agree on the token-set score.
//! The first duplicate found absorbs the record: it gains any new phone
//! numbers and the record's sources, nothing else.
//!
//! Scanning stops at the first duplicate, so results depend on input order
//! when a record could match more than one kept record.

use leadgen_common::{AggregatorConfig, CanonicalRecord, FieldRoles};

use crate::similarity::{token_set_ratio, token_sort_ratio};

/// Which fields to compare and how strictly.
#[derive(Debug, Clone)]
pub struct DedupRules {
    pub name_field: String,
    pub address_field: Option<String>,
    pub phone_field: Option<String>,
    pub name_threshold: f64,
    pub address_threshold: f64,
    pub phone_separator: String,
}

impl DedupRules {
    pub fn new(roles: &FieldRoles, config: &AggregatorConfig) -> Self {
        Self {
            name_field: roles.name.clone(),
            address_field: roles.address.clone(),
            phone_field: roles.phone.clone(),
            name_threshold: config.name_threshold,
            address_threshold: config.address_threshold,
            phone_separator: config.phone_separator.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub records: Vec<CanonicalRecord>,
    /// Input records absorbed into an earlier record.
    pub duplicates: usize,
}

/// One phone number: as written, and digits only for comparison.
#[derive(Debug, Clone, PartialEq)]
struct Phone {
    raw: String,
    digits: String,
}

/// Comparison keys for a record, computed once.
#[derive(Debug)]
struct MatchKeys {
    name: String,
    address: String,
    phones: Vec<Phone>,
}

impl MatchKeys {
    fn of(record: &CanonicalRecord, rules: &DedupRules) -> Self {
        Self {
            name: normalize_name(record.get(&rules.name_field)),
            address: rules
                .address_field
                .as_deref()
                .map(|f| normalize_address(record.get(f)))
                .unwrap_or_default(),
            phones: rules
                .phone_field
                .as_deref()
                .map(|f| split_phones(record.get(f)))
                .unwrap_or_default(),
        }
    }

    fn has_phone(&self, digits: &str) -> bool {
        self.phones.iter().any(|p| p.digits == digits)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split a possibly comma-joined phone field. Parts without digits are dropped.
fn split_phones(field: &str) -> Vec<Phone> {
    field
        .split(',')
        .map(str::trim)
        .filter_map(|raw| {
            let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
            (!digits.is_empty()).then(|| Phone {
                raw: raw.to_string(),
                digits,
            })
        })
        .collect()
}

/// Collapse near-duplicate records. The input is left untouched.
pub fn deduplicate(records: &[CanonicalRecord], rules: &DedupRules) -> DedupOutcome {
    let mut unique: Vec<CanonicalRecord> = Vec::with_capacity(records.len());
    let mut keys: Vec<MatchKeys> = Vec::with_capacity(records.len());
    let mut duplicates = 0;

    for record in records {
        let incoming = MatchKeys::of(record, rules);

        let existing = keys
            .iter()
            .position(|kept| is_duplicate(&incoming, kept, rules));

        match existing {
            Some(idx) => {
                absorb(&mut unique[idx], &mut keys[idx], record, &incoming, rules);
                duplicates += 1;
            }
            None => {
                unique.push(record.clone());
                keys.push(incoming);
            }
        }
    }

    DedupOutcome {
        records: unique,
        duplicates,
    }
}

fn is_duplicate(incoming: &MatchKeys, kept: &MatchKeys, rules: &DedupRules) -> bool {
    if token_sort_ratio(&incoming.name, &kept.name) < rules.name_threshold {
        return false;
    }

    let phone_match = incoming.phones.iter().any(|p| kept.has_phone(&p.digits));
    if phone_match {
        return true;
    }

    !incoming.address.is_empty()
        && !kept.address.is_empty()
        && token_set_ratio(&incoming.address, &kept.address) >= rules.address_threshold
}

/// Fold `record` into `survivor`: new phone numbers are appended, every
/// other field stays as first seen.
fn absorb(
    survivor: &mut CanonicalRecord,
    survivor_keys: &mut MatchKeys,
    record: &CanonicalRecord,
    incoming: &MatchKeys,
    rules: &DedupRules,
) {
    if let Some(field) = rules.phone_field.as_deref() {
        for phone in &incoming.phones {
            if survivor_keys.has_phone(&phone.digits) {
                continue;
            }
            let current = survivor.get(field).trim();
            let joined = if current.is_empty() {
                phone.raw.clone()
            } else {
                format!("{current}{}{}", rules.phone_separator, phone.raw)
            };
            survivor.set(field, joined);
            survivor_keys.phones.push(phone.clone());
        }
    }

    for source in &record.sources {
        survivor.add_source(source);
    }
}
