use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::LeadgenError;

/// Source-field → canonical-field table for one source.
pub type FieldMapping = BTreeMap<String, String>;

/// TOML-backed configuration loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub schema: SchemaConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl FileConfig {
    pub fn validate(&self) -> Result<(), LeadgenError> {
        self.schema.validate()?;
        self.aggregator.validate()
    }
}

/// The canonical field set and how each source maps onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    pub fields: Vec<String>,
    pub roles: FieldRoles,
    /// Keyed by source name. Sources without a table keep fields whose
    /// names already match a canonical field.
    #[serde(default)]
    pub mappings: BTreeMap<String, FieldMapping>,
}

/// Which canonical field plays which part in cleaning and dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRoles {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl FieldRoles {
    fn assigned(&self) -> Vec<(&'static str, &str)> {
        let optional = [
            ("address", &self.address),
            ("phone", &self.phone),
            ("website", &self.website),
            ("rating", &self.rating),
            ("category", &self.category),
            ("city", &self.city),
            ("state", &self.state),
        ];
        std::iter::once(("name", self.name.as_str()))
            .chain(
                optional
                    .into_iter()
                    .filter_map(|(role, field)| field.as_deref().map(|f| (role, f))),
            )
            .collect()
    }
}

impl SchemaConfig {
    /// The business-lead schema used when no config file is given.
    pub fn leads() -> Self {
        let fields = [
            "company_name",
            "industry",
            "address",
            "city",
            "state",
            "phone",
            "website",
            "rating",
        ];
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            roles: FieldRoles {
                name: "company_name".into(),
                address: Some("address".into()),
                phone: Some("phone".into()),
                website: Some("website".into()),
                rating: Some("rating".into()),
                category: Some("industry".into()),
                city: Some("city".into()),
                state: Some("state".into()),
            },
            mappings: BTreeMap::new(),
        }
    }

    pub fn with_mapping(mut self, source: impl Into<String>, pairs: &[(&str, &str)]) -> Self {
        let table = pairs
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        self.mappings.insert(source.into(), table);
        self
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Reject schemas the merge pipeline cannot run against.
    pub fn validate(&self) -> Result<(), LeadgenError> {
        if self.fields.is_empty() {
            return Err(LeadgenError::Schema("no canonical fields declared".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.trim().is_empty() {
                return Err(LeadgenError::Schema("empty canonical field name".into()));
            }
            if !seen.insert(field.as_str()) {
                return Err(LeadgenError::Schema(format!(
                    "canonical field `{field}` declared twice"
                )));
            }
        }

        for (role, field) in self.roles.assigned() {
            if !self.has_field(field) {
                return Err(LeadgenError::Schema(format!(
                    "{role} role names `{field}`, which is not a canonical field"
                )));
            }
        }

        for (source, table) in &self.mappings {
            for (from, to) in table {
                if !self.has_field(to) {
                    return Err(LeadgenError::Schema(format!(
                        "mapping for `{source}` sends `{from}` to unknown field `{to}`"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Tunables for the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    /// How often the convergence loop checks for new raw records.
    pub poll_interval_ms: u64,
    /// Raw-count growth required before an intermediate merge runs.
    pub min_growth: usize,
    /// Name similarity (0-100) at which two records become candidates.
    pub name_threshold: f64,
    /// Address token-set similarity (0-100) that confirms a candidate.
    pub address_threshold: f64,
    /// Joins phone numbers accumulated on a merged record.
    pub phone_separator: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            min_growth: 1,
            name_threshold: 85.0,
            address_threshold: 75.0,
            phone_separator: ", ".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn validate(&self) -> Result<(), LeadgenError> {
        if self.poll_interval_ms == 0 {
            return Err(LeadgenError::Config("poll_interval_ms must be positive".into()));
        }
        if self.min_growth == 0 {
            return Err(LeadgenError::Config("min_growth must be at least 1".into()));
        }
        for (name, value) in [
            ("name_threshold", self.name_threshold),
            ("address_threshold", self.address_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(LeadgenError::Config(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if !self.phone_separator.contains(',') {
            return Err(LeadgenError::Config(
                "phone_separator must contain a comma".into(),
            ));
        }
        Ok(())
    }
}

/// Load, parse, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the TOML schema/aggregator config. Built-in lead schema when unset.
    pub config_path: Option<PathBuf>,
    /// Overrides `aggregator.poll_interval_ms` from the file.
    pub poll_interval_ms: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, LeadgenError> {
        dotenvy::dotenv().ok();

        let poll_interval_ms = match std::env::var("LEADGEN_POLL_INTERVAL_MS") {
            Ok(raw) => Some(raw.trim().parse().map_err(|_| {
                LeadgenError::Config(format!("LEADGEN_POLL_INTERVAL_MS must be a number, got {raw}"))
            })?),
            Err(_) => None,
        };

        let config = Self {
            config_path: std::env::var("LEADGEN_CONFIG").ok().map(PathBuf::from),
            poll_interval_ms,
        };
        config.log_summary();
        Ok(config)
    }

    /// Resolve the file config (or built-in defaults) with env overrides applied.
    pub fn resolve(&self, cli_path: Option<&Path>) -> Result<FileConfig> {
        let path = cli_path.or(self.config_path.as_deref());
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => FileConfig {
                schema: SchemaConfig::leads(),
                aggregator: AggregatorConfig::default(),
            },
        };
        if let Some(ms) = self.poll_interval_ms {
            config.aggregator.poll_interval_ms = ms;
            config.aggregator.validate()?;
        }
        Ok(config)
    }

    fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  LEADGEN_CONFIG: {}",
            self.config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!(
            "  LEADGEN_POLL_INTERVAL_MS: {}",
            self.poll_interval_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "<not set>".to_string())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[schema]
fields = ["company_name", "address", "phone"]

[schema.roles]
name = "company_name"
address = "address"
phone = "phone"

[schema.mappings.directory_a]
Company = "company_name"
Street = "address"
Tel = "phone"

[aggregator]
poll_interval_ms = 250
"#;

    #[test]
    fn lead_schema_is_valid() {
        SchemaConfig::leads().validate().unwrap();
    }

    #[test]
    fn role_outside_field_list_is_rejected() {
        let mut schema = SchemaConfig::leads();
        schema.roles.phone = Some("telephone".into());
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("telephone"), "{err}");
    }

    #[test]
    fn mapping_to_unknown_field_is_rejected() {
        let schema = SchemaConfig::leads().with_mapping("maps", &[("title", "headline")]);
        assert!(matches!(schema.validate(), Err(LeadgenError::Schema(_))));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut schema = SchemaConfig::leads();
        schema.fields.push("phone".into());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn thresholds_outside_range_are_rejected() {
        let config = AggregatorConfig {
            name_threshold: 120.0,
            ..AggregatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(LeadgenError::Config(_))));
    }

    #[test]
    fn load_config_parses_file_and_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.schema.fields.len(), 3);
        assert_eq!(
            config.schema.mappings["directory_a"]["Company"],
            "company_name"
        );
        assert_eq!(config.aggregator.poll_interval_ms, 250);
        assert_eq!(config.aggregator.name_threshold, 85.0);
        assert_eq!(config.aggregator.phone_separator, ", ");
    }

    #[test]
    fn load_config_reports_invalid_schema() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.replace("phone = \"phone\"", "phone = \"fax\"").as_bytes())
            .unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("fax"), "{err:#}");
    }
}
