pub mod config;
pub mod error;
pub mod types;

pub use config::{
    load_config, AggregatorConfig, AppConfig, FieldMapping, FieldRoles, FileConfig, SchemaConfig,
};
pub use error::LeadgenError;
pub use types::*;
