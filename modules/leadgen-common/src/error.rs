use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadgenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),
}
