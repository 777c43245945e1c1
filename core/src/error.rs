use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClvError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Row {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    #[error("Input file is missing required column '{name}'")]
    MissingColumn { name: String },

    #[error("Insufficient data to fit {model}: {reason}")]
    InsufficientData { model: &'static str, reason: String },

    #[error("{model} fit did not converge after {iterations} iterations")]
    ModelFit { model: &'static str, iterations: usize },

    #[error("Customer '{customer_id}' not found")]
    CustomerNotFound { customer_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ClvResult<T> = Result<T, ClvError>;
