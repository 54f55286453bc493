use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Missing required argument '{0}'")]
    MissingOption(String),

    #[error("Cannot convert batch tree into array: No id found for batch {label}!")]
    MissingId { label: String },

    #[error("No root batch found")]
    MissingRoot,

    #[error("Unknown batch node: {0}")]
    UnknownNode(usize),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(feature = "python")]
impl From<BatchError> for pyo3::PyErr {
    fn from(err: BatchError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}
