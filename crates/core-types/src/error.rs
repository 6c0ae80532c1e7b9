use thiserror::Error;

/// Rejections raised while building or parsing the shared ledger types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("Amount out of range: {0}")]
    OutOfRange(String),
}
