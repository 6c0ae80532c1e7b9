use database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Failed to read portfolio snapshot: {0}")]
    Storage(#[from] DbError),
}
