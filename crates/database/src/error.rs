use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("A record with the same {0} already exists.")]
    Conflict(String),

    #[error("Stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("The transaction was aborted: {0}")]
    Aborted(String),
}

impl DbError {
    /// Maps a unique-constraint violation onto `Conflict`, naming the field that clashed.
    pub(crate) fn from_insert(err: sqlx::Error, field: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(field.to_string())
            }
            _ => DbError::Query(err),
        }
    }
}
