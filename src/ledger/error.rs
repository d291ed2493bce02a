use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A conditional write found the row changed by another transaction.
    #[error("{0} was modified concurrently")]
    Conflict(&'static str),
    #[error("corrupt stored column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
}

impl StorageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn corrupt(column: &'static str, reason: impl ToString) -> Self {
        Self::Corrupt {
            column,
            reason: reason.to_string(),
        }
    }
}
