#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("notification not found")]
    NotFound,

    #[error("notification cannot be canceled from its current status")]
    CannotCancel,

    #[error("notification already exists")]
    AlreadyExists,

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
