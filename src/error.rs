#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Execution timed out: {0}")]
    Timeout(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::DatabaseError(format!("IO error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
