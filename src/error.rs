use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightError {
    /// Malformed submission or request; nothing was mutated.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Access-control denial. Fails closed: no partial data is returned.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The question pool cannot satisfy a mini-test constraint.
    #[error("insufficient question pool for student {student_id}: requested {requested}, available {available}")]
    InsufficientPool {
        student_id: String,
        requested: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, InsightError>;
