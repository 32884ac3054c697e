// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid capacity amount: {0}")]
    InvalidAmount(f64),

    #[error("Invalid target state: {0}")]
    InvalidTarget(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
