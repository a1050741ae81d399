use std::fmt::{self, Display};

/// Errors produced when parsing model values from their persisted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownRunStatus(String),
    UnknownJobStatus(String),
    EmptyKey(&'static str),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownRunStatus(raw) => {
                write!(f, "unknown run status '{raw}'")
            }
            ModelError::UnknownJobStatus(raw) => {
                write!(f, "unknown job status '{raw}'")
            }
            ModelError::EmptyKey(kind) => write!(f, "{kind} must not be empty"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
