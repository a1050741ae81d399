//! Addressed patching of JSON model documents.
//!
//! Scenarios describe their changes as `(address, value)` pairs over the
//! base model. [`apply_overrides`] is pure: it never mutates its input and
//! never creates structure that the base document lacks.

mod address;
mod apply;

use thiserror::Error;

pub use address::Address;
pub use apply::{OverrideOutcome, OverrideReport, apply_overrides};

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid address '{address}' at position {position}: {message}")]
    Parse {
        address: String,
        position: usize,
        message: String,
    },
}
