//! Error types for referendum configuration.

use thiserror::Error;

/// Errors raised when referendum rules are malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReferendumError {
    /// Approval fraction outside `[0, 1]` (or NaN)
    #[error("approval fraction must be within [0, 1], got {0}")]
    InvalidApprovalFraction(f64),
}
