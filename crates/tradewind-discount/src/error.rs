//! Discount engine errors

use tradewind_core::validation::ValidationIssue;
use tradewind_storage::StoreError;

/// Errors from discount operations. Precondition failures during
/// evaluation never surface here — they become rejected codes or silently
/// inapplicable discounts.
#[derive(Debug, thiserror::Error)]
pub enum DiscountError {
    /// Discount not found
    #[error("discount not found: {0}")]
    DiscountNotFound(String),

    /// Usage recording would push past the configured limit
    #[error("discount {0} usage limit reached")]
    UsageLimitReached(String),

    /// Discount input failed validation
    #[error("discount input is invalid")]
    Invalid(Vec<ValidationIssue>),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored document could not be decoded
    #[error("corrupt document: {0}")]
    Corrupt(String),
}
