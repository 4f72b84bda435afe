//! # Tradewind Discount
//!
//! Multi-phase discount evaluation over cart state.
//!
//! Evaluation runs in three phases: applicability (status, validity
//! window, usage caps, conditions, promo codes), value calculation per
//! discount variant (percentage, fixed amount, buy-x-get-y, tiered,
//! bundle, free shipping), and a stacking optimizer that picks which
//! applicable discounts actually apply under the configured strategy.
//! Amounts are IEEE-754 doubles end to end; presentation rounding belongs
//! to the caller.

pub mod calculator;
pub mod conditions;
pub mod engine;
pub mod error;
pub mod service;
pub mod stacking;
pub mod types;

pub use calculator::calculate;
pub use conditions::evaluate_conditions;
pub use engine::{CodeValidation, DiscountEngine};
pub use error::DiscountError;
pub use service::DiscountService;
pub use stacking::{select, Candidate};
pub use types::{
    AppliedDiscount, AppliedItem, CartContext, CartItem, CreateDiscountInput, CustomerInfo,
    Discount, DiscountApplication, DiscountCondition, DiscountStatus, DiscountTarget,
    DiscountValue, EvaluationResult, RejectedCode, StackingBehavior, StackingStrategy, TierBy,
    UpdateDiscountInput,
};
