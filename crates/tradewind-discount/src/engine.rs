//! Discount evaluation engine
//!
//! Applicability filtering (status, validity window, usage caps,
//! conditions, promo codes), value calculation, stacking resolution, and
//! the capped cart totals. Promo-code matching is case-insensitive, and a
//! code that cannot apply is reported with one of the six literal reasons.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info};

use tradewind_storage::{Filter, Storage};

use crate::calculator::calculate;
use crate::conditions::evaluate_conditions;
use crate::error::DiscountError;
use crate::stacking::{select, Candidate};
use crate::types::{
    AppliedDiscount, CartContext, Discount, DiscountStatus, DiscountTarget, EvaluationResult,
    RejectedCode, StackingStrategy,
};

pub(crate) const DISCOUNTS: &str = "discounts";
pub(crate) const USAGES: &str = "discount_usages";
pub(crate) const CODES: &str = "discount_codes";

/// Rejection reasons (wire-visible literals).
pub const REASON_INVALID_CODE: &str = "Invalid code";
pub const REASON_NOT_ACTIVE: &str = "Discount is not active";
pub const REASON_NOT_YET_VALID: &str = "Discount is not yet valid";
pub const REASON_EXPIRED: &str = "Discount has expired";
pub const REASON_USAGE_LIMIT: &str = "Discount usage limit reached";
pub const REASON_CONDITIONS: &str = "Conditions not met";

/// Alphabet for generated promo codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;

/// Outcome of validating a single promo code.
#[derive(Debug, Clone)]
pub struct CodeValidation {
    pub valid: bool,
    pub discount_id: Option<String>,
    pub reason: Option<String>,
}

/// The discount engine over the store.
pub struct DiscountEngine {
    storage: Arc<dyn Storage>,
}

impl DiscountEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate every stored discount against a cart under a stacking
    /// strategy.
    pub async fn evaluate(
        &self,
        cart: &CartContext,
        strategy: StackingStrategy,
    ) -> Result<EvaluationResult, DiscountError> {
        let discounts = self.load_discounts().await?;
        let now = cart.evaluation_date.unwrap_or_else(Utc::now);

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut rejected: Vec<RejectedCode> = Vec::new();

        // Automatic discounts: everything without a code
        for (index, discount) in discounts.iter().enumerate() {
            if discount.code.is_some() {
                continue;
            }
            if self.check_applicable(discount, cart, now).await.is_err() {
                continue;
            }
            if let Some(application) = calculate(discount, cart) {
                candidates.push(Candidate {
                    discount: discount.clone(),
                    application,
                    index,
                });
            }
        }

        // Applied promo codes, case-insensitively matched
        for code in &cart.applied_codes {
            let matched = discounts.iter().enumerate().find(|(_, discount)| {
                discount
                    .code
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(code))
            });
            let Some((index, discount)) = matched else {
                rejected.push(RejectedCode {
                    code: code.clone(),
                    reason: REASON_INVALID_CODE.to_string(),
                });
                continue;
            };
            // The same code listed twice applies once
            if candidates.iter().any(|candidate| candidate.index == index) {
                continue;
            }
            match self.check_applicable(discount, cart, now).await {
                Err(reason) => rejected.push(RejectedCode {
                    code: code.clone(),
                    reason: reason.to_string(),
                }),
                Ok(()) => {
                    if let Some(application) = calculate(discount, cart) {
                        candidates.push(Candidate {
                            discount: discount.clone(),
                            application,
                            index,
                        });
                    }
                }
            }
        }

        let selected = select(candidates, strategy);
        debug!(applied = selected.len(), rejected = rejected.len(), "discounts resolved");

        let subtotal = cart.subtotal();
        let raw_cart: f64 = selected
            .iter()
            .filter(|c| !matches!(c.discount.target, DiscountTarget::Shipping))
            .map(|c| c.application.amount)
            .sum();
        let raw_shipping: f64 = selected
            .iter()
            .filter(|c| matches!(c.discount.target, DiscountTarget::Shipping))
            .map(|c| c.application.amount)
            .sum();
        let total_discount = raw_cart.min(subtotal);
        let shipping_discount = raw_shipping.min(cart.shipping_amount);
        let final_total =
            (subtotal - total_discount + cart.shipping_amount - shipping_discount).max(0.0);

        let applied_discounts = selected
            .into_iter()
            .map(|candidate| AppliedDiscount {
                discount_id: candidate.discount.id.clone(),
                name: candidate.discount.name.clone(),
                code: candidate.discount.code.clone(),
                target_key: candidate.discount.target.key(),
                stacking: candidate.discount.stacking,
                priority: candidate.discount.priority,
                amount: candidate.application.amount,
                applied_to_items: candidate.application.applied_to_items,
            })
            .collect();

        Ok(EvaluationResult {
            subtotal,
            total_discount,
            shipping_amount: cart.shipping_amount,
            shipping_discount,
            final_total,
            applied_discounts,
            rejected_codes: rejected,
        })
    }

    /// Validate one promo code against a cart without applying anything.
    pub async fn validate_code(
        &self,
        code: &str,
        cart: &CartContext,
    ) -> Result<CodeValidation, DiscountError> {
        let discounts = self.load_discounts().await?;
        let now = cart.evaluation_date.unwrap_or_else(Utc::now);
        let matched = discounts.iter().find(|discount| {
            discount
                .code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code))
        });
        let Some(discount) = matched else {
            return Ok(CodeValidation {
                valid: false,
                discount_id: None,
                reason: Some(REASON_INVALID_CODE.to_string()),
            });
        };
        Ok(match self.check_applicable(discount, cart, now).await {
            Ok(()) => CodeValidation {
                valid: true,
                discount_id: Some(discount.id.clone()),
                reason: None,
            },
            Err(reason) => CodeValidation {
                valid: false,
                discount_id: Some(discount.id.clone()),
                reason: Some(reason.to_string()),
            },
        })
    }

    /// Preconditions shared by evaluation and code validation. The Err
    /// carries the literal reason.
    async fn check_applicable(
        &self,
        discount: &Discount,
        cart: &CartContext,
        now: DateTime<Utc>,
    ) -> Result<(), &'static str> {
        match discount.status {
            DiscountStatus::Active => {}
            DiscountStatus::Inactive => return Err(REASON_NOT_ACTIVE),
            DiscountStatus::Expired => return Err(REASON_EXPIRED),
        }
        if discount.valid_from.is_some_and(|from| now < from) {
            return Err(REASON_NOT_YET_VALID);
        }
        if discount.valid_until.is_some_and(|until| now > until) {
            return Err(REASON_EXPIRED);
        }
        if discount
            .usage_limit
            .is_some_and(|limit| discount.current_usage >= limit)
        {
            return Err(REASON_USAGE_LIMIT);
        }
        if let (Some(limit), Some(customer_id)) = (
            discount.usage_limit_per_customer,
            cart.customer.as_ref().and_then(|c| c.id.as_deref()),
        ) {
            let used = self
                .customer_usage_count(&discount.id, customer_id)
                .await
                .unwrap_or(0);
            if used >= limit {
                return Err(REASON_USAGE_LIMIT);
            }
        }
        if !evaluate_conditions(&discount.conditions, cart) {
            return Err(REASON_CONDITIONS);
        }
        Ok(())
    }

    // =========================================================================
    // Usage ledger
    // =========================================================================

    /// Record one redemption: appends a ledger row and bumps the
    /// discount's `currentUsage`. Refuses to push past `usageLimit`.
    pub async fn record_usage(
        &self,
        discount_id: &str,
        customer_id: Option<&str>,
    ) -> Result<Discount, DiscountError> {
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        let mut discount: Discount = match repository.find_by_id(discount_id).await? {
            Some(document) => decode(document)?,
            None => return Err(DiscountError::DiscountNotFound(discount_id.to_string())),
        };
        if discount
            .usage_limit
            .is_some_and(|limit| discount.current_usage >= limit)
        {
            return Err(DiscountError::UsageLimitReached(discount_id.to_string()));
        }

        let usages = self.storage.ensure_collection(USAGES).await;
        usages
            .create(json!({
                "discountId": discount_id,
                "customerId": customer_id,
                "usedAt": Utc::now(),
            }))
            .await?;

        discount.current_usage += 1;
        discount.updated_at = Utc::now();
        repository.update(discount_id, encode(&discount)?).await?;
        info!(%discount_id, usage = discount.current_usage, "recorded discount usage");
        Ok(discount)
    }

    async fn customer_usage_count(
        &self,
        discount_id: &str,
        customer_id: &str,
    ) -> Result<u64, DiscountError> {
        let usages = self.storage.ensure_collection(USAGES).await;
        let mut filter = Filter::eq("discountId", Value::String(discount_id.to_string()));
        filter
            .0
            .insert("customerId".to_string(), Value::String(customer_id.to_string()));
        Ok(usages.find_all(Some(&filter)).await?.len() as u64)
    }

    // =========================================================================
    // Code generation
    // =========================================================================

    /// Batch-generate unique uppercase codes for a discount.
    pub async fn generate_codes(
        &self,
        discount_id: &str,
        count: usize,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, DiscountError> {
        let discounts = self.storage.ensure_collection(DISCOUNTS).await;
        if discounts.find_by_id(discount_id).await?.is_none() {
            return Err(DiscountError::DiscountNotFound(discount_id.to_string()));
        }
        let codes = self.storage.ensure_collection(CODES).await;
        let mut existing: Vec<String> = codes
            .find_all(None)
            .await?
            .iter()
            .filter_map(|row| row.get("code").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let mut generated = Vec::with_capacity(count);
        let mut rng = rand::thread_rng();
        while generated.len() < count {
            let suffix: String = (0..CODE_LENGTH)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            let code = format!("{}{}", prefix.unwrap_or("").to_uppercase(), suffix);
            if existing.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
                continue;
            }
            codes
                .create(json!({
                    "discountId": discount_id,
                    "code": code,
                    "createdAt": Utc::now(),
                }))
                .await?;
            existing.push(code.clone());
            generated.push(code);
        }
        info!(%discount_id, count = generated.len(), "generated discount codes");
        Ok(generated)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// All stored discounts in insertion order.
    pub async fn load_discounts(&self) -> Result<Vec<Discount>, DiscountError> {
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        repository
            .find_all(None)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, DiscountError> {
    serde_json::to_value(value).map_err(|e| DiscountError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, DiscountError> {
    serde_json::from_value(document).map_err(|e| DiscountError::Corrupt(e.to_string()))
}
