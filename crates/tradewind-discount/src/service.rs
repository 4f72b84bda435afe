//! Discount service: CRUD plus input validation

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use tradewind_core::ids::new_id;
use tradewind_core::validation::{ValidationIssue, ValidationResult};
use tradewind_storage::Storage;

use crate::engine::DISCOUNTS;
use crate::error::DiscountError;
use crate::types::{
    CreateDiscountInput, Discount, DiscountStatus, DiscountValue, Tier, UpdateDiscountInput,
};

const INVALID_VALUE: &str = "INVALID_VALUE";

fn check_percentage(errors: &mut Vec<ValidationIssue>, field: &str, percentage: f64) {
    if !(0.0..=100.0).contains(&percentage) {
        errors.push(ValidationIssue::new(
            INVALID_VALUE,
            field,
            format!("{field} must lie in [0, 100]"),
        ));
    }
}

fn check_amount(errors: &mut Vec<ValidationIssue>, field: &str, amount: f64) {
    if amount < 0.0 {
        errors.push(ValidationIssue::new(
            INVALID_VALUE,
            field,
            format!("{field} must be non-negative"),
        ));
    }
}

fn check_tiers(errors: &mut Vec<ValidationIssue>, tiers: &[Tier]) {
    for (index, tier) in tiers.iter().enumerate() {
        if let Some(percentage) = tier.percentage {
            check_percentage(errors, &format!("value.tiers[{index}].percentage"), percentage);
        }
        if let Some(fixed) = tier.fixed_amount {
            check_amount(errors, &format!("value.tiers[{index}].fixedAmount"), fixed);
        }
        if tier.percentage.is_none() && tier.fixed_amount.is_none() {
            errors.push(ValidationIssue::new(
                INVALID_VALUE,
                format!("value.tiers[{index}]"),
                "tier needs a percentage or a fixed amount",
            ));
        }
    }
}

/// Validate a discount input document.
pub fn validate_discount(input: &CreateDiscountInput) -> ValidationResult {
    let mut errors = Vec::new();
    if input.name.trim().is_empty() {
        errors.push(ValidationIssue::required("name"));
    }
    match &input.value {
        DiscountValue::Percentage {
            percentage,
            max_amount,
        } => {
            check_percentage(&mut errors, "value.percentage", *percentage);
            if let Some(max_amount) = max_amount {
                check_amount(&mut errors, "value.maxAmount", *max_amount);
            }
        }
        DiscountValue::FixedAmount { amount } => {
            check_amount(&mut errors, "value.amount", *amount);
        }
        DiscountValue::BuyXGetY {
            discount_percentage,
            ..
        } => {
            check_percentage(&mut errors, "value.discountPercentage", *discount_percentage);
        }
        DiscountValue::Tiered { tiers, .. } => check_tiers(&mut errors, tiers),
        DiscountValue::Bundle {
            bundle_price,
            bundle_percentage,
            ..
        } => {
            if let Some(price) = bundle_price {
                check_amount(&mut errors, "value.bundlePrice", *price);
            }
            if let Some(percentage) = bundle_percentage {
                check_percentage(&mut errors, "value.bundlePercentage", *percentage);
            }
        }
        DiscountValue::FreeShipping => {}
    }
    if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
        if from > until {
            errors.push(ValidationIssue::new(
                INVALID_VALUE,
                "validFrom",
                "validFrom must not be after validUntil",
            ));
        }
    }
    ValidationResult::from_errors(errors)
}

/// CRUD surface for discounts.
pub struct DiscountService {
    storage: Arc<dyn Storage>,
}

impl DiscountService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_discount(
        &self,
        input: CreateDiscountInput,
    ) -> Result<Discount, DiscountError> {
        let validation = validate_discount(&input);
        if !validation.valid {
            return Err(DiscountError::Invalid(validation.errors));
        }
        let now = Utc::now();
        let discount = Discount {
            id: new_id(),
            name: input.name,
            description: input.description,
            code: input.code,
            target: input.target,
            value: input.value,
            conditions: input.conditions,
            priority: input.priority,
            stacking: input.stacking,
            usage_limit: input.usage_limit,
            usage_limit_per_customer: input.usage_limit_per_customer,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            current_usage: 0,
            status: input.status.unwrap_or(DiscountStatus::Active),
            created_at: now,
            updated_at: now,
        };
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        repository.create(encode(&discount)?).await?;
        info!(discount_id = %discount.id, name = %discount.name, "created discount");
        Ok(discount)
    }

    pub async fn get_discount(&self, id: &str) -> Result<Option<Discount>, DiscountError> {
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        match repository.find_by_id(id).await? {
            Some(document) => Ok(Some(decode(document)?)),
            None => Ok(None),
        }
    }

    pub async fn list_discounts(&self) -> Result<Vec<Discount>, DiscountError> {
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        repository
            .find_all(None)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Merge the provided fields over the stored discount and revalidate.
    /// `currentUsage` is engine-owned and never patched here.
    pub async fn update_discount(
        &self,
        id: &str,
        input: UpdateDiscountInput,
    ) -> Result<Discount, DiscountError> {
        let mut discount = self
            .get_discount(id)
            .await?
            .ok_or_else(|| DiscountError::DiscountNotFound(id.to_string()))?;
        if let Some(name) = input.name {
            discount.name = name;
        }
        if let Some(description) = input.description {
            discount.description = Some(description);
        }
        if let Some(code) = input.code {
            discount.code = Some(code);
        }
        if let Some(target) = input.target {
            discount.target = target;
        }
        if let Some(value) = input.value {
            discount.value = value;
        }
        if let Some(conditions) = input.conditions {
            discount.conditions = conditions;
        }
        if let Some(priority) = input.priority {
            discount.priority = priority;
        }
        if let Some(stacking) = input.stacking {
            discount.stacking = stacking;
        }
        if let Some(usage_limit) = input.usage_limit {
            discount.usage_limit = Some(usage_limit);
        }
        if let Some(limit) = input.usage_limit_per_customer {
            discount.usage_limit_per_customer = Some(limit);
        }
        if let Some(valid_from) = input.valid_from {
            discount.valid_from = Some(valid_from);
        }
        if let Some(valid_until) = input.valid_until {
            discount.valid_until = Some(valid_until);
        }
        if let Some(status) = input.status {
            discount.status = status;
        }

        let validation = validate_discount(&CreateDiscountInput {
            name: discount.name.clone(),
            description: discount.description.clone(),
            code: discount.code.clone(),
            target: discount.target.clone(),
            value: discount.value.clone(),
            conditions: discount.conditions.clone(),
            priority: discount.priority,
            stacking: discount.stacking,
            usage_limit: discount.usage_limit,
            usage_limit_per_customer: discount.usage_limit_per_customer,
            valid_from: discount.valid_from,
            valid_until: discount.valid_until,
            status: Some(discount.status),
        });
        if !validation.valid {
            return Err(DiscountError::Invalid(validation.errors));
        }

        discount.updated_at = Utc::now();
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        repository.update(id, encode(&discount)?).await?;
        Ok(discount)
    }

    pub async fn delete_discount(&self, id: &str) -> Result<bool, DiscountError> {
        let repository = self.storage.ensure_collection(DISCOUNTS).await;
        Ok(repository.delete(id).await?)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, DiscountError> {
    serde_json::to_value(value).map_err(|e| DiscountError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> Result<T, DiscountError> {
    serde_json::from_value(document).map_err(|e| DiscountError::Corrupt(e.to_string()))
}
