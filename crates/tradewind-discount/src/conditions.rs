//! Discount-dialect condition evaluation
//!
//! Pure boolean evaluation over a `CartContext`. Conditions that need
//! customer fields fail closed when the customer is absent.

use chrono::Utc;

use crate::types::{CartContext, DiscountCondition};

/// Whether every condition holds. An empty list holds.
pub fn evaluate_conditions(conditions: &[DiscountCondition], cart: &CartContext) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, cart))
}

/// Evaluate one condition with short-circuit combinators.
pub fn evaluate_condition(condition: &DiscountCondition, cart: &CartContext) -> bool {
    match condition {
        DiscountCondition::MinAmount { amount } => cart.subtotal() >= *amount,

        DiscountCondition::MinQuantity {
            quantity,
            product_ids,
        } => {
            let total: u64 = cart
                .items
                .iter()
                .filter(|item| match product_ids {
                    Some(ids) => ids.contains(&item.product_id),
                    None => true,
                })
                .map(|item| item.quantity)
                .sum();
            total >= *quantity
        }

        DiscountCondition::DateRange { start, end } => {
            let now = cart.evaluation_date.unwrap_or_else(Utc::now);
            start.map_or(true, |s| now >= s) && end.map_or(true, |e| now <= e)
        }

        DiscountCondition::CustomerGroup { groups } => cart
            .customer
            .as_ref()
            .is_some_and(|customer| groups.iter().any(|g| customer.groups.contains(g))),

        DiscountCondition::FirstPurchase => cart
            .customer
            .as_ref()
            .and_then(|customer| customer.first_purchase)
            .unwrap_or(false),

        DiscountCondition::CustomerTag { tags } => cart
            .customer
            .as_ref()
            .is_some_and(|customer| tags.iter().any(|t| customer.tags.contains(t))),

        DiscountCondition::RequiredProducts { products } => products
            .iter()
            .all(|required| cart.quantity_of(&required.product_id) >= required.min_quantity),

        DiscountCondition::And { conditions } => {
            conditions.iter().all(|c| evaluate_condition(c, cart))
        }
        DiscountCondition::Or { conditions } => {
            conditions.iter().any(|c| evaluate_condition(c, cart))
        }
        DiscountCondition::Not { condition } => !evaluate_condition(condition, cart),
    }
}
