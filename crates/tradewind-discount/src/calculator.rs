//! Discount value calculation
//!
//! `calculate` returns `None` whenever a discount produces no positive
//! amount: bundle incomplete, no tier met, empty target set. All
//! arithmetic is double precision with no intermediate rounding.

use crate::types::{
    AppliedItem, CartContext, CartItem, Discount, DiscountApplication, DiscountTarget,
    DiscountValue, TierBy,
};

/// Compute the monetary amount a discount takes off this cart.
pub fn calculate(discount: &Discount, cart: &CartContext) -> Option<DiscountApplication> {
    let eligible = eligible_items(&discount.target, &cart.items);
    let application = match &discount.value {
        DiscountValue::Percentage {
            percentage,
            max_amount,
        } => percentage_amount(&eligible, *percentage, *max_amount),
        DiscountValue::FixedAmount { amount } => fixed_amount(&eligible, *amount),
        DiscountValue::BuyXGetY {
            buy_quantity,
            get_quantity,
            discount_percentage,
            get_product_ids,
        } => buy_x_get_y(
            cart,
            &eligible,
            *buy_quantity,
            *get_quantity,
            *discount_percentage,
            get_product_ids.as_deref(),
        ),
        DiscountValue::Tiered { tier_by, tiers } => tiered(&eligible, *tier_by, tiers),
        DiscountValue::Bundle {
            items,
            bundle_price,
            bundle_percentage,
        } => bundle(cart, items, *bundle_price, *bundle_percentage),
        DiscountValue::FreeShipping => free_shipping(cart),
    }?;
    if application.amount > 0.0 {
        Some(application)
    } else {
        None
    }
}

/// The cart lines a target can touch. `shipping` touches none.
fn eligible_items<'a>(target: &DiscountTarget, items: &'a [CartItem]) -> Vec<&'a CartItem> {
    match target {
        DiscountTarget::Cart => items.iter().collect(),
        DiscountTarget::Shipping => Vec::new(),
        DiscountTarget::Product { product_ids } => items
            .iter()
            .filter(|item| product_ids.contains(&item.product_id))
            .collect(),
        DiscountTarget::Category { category_ids } => items
            .iter()
            .filter(|item| {
                item.category_id
                    .as_ref()
                    .is_some_and(|category| category_ids.contains(category))
            })
            .collect(),
    }
}

fn eligible_total(eligible: &[&CartItem]) -> f64 {
    eligible.iter().map(|item| item.line_total()).sum()
}

fn percentage_amount(
    eligible: &[&CartItem],
    percentage: f64,
    max_amount: Option<f64>,
) -> Option<DiscountApplication> {
    let mut remaining = max_amount.unwrap_or(f64::INFINITY);
    let mut applied = Vec::new();
    let mut total = 0.0;
    for item in eligible {
        let line = item.line_total() * percentage / 100.0;
        let take = line.min(remaining);
        if take <= 0.0 {
            break;
        }
        applied.push(AppliedItem {
            product_id: item.product_id.clone(),
            amount: take,
        });
        total += take;
        remaining -= take;
    }
    Some(DiscountApplication {
        amount: total,
        applied_to_items: applied,
    })
}

/// Nominal amount capped at the eligible total, spread proportionally.
fn fixed_amount(eligible: &[&CartItem], amount: f64) -> Option<DiscountApplication> {
    let total = eligible_total(eligible);
    if total <= 0.0 {
        return None;
    }
    let amount = amount.min(total);
    let applied = eligible
        .iter()
        .map(|item| AppliedItem {
            product_id: item.product_id.clone(),
            amount: amount * item.line_total() / total,
        })
        .collect();
    Some(DiscountApplication {
        amount,
        applied_to_items: applied,
    })
}

fn buy_x_get_y(
    cart: &CartContext,
    eligible: &[&CartItem],
    buy_quantity: u64,
    get_quantity: u64,
    discount_percentage: f64,
    get_product_ids: Option<&[String]>,
) -> Option<DiscountApplication> {
    let set_size = buy_quantity + get_quantity;
    if set_size == 0 {
        return None;
    }
    let total_quantity: u64 = eligible.iter().map(|item| item.quantity).sum();
    let free_count = (total_quantity / set_size) * get_quantity;
    if free_count == 0 {
        return None;
    }

    // Cheapest units first, from the get-list when one is configured
    let pool: Vec<&CartItem> = match get_product_ids {
        Some(ids) => cart
            .items
            .iter()
            .filter(|item| ids.contains(&item.product_id))
            .collect(),
        None => eligible.to_vec(),
    };
    let mut units: Vec<(&str, f64)> = Vec::new();
    for item in &pool {
        for _ in 0..item.quantity {
            units.push((item.product_id.as_str(), item.unit_price));
        }
    }
    units.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut applied: Vec<AppliedItem> = Vec::new();
    let mut total = 0.0;
    for (product_id, unit_price) in units.into_iter().take(free_count as usize) {
        let amount = unit_price * discount_percentage / 100.0;
        total += amount;
        match applied.iter_mut().find(|a| a.product_id == product_id) {
            Some(existing) => existing.amount += amount,
            None => applied.push(AppliedItem {
                product_id: product_id.to_string(),
                amount,
            }),
        }
    }
    Some(DiscountApplication {
        amount: total,
        applied_to_items: applied,
    })
}

fn tiered(eligible: &[&CartItem], tier_by: TierBy, tiers: &[crate::types::Tier]) -> Option<DiscountApplication> {
    let total = eligible_total(eligible);
    let threshold_value = match tier_by {
        TierBy::Amount => total,
        TierBy::Quantity => eligible.iter().map(|item| item.quantity).sum::<u64>() as f64,
    };
    // Greatest threshold not exceeding the measured value
    let tier = tiers
        .iter()
        .filter(|tier| tier.threshold <= threshold_value)
        .max_by(|a, b| {
            a.threshold
                .partial_cmp(&b.threshold)
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
    let amount = match (tier.percentage, tier.fixed_amount) {
        (Some(percentage), _) => total * percentage / 100.0,
        (None, Some(fixed)) => fixed.min(total),
        (None, None) => return None,
    };
    if total <= 0.0 {
        return None;
    }
    let applied = eligible
        .iter()
        .map(|item| AppliedItem {
            product_id: item.product_id.clone(),
            amount: amount * item.line_total() / total,
        })
        .collect();
    Some(DiscountApplication {
        amount,
        applied_to_items: applied,
    })
}

fn bundle(
    cart: &CartContext,
    items: &[crate::types::BundleItem],
    bundle_price: Option<f64>,
    bundle_percentage: Option<f64>,
) -> Option<DiscountApplication> {
    if items.is_empty() {
        return None;
    }
    // Every listed line must be satisfied
    for required in items {
        if cart.quantity_of(&required.product_id) < required.quantity {
            return None;
        }
    }
    let unit_price = |product_id: &str| {
        cart.items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.unit_price)
            .unwrap_or(0.0)
    };
    let original: f64 = items
        .iter()
        .map(|required| unit_price(&required.product_id) * required.quantity as f64)
        .sum();
    let amount = match (bundle_price, bundle_percentage) {
        (Some(price), _) => (original - price).max(0.0),
        (None, Some(percentage)) => original * percentage / 100.0,
        (None, None) => return None,
    };
    if original <= 0.0 {
        return None;
    }
    let applied = items
        .iter()
        .map(|required| {
            let share = unit_price(&required.product_id) * required.quantity as f64;
            AppliedItem {
                product_id: required.product_id.clone(),
                amount: amount * share / original,
            }
        })
        .collect();
    Some(DiscountApplication {
        amount,
        applied_to_items: applied,
    })
}

fn free_shipping(cart: &CartContext) -> Option<DiscountApplication> {
    Some(DiscountApplication {
        amount: cart.shipping_amount,
        applied_to_items: Vec::new(),
    })
}
