//! Discount documents and cart state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discount lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscountStatus {
    Active,
    Inactive,
    Expired,
}

/// Combinability of one discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StackingBehavior {
    #[default]
    Stackable,
    Exclusive,
    ExclusiveByTarget,
}

/// Global policy selecting which applicable discounts apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StackingStrategy {
    None,
    All,
    #[default]
    ByPriority,
    BestCombination,
}

/// What a discount can affect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DiscountTarget {
    Cart,
    Shipping,
    Product { product_ids: Vec<String> },
    Category { category_ids: Vec<String> },
}

impl DiscountTarget {
    /// Stable key for exclusive-by-target bookkeeping. Set-equal id lists
    /// produce the same key.
    pub fn key(&self) -> String {
        match self {
            Self::Cart => "cart".to_string(),
            Self::Shipping => "shipping".to_string(),
            Self::Product { product_ids } => {
                let mut ids = product_ids.clone();
                ids.sort();
                format!("product:{}", ids.join(","))
            }
            Self::Category { category_ids } => {
                let mut ids = category_ids.clone();
                ids.sort();
                format!("category:{}", ids.join(","))
            }
        }
    }
}

/// What the threshold of a tiered discount measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TierBy {
    Amount,
    Quantity,
}

/// One tier of a tiered discount. Exactly one of `percentage` and
/// `fixedAmount` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub threshold: f64,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub fixed_amount: Option<f64>,
}

/// One required line of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleItem {
    pub product_id: String,
    pub quantity: u64,
}

/// How a discount's amount is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DiscountValue {
    Percentage {
        percentage: f64,
        #[serde(default)]
        max_amount: Option<f64>,
    },
    FixedAmount {
        amount: f64,
    },
    BuyXGetY {
        buy_quantity: u64,
        get_quantity: u64,
        discount_percentage: f64,
        #[serde(default)]
        get_product_ids: Option<Vec<String>>,
    },
    Tiered {
        tier_by: TierBy,
        tiers: Vec<Tier>,
    },
    Bundle {
        items: Vec<BundleItem>,
        #[serde(default)]
        bundle_price: Option<f64>,
        #[serde(default)]
        bundle_percentage: Option<f64>,
    },
    FreeShipping,
}

fn default_min_quantity() -> u64 {
    1
}

/// One product demanded by a `requiredProducts` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredProduct {
    pub product_id: String,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: u64,
}

/// Discount-dialect condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DiscountCondition {
    MinAmount {
        amount: f64,
    },
    MinQuantity {
        quantity: u64,
        #[serde(default)]
        product_ids: Option<Vec<String>>,
    },
    DateRange {
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        #[serde(default)]
        end: Option<DateTime<Utc>>,
    },
    CustomerGroup {
        groups: Vec<String>,
    },
    FirstPurchase,
    CustomerTag {
        tags: Vec<String>,
    },
    RequiredProducts {
        products: Vec<RequiredProduct>,
    },
    And {
        conditions: Vec<DiscountCondition>,
    },
    Or {
        conditions: Vec<DiscountCondition>,
    },
    Not {
        condition: Box<DiscountCondition>,
    },
}

/// A stored discount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub target: DiscountTarget,
    pub value: DiscountValue,
    #[serde(default)]
    pub conditions: Vec<DiscountCondition>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub stacking: StackingBehavior,
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default)]
    pub usage_limit_per_customer: Option<u64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing; never exceeds `usageLimit` when set.
    #[serde(default)]
    pub current_usage: u64,
    pub status: DiscountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a discount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscountInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub target: DiscountTarget,
    pub value: DiscountValue,
    #[serde(default)]
    pub conditions: Vec<DiscountCondition>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub stacking: StackingBehavior,
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default)]
    pub usage_limit_per_customer: Option<u64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<DiscountStatus>,
}

/// Input for updating a discount; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDiscountInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub target: Option<DiscountTarget>,
    #[serde(default)]
    pub value: Option<DiscountValue>,
    #[serde(default)]
    pub conditions: Option<Vec<DiscountCondition>>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub stacking: Option<StackingBehavior>,
    #[serde(default)]
    pub usage_limit: Option<u64>,
    #[serde(default)]
    pub usage_limit_per_customer: Option<u64>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<DiscountStatus>,
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub quantity: u64,
    pub unit_price: f64,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// Customer fields the conditions consult. Absent fields fail closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub first_purchase: Option<bool>,
}

/// The cart being evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartContext {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub customer: Option<CustomerInfo>,
    #[serde(default)]
    pub shipping_amount: f64,
    #[serde(default)]
    pub applied_codes: Vec<String>,
    /// Instant the evaluation is pinned to; defaults to now.
    #[serde(default)]
    pub evaluation_date: Option<DateTime<Utc>>,
}

impl CartContext {
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn quantity_of(&self, product_id: &str) -> u64 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity)
            .sum()
    }
}

/// Per-item share of a computed discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedItem {
    pub product_id: String,
    pub amount: f64,
}

/// Result of the value calculator for one discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountApplication {
    pub amount: f64,
    pub applied_to_items: Vec<AppliedItem>,
}

/// One discount actually applied to the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDiscount {
    pub discount_id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub target_key: String,
    pub stacking: StackingBehavior,
    pub priority: i64,
    pub amount: f64,
    pub applied_to_items: Vec<AppliedItem>,
}

/// A promo code that did not apply, with its literal reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedCode {
    pub code: String,
    pub reason: String,
}

/// Outcome of a full cart evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub subtotal: f64,
    pub total_discount: f64,
    pub shipping_amount: f64,
    pub shipping_discount: f64,
    pub final_total: f64,
    pub applied_discounts: Vec<AppliedDiscount>,
    pub rejected_codes: Vec<RejectedCode>,
}
