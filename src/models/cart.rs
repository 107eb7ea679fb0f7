use serde::{Deserialize, Serialize};

/// Upper bound on the quantity of a single cart line.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// One product line of the cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Catalog identifier of the product.
    pub product_id: String,

    /// Unit price in minor currency units.
    pub unit_price: i64,

    /// Number of units, 1..=999.
    pub quantity: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, unit_price: i64, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            unit_price,
            quantity,
        }
    }
}

/// Ordered, immutable view of the cart at checkout time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl FromIterator<CartLine> for CartSnapshot {
    fn from_iter<I: IntoIterator<Item = CartLine>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

/// Computed totals for a cart.
///
/// `total = max(0, subtotal - discount) + shipping_fee`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub discount: i64,
    pub shipping_fee: i64,
    pub total: i64,
}
