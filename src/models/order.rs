use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::cart::{CartLine, PriceBreakdown};
use crate::errors::CheckoutError;

static ADDRESS_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("static address id pattern"));

/// Order identifier issued by the backend. Authoritative once creation succeeds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-minted order identifier sent as `newOrderId`.
///
/// Shaped like the backend's own identifiers (24 hex characters). One token
/// is minted per user intent and reused on every retry of that intent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    pub fn mint() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(hex::encode(&bytes[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry of the shopper's address book, as handed over by the profile screens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub recipient_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Validated reference to a delivery address, matching `^[0-9a-fA-F]{24}$`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeliveryAddressRef(String);

impl DeliveryAddressRef {
    pub fn parse(raw: &str) -> Result<Self, CheckoutError> {
        if ADDRESS_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CheckoutError::MalformedAddressId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryAddressRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the shopper pays.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PaymentMethod {
    /// Pay the courier on delivery; no payment link involved.
    CashOnDelivery,
    /// Bank transfer via payment link / QR code.
    BankTransfer,
}

impl PaymentMethod {
    pub fn is_cash(self) -> bool {
        matches!(self, PaymentMethod::CashOnDelivery)
    }
}

/// Payment state of an order. Only the backend advances it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum PaymentStatus {
    Pending,
    Paid,
}

/// A submitted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Authoritative identifier returned by the backend.
    pub order_id: OrderId,

    /// Token the order was submitted with.
    pub idempotency_token: IdempotencyToken,

    pub user_id: String,

    pub address_ref: DeliveryAddressRef,

    pub lines: Vec<CartLine>,

    pub breakdown: PriceBreakdown,

    pub payment_method: PaymentMethod,

    pub payment_status: PaymentStatus,

    pub note: Option<String>,
}
