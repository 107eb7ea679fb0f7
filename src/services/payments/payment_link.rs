use crate::{
    backend::{
        wire::{PaymentLinkMetadata, PaymentLinkOrder},
        PaymentLinkRequest, StorefrontBackend,
    },
    errors::{CheckoutError, PaymentLinkError},
    models::{Order, OrderId, PayableReference},
    services::commerce::order_service::cart_items,
};
use std::sync::Arc;
use tracing::{info, instrument};

const ORDER_CODE_HEX_DIGITS: usize = 12;
const ORDER_CODE_MASK: u64 = 0xFFFF_FFFF_FFFF;
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const DESCRIPTION_PREFIX: &str = "ORDER ";
const MAX_DESCRIPTION_LENGTH: usize = 25;

fn tail(id: &str, n: usize) -> &str {
    let start = id
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    &id[start..]
}

/// Numeric code the payment provider matches transfers against.
///
/// Hex ids use their last 12 digits; anything else is hashed (FNV-1a)
/// down to 48 bits. Either way the code fits in a JavaScript-safe integer.
pub fn derive_order_code(order_id: &OrderId) -> i64 {
    let id = order_id.as_str().trim();
    let digits = tail(id, ORDER_CODE_HEX_DIGITS);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(code) = u64::from_str_radix(digits, 16) {
            return (code & ORDER_CODE_MASK) as i64;
        }
    }

    let mut hash = FNV_OFFSET_BASIS;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & ORDER_CODE_MASK) as i64
}

/// Transfer description the payer must reproduce, e.g. `ORDER 0A1B2C3D4E5F`.
pub fn payment_description(order_id: &OrderId) -> String {
    let suffix: String = tail(order_id.as_str().trim(), ORDER_CODE_HEX_DIGITS)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let mut description = format!("{}{}", DESCRIPTION_PREFIX, suffix.to_ascii_uppercase());
    description.truncate(MAX_DESCRIPTION_LENGTH);
    description
}

/// Requests payable references (link, QR, bank details) for non-cash orders.
#[derive(Clone)]
pub struct PaymentLinkProvider {
    backend: Arc<dyn StorefrontBackend>,
}

impl PaymentLinkProvider {
    pub fn new(backend: Arc<dyn StorefrontBackend>) -> Self {
        Self { backend }
    }

    pub fn build_request(order: &Order, return_url: &str, cancel_url: &str) -> PaymentLinkRequest {
        PaymentLinkRequest {
            order: PaymentLinkOrder {
                order_id: order.order_id.to_string(),
                amount: order.breakdown.total,
                description: payment_description(&order.order_id),
                items: cart_items(&order.lines),
            },
            meta_data: PaymentLinkMetadata {
                cancel_url: cancel_url.to_string(),
                return_url: return_url.to_string(),
            },
        }
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn get_payable_reference(
        &self,
        order: &Order,
        return_url: &str,
        cancel_url: &str,
    ) -> Result<PayableReference, PaymentLinkError> {
        if order.payment_method.is_cash() {
            return Err(CheckoutError::Validation(
                "cash orders do not need a payment link".to_string(),
            ));
        }

        let request = Self::build_request(order, return_url, cancel_url);
        let reference = self.backend.create_payment_link(&request).await?;
        info!(
            order_code = reference.order_code,
            amount = reference.amount,
            "Payment link issued"
        );
        Ok(reference)
    }
}
