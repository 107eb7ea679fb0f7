use crate::{
    backend::{
        wire::{CartItemPayload, OrderPayload},
        CreateOrderRequest, StorefrontBackend,
    },
    errors::{CheckoutError, OrderCreationError},
    models::{
        CartLine, CartSnapshot, DeliveryAddressRef, IdempotencyToken, Order, PaymentMethod,
        PaymentStatus, PriceBreakdown,
    },
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

const MAX_NOTE_LENGTH: usize = 500;
const MAX_USER_ID_LENGTH: usize = 128;

/// Validated contents of an order, before it has an identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: String,
    pub address_ref: DeliveryAddressRef,
    pub lines: Vec<CartLine>,
    pub breakdown: PriceBreakdown,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
}

/// A draft paired with the idempotency token sent as `newOrderId`.
///
/// Retrying the same intent must reuse the token so the backend can
/// deduplicate the submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderIntent {
    pub token: IdempotencyToken,
    pub draft: OrderDraft,
}

impl OrderIntent {
    pub fn new(draft: OrderDraft) -> Self {
        Self {
            token: IdempotencyToken::mint(),
            draft,
        }
    }

    /// Keeps `previous`'s token when the draft is unchanged, otherwise mints a new one.
    pub fn reuse_or_new(previous: Option<&OrderIntent>, draft: OrderDraft) -> Self {
        match previous {
            Some(prev) if prev.draft == draft => Self {
                token: prev.token.clone(),
                draft,
            },
            _ => Self::new(draft),
        }
    }
}

impl From<&OrderIntent> for CreateOrderRequest {
    fn from(intent: &OrderIntent) -> Self {
        let draft = &intent.draft;
        CreateOrderRequest {
            order: OrderPayload {
                new_order_id: intent.token.to_string(),
                user_id: draft.user_id.clone(),
                delivery_address_id: draft.address_ref.to_string(),
                cart_items: cart_items(&draft.lines),
                subtotal: draft.breakdown.subtotal,
                discount: draft.breakdown.discount,
                shipping_fee: draft.breakdown.shipping_fee,
                total: draft.breakdown.total,
                payment_method: draft.payment_method,
                payment_status: PaymentStatus::Pending,
                note: draft.note.clone(),
            },
        }
    }
}

pub(crate) fn cart_items(lines: &[CartLine]) -> Vec<CartItemPayload> {
    lines
        .iter()
        .map(|line| CartItemPayload {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            price: line.unit_price,
        })
        .collect()
}

/// Builds and submits order-creation requests.
#[derive(Clone)]
pub struct OrderCreator {
    backend: Arc<dyn StorefrontBackend>,
}

impl OrderCreator {
    pub fn new(backend: Arc<dyn StorefrontBackend>) -> Self {
        Self { backend }
    }

    /// Validates the inputs of an order without touching the network.
    pub fn prepare(
        &self,
        user_id: &str,
        cart: &CartSnapshot,
        breakdown: PriceBreakdown,
        address_ref: &DeliveryAddressRef,
        payment_method: Option<PaymentMethod>,
        note: Option<&str>,
    ) -> Result<OrderDraft, OrderCreationError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(CheckoutError::Validation("user id is required".to_string()));
        }
        if user_id.len() > MAX_USER_ID_LENGTH {
            return Err(CheckoutError::Validation(format!(
                "user id cannot exceed {} characters",
                MAX_USER_ID_LENGTH
            )));
        }
        let payment_method = payment_method.ok_or(CheckoutError::MissingPaymentMethod)?;

        if cart.is_empty() {
            return Err(CheckoutError::InvalidCart("cart is empty".to_string()));
        }
        if let Some(line) = cart
            .lines
            .iter()
            .find(|l| l.quantity < 1 || l.unit_price < 0)
        {
            return Err(CheckoutError::InvalidCart(format!(
                "line for product {} has quantity {} and price {}",
                line.product_id, line.quantity, line.unit_price
            )));
        }
        if breakdown.total <= 0 {
            return Err(CheckoutError::InvalidCart(
                "order total must be greater than zero".to_string(),
            ));
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if let Some(n) = note {
            if n.chars().count() > MAX_NOTE_LENGTH {
                return Err(CheckoutError::Validation(format!(
                    "note cannot exceed {} characters",
                    MAX_NOTE_LENGTH
                )));
            }
        }

        Ok(OrderDraft {
            user_id: user_id.to_string(),
            address_ref: address_ref.clone(),
            lines: cart.lines.clone(),
            breakdown,
            payment_method,
            note: note.map(str::to_string),
        })
    }

    /// Submits `intent` once. The returned order carries the backend-issued id.
    #[instrument(skip(self, intent), fields(token = %intent.token))]
    pub async fn submit(&self, intent: &OrderIntent) -> Result<Order, OrderCreationError> {
        let request = CreateOrderRequest::from(intent);
        let order_id = self.backend.create_order(&request).await.map_err(|e| {
            warn!(error = %e, "Order submission failed");
            e
        })?;

        if order_id.as_str() != intent.token.as_str() {
            info!(%order_id, "Backend issued its own order id");
        }
        info!(%order_id, total = intent.draft.breakdown.total, "Order created");

        let draft = &intent.draft;
        Ok(Order {
            order_id,
            idempotency_token: intent.token.clone(),
            user_id: draft.user_id.clone(),
            address_ref: draft.address_ref.clone(),
            lines: draft.lines.clone(),
            breakdown: draft.breakdown,
            payment_method: draft.payment_method,
            payment_status: PaymentStatus::Pending,
            note: draft.note.clone(),
        })
    }

    /// One-shot `prepare` + `submit` with a fresh token.
    pub async fn create_order(
        &self,
        user_id: &str,
        cart: &CartSnapshot,
        breakdown: PriceBreakdown,
        address_ref: &DeliveryAddressRef,
        payment_method: PaymentMethod,
        note: Option<&str>,
    ) -> Result<Order, OrderCreationError> {
        let draft = self.prepare(
            user_id,
            cart,
            breakdown,
            address_ref,
            Some(payment_method),
            note,
        )?;
        self.submit(&OrderIntent::new(draft)).await
    }
}
