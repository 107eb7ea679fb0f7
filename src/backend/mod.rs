//! Boundary to the storefront backend.
//!
//! The checkout core talks to the backend only through [`StorefrontBackend`].
//! Every implementation returns already-normalized values; raw payload shapes
//! never leave [`wire`].

use async_trait::async_trait;

use crate::{
    errors::CheckoutError,
    models::{OrderId, PayableReference, RemotePaymentStatus},
};

pub mod http;
pub mod wire;

pub use http::HttpStorefrontBackend;
pub use wire::{
    ConfirmPaymentRequest, CreateOrderRequest, PaymentConfirmation, PaymentLinkRequest,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorefrontBackend: Send + Sync {
    /// Submits an order and returns the backend-issued identifier.
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, CheckoutError>;

    /// Requests a payment link / QR reference for a submitted order.
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PayableReference, CheckoutError>;

    /// Reads the current payment status of an order.
    async fn payment_status(&self, order_id: &OrderId)
        -> Result<RemotePaymentStatus, CheckoutError>;

    /// Records the payment as confirmed on the backend.
    async fn confirm_payment(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<PaymentConfirmation, CheckoutError>;
}
