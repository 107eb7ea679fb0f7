use super::{derive_order_code, payment_description, SuccessStatuses};
use crate::{
    backend::{ConfirmPaymentRequest, PaymentConfirmation, StorefrontBackend},
    errors::{CheckoutError, VerificationError},
    models::{Order, PayableReference, PaymentMethod, PaymentResult},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const CASH_PENDING_STATUS: &str = "PENDING";

/// Final authority on whether an order has been paid.
///
/// Both the poller and the shopper's "I have paid" action go through
/// [`PaymentConfirmer::verify`]; neither signal is trusted on its own.
#[derive(Clone)]
pub struct PaymentConfirmer {
    backend: Arc<dyn StorefrontBackend>,
    success: SuccessStatuses,
    currency: String,
}

impl PaymentConfirmer {
    pub fn new(
        backend: Arc<dyn StorefrontBackend>,
        success: SuccessStatuses,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            success,
            currency: currency.into(),
        }
    }

    /// Reads the backend's payment state once and checks it.
    ///
    /// Status is checked before amount, so an unpaid order reports
    /// `NotYetPaid` rather than a mismatch against a zero amount.
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn verify(
        &self,
        order: &Order,
        expected_amount: i64,
    ) -> Result<PaymentResult, VerificationError> {
        let remote = self.backend.payment_status(&order.order_id).await?;

        if !self.success.contains(&remote.status) {
            return Err(CheckoutError::NotYetPaid(remote.status));
        }
        let paid = remote.amount.ok_or_else(|| {
            CheckoutError::UnrecognizedResponse(format!(
                "payment status {} carries no amount",
                remote.status
            ))
        })?;
        if paid != expected_amount {
            warn!(
                expected = expected_amount,
                actual = paid,
                "Paid amount does not match"
            );
            return Err(CheckoutError::AmountMismatch {
                expected: expected_amount,
                actual: paid,
            });
        }

        Ok(PaymentResult {
            verified: true,
            amount: paid,
            raw_status: remote.status,
        })
    }

    /// Verifies the transfer, then records the confirmation on the backend.
    pub async fn verify_and_confirm(
        &self,
        order: &Order,
        reference: &PayableReference,
    ) -> Result<PaymentResult, VerificationError> {
        let result = self.verify(order, reference.amount).await?;
        self.finalize(order, reference).await?;
        info!(order_id = %order.order_id, amount = result.amount, "Payment verified and confirmed");
        Ok(result)
    }

    /// Posts the confirm-payment call for a bank transfer.
    #[instrument(skip(self, order, reference), fields(order_id = %order.order_id))]
    pub async fn finalize(
        &self,
        order: &Order,
        reference: &PayableReference,
    ) -> Result<PaymentConfirmation, CheckoutError> {
        let request = ConfirmPaymentRequest {
            order_id: order.order_id.to_string(),
            order_code: reference.order_code,
            amount: reference.amount,
            currency: self.currency.clone(),
            payment_method: PaymentMethod::BankTransfer,
            account_number: reference.account_number.clone(),
            reference: reference.reference.clone(),
            description: reference.description.clone(),
            transaction_date_time: Utc::now(),
        };
        self.backend.confirm_payment(&request).await
    }

    /// Acknowledges a cash-on-delivery order. Nothing has been paid yet.
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn confirm_cash(&self, order: &Order) -> Result<PaymentResult, CheckoutError> {
        if !order.payment_method.is_cash() {
            return Err(CheckoutError::Validation(format!(
                "{} orders need a verified transfer",
                order.payment_method
            )));
        }

        let request = ConfirmPaymentRequest {
            order_id: order.order_id.to_string(),
            order_code: derive_order_code(&order.order_id),
            amount: order.breakdown.total,
            currency: self.currency.clone(),
            payment_method: PaymentMethod::CashOnDelivery,
            account_number: String::new(),
            reference: order.idempotency_token.to_string(),
            description: payment_description(&order.order_id),
            transaction_date_time: Utc::now(),
        };
        self.backend.confirm_payment(&request).await?;
        info!("Cash on delivery order acknowledged");

        Ok(PaymentResult {
            verified: false,
            amount: order.breakdown.total,
            raw_status: CASH_PENDING_STATUS.to_string(),
        })
    }
}
