//! Request payloads and response normalization for the storefront backend.
//!
//! Backend responses are not uniform: the same datum may sit at `data.orderId`
//! or at `data.order._id`, and status may be spelled `paymentStatus` or
//! `status`. Each response is normalized here, once, into a model type.
//! Shapes that are not listed are rejected rather than guessed at.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::CheckoutError,
    models::{
        CounterAccount, OrderId, PayableReference, PaymentMethod, PaymentStatus,
        RemotePaymentStatus,
    },
    services::payments::SuccessStatuses,
};

pub const DEFAULT_CURRENCY: &str = "VND";

/// Backend call being performed; decides which error a refusal maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    CreateOrder,
    CreatePaymentLink,
    PaymentStatus,
    ConfirmPayment,
}

impl Operation {
    pub fn rejected(self, message: impl Into<String>) -> CheckoutError {
        let message = message.into();
        match self {
            Operation::CreateOrder => CheckoutError::OrderRejected(message),
            Operation::CreatePaymentLink => CheckoutError::PaymentLinkRejected(message),
            Operation::PaymentStatus => CheckoutError::StatusUnavailable(message),
            Operation::ConfirmPayment => CheckoutError::ConfirmationRejected(message),
        }
    }
}

// ==================== Requests ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemPayload {
    pub product_id: String,
    pub quantity: i64,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub new_order_id: String,
    pub user_id: String,
    pub delivery_address_id: String,
    pub cart_items: Vec<CartItemPayload>,
    pub subtotal: i64,
    pub discount: i64,
    pub shipping_fee: i64,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `POST orders` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOrderRequest {
    pub order: OrderPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkOrder {
    pub order_id: String,
    pub amount: i64,
    pub description: String,
    pub items: Vec<CartItemPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkMetadata {
    pub cancel_url: String,
    pub return_url: String,
}

/// `POST payments/payment-link` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkRequest {
    pub order: PaymentLinkOrder,
    pub meta_data: PaymentLinkMetadata,
}

/// `POST payments/confirm` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub order_id: String,
    pub order_code: i64,
    pub amount: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub account_number: String,
    pub reference: String,
    pub description: String,
    pub transaction_date_time: DateTime<Utc>,
}

// ==================== Responses ====================

/// Common response envelope: `{success, data, message}` or `{code, desc, data}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.success
            .unwrap_or_else(|| self.code.as_deref() == Some("00"))
    }

    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.desc.clone())
            .unwrap_or_else(|| "request was rejected".to_string())
    }

    /// Returns `data` parsed as `T`, or the refusal mapped for `operation`.
    fn into_data<T: DeserializeOwned>(self, operation: Operation) -> Result<T, CheckoutError> {
        if !self.is_success() {
            return Err(operation.rejected(self.failure_message()));
        }
        let data = self.data.ok_or_else(|| {
            CheckoutError::UnrecognizedResponse(format!("{} response has no data", operation))
        })?;
        serde_json::from_value(data).map_err(|e| {
            CheckoutError::UnrecognizedResponse(format!("{} response: {}", operation, e))
        })
    }
}

#[derive(Debug, Deserialize)]
struct NestedOrderId {
    #[serde(rename = "_id", alias = "orderId")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreatedOrderShape {
    Flat {
        #[serde(rename = "orderId")]
        order_id: String,
    },
    Nested {
        order: NestedOrderId,
    },
}

pub fn normalize_order_created(envelope: ApiEnvelope) -> Result<OrderId, CheckoutError> {
    let shape: CreatedOrderShape = envelope.into_data(Operation::CreateOrder)?;
    let id = match shape {
        CreatedOrderShape::Flat { order_id } => order_id,
        CreatedOrderShape::Nested { order } => order.id,
    };
    if id.trim().is_empty() {
        return Err(CheckoutError::UnrecognizedResponse(
            "create_order response carries an empty order id".to_string(),
        ));
    }
    Ok(OrderId::new(id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentLinkData {
    #[serde(default, alias = "checkoutUrl")]
    payment_url: Option<String>,
    #[serde(default)]
    qr_code: Option<String>,
    account_number: String,
    reference: String,
    payment_link_id: String,
    #[serde(default)]
    order_code: Option<i64>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    counter_account_bank_id: Option<String>,
    #[serde(default)]
    counter_account_bank_name: Option<String>,
    #[serde(default)]
    counter_account_name: Option<String>,
    #[serde(default)]
    counter_account_number: Option<String>,
}

/// Normalizes a payment-link response. `fallback_order_code` is used when the
/// provider does not echo one back.
pub fn normalize_payment_link(
    envelope: ApiEnvelope,
    request: &PaymentLinkRequest,
    fallback_order_code: i64,
) -> Result<PayableReference, CheckoutError> {
    let data: PaymentLinkData = envelope.into_data(Operation::CreatePaymentLink)?;

    let payment_url = data.payment_url.filter(|u| !u.trim().is_empty());
    let qr_code = data.qr_code.filter(|q| !q.trim().is_empty());
    if payment_url.is_none() && qr_code.is_none() {
        return Err(CheckoutError::UnrecognizedResponse(
            "payment link response carries neither paymentUrl nor qrCode".to_string(),
        ));
    }

    if let Some(amount) = data.amount {
        if amount != request.order.amount {
            return Err(CheckoutError::PaymentLinkRejected(format!(
                "payment link amount {} does not match order total {}",
                amount, request.order.amount
            )));
        }
    }

    Ok(PayableReference {
        payment_url,
        qr_code,
        account_number: data.account_number,
        reference: data.reference,
        payment_link_id: data.payment_link_id,
        order_code: data.order_code.unwrap_or(fallback_order_code),
        counter_account: CounterAccount {
            bank_id: data.counter_account_bank_id,
            bank_name: data.counter_account_bank_name,
            account_name: data.counter_account_name,
            account_number: data.counter_account_number,
        },
        amount: request.order.amount,
        description: data
            .description
            .unwrap_or_else(|| request.order.description.clone()),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusFields {
    #[serde(alias = "status")]
    payment_status: String,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaymentStatusShape {
    Flat(StatusFields),
    Nested { order: StatusFields },
}

pub fn normalize_payment_status(
    envelope: ApiEnvelope,
) -> Result<RemotePaymentStatus, CheckoutError> {
    let fields = match envelope.into_data(Operation::PaymentStatus)? {
        PaymentStatusShape::Flat(fields) => fields,
        PaymentStatusShape::Nested { order } => order,
    };
    // A paid status without an amount cannot be verified
    if fields.amount.is_none() && SuccessStatuses::default().contains(&fields.payment_status) {
        return Err(CheckoutError::UnrecognizedResponse(format!(
            "{} reported {} without an amount",
            Operation::PaymentStatus,
            fields.payment_status
        )));
    }
    Ok(RemotePaymentStatus {
        status: fields.payment_status,
        amount: fields.amount,
    })
}

/// Acknowledgement of a confirm-payment call.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub code: Option<String>,
    pub desc: Option<String>,
    pub data: Option<Value>,
}

pub fn normalize_confirmation(envelope: ApiEnvelope) -> Result<PaymentConfirmation, CheckoutError> {
    if !envelope.is_success() {
        return Err(Operation::ConfirmPayment.rejected(envelope.failure_message()));
    }
    Ok(PaymentConfirmation {
        code: envelope.code,
        desc: envelope.desc,
        data: envelope.data,
    })
}
