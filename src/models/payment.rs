use serde::{Deserialize, Serialize};

use super::order::{Order, PaymentMethod};

/// Lifecycle phase of a checkout session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum SessionPhase {
    Idle,
    OrderSubmitted,
    AwaitingPayment,
    /// Terminal: payment verified (or cash order acknowledged).
    Confirmed,
    /// Terminal: shopper gave up.
    Cancelled,
    /// Terminal: countdown reached zero.
    Expired,
    /// Terminal: unrecoverable backend rejection.
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Confirmed
                | SessionPhase::Cancelled
                | SessionPhase::Expired
                | SessionPhase::Failed
        )
    }
}

/// Bank account details the transfer has to match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterAccount {
    pub bank_id: Option<String>,
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
}

/// Everything a payer needs to complete a bank transfer for one order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayableReference {
    /// Hosted checkout page, when the provider issues one.
    pub payment_url: Option<String>,

    /// EMV/VietQR payload to render as a QR code.
    pub qr_code: Option<String>,

    pub account_number: String,

    pub reference: String,

    pub payment_link_id: String,

    /// Numeric order code the provider matches transfers against.
    pub order_code: i64,

    pub counter_account: CounterAccount,

    /// Exact amount, in minor units, the payer must transfer.
    pub amount: i64,

    /// Exact transfer description the payer must reproduce.
    pub description: String,
}

impl PayableReference {
    /// Payload to encode into the QR image; falls back to the redirect URL.
    pub fn qr_payload(&self) -> Option<&str> {
        self.qr_code.as_deref().or(self.payment_url.as_deref())
    }
}

/// Payment status as reported by the backend for one order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePaymentStatus {
    pub status: String,
    /// Paid amount in minor units. Pending payloads often leave it out.
    pub amount: Option<i64>,
}

/// Outcome recorded when a session enters `Confirmed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub verified: bool,
    pub amount: i64,
    pub raw_status: String,
}

/// Per-attempt payment state, owned by the checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub order: Order,
    pub payment_method: PaymentMethod,
    pub payable_reference: Option<PayableReference>,
    pub remaining_seconds: u64,
}
