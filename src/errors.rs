use serde::Serialize;

use crate::models::payment::SessionPhase;

/// Broad category of a checkout failure.
///
/// Callers use this to decide whether to show a validation message, offer a
/// retry, or end the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input rejected locally, never sent to the network
    Validation,
    /// Network failure talking to the backend
    Transport,
    /// Backend answered but refused or disagreed
    Business,
    /// Operation not permitted in the current session phase
    State,
}

#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum CheckoutError {
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("No delivery address selected")]
    NoAddressSelected,

    #[error("Malformed address id: {0}")]
    MalformedAddressId(String),

    #[error("No payment method selected")]
    MissingPaymentMethod,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Payment link rejected: {0}")]
    PaymentLinkRejected(String),

    #[error("Payment confirmation rejected: {0}")]
    ConfirmationRejected(String),

    #[error("Payment status unavailable: {0}")]
    StatusUnavailable(String),

    #[error("Amount mismatch: expected {expected}, backend reports {actual}")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("Payment not yet received (status: {0})")]
    NotYetPaid(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unrecognized response: {0}")]
    UnrecognizedResponse(String),

    #[error("Cannot {action} while session is {from}")]
    InvalidTransition {
        from: SessionPhase,
        action: &'static str,
    },

    #[error("A payment confirmation is already in progress")]
    ConfirmationInProgress,

    #[error("Checkout session has been closed")]
    SessionClosed,
}

impl From<reqwest::Error> for CheckoutError {
    fn from(err: reqwest::Error) -> Self {
        CheckoutError::Transport(err.to_string())
    }
}

impl CheckoutError {
    /// Classifies the error. This is the single source of truth for the
    /// validation / transport / business split.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCart(_)
            | Self::NoAddressSelected
            | Self::MalformedAddressId(_)
            | Self::MissingPaymentMethod
            | Self::Validation(_) => ErrorKind::Validation,
            Self::Transport(_) | Self::StatusUnavailable(_) => ErrorKind::Transport,
            Self::OrderRejected(_)
            | Self::PaymentLinkRejected(_)
            | Self::ConfirmationRejected(_)
            | Self::AmountMismatch { .. }
            | Self::NotYetPaid(_)
            | Self::UnrecognizedResponse(_) => ErrorKind::Business,
            Self::InvalidTransition { .. } | Self::ConfirmationInProgress | Self::SessionClosed => {
                ErrorKind::State
            }
        }
    }

    /// Whether repeating the same operation may succeed.
    /// A mismatched amount keeps the session open until the countdown ends,
    /// so a later top-up can still be confirmed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::StatusUnavailable(_)
                | Self::NotYetPaid(_)
                | Self::AmountMismatch { .. }
                | Self::ConfirmationInProgress
        )
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Message suitable for showing to the shopper.
    /// Transport and parsing details are replaced with generic text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) | Self::StatusUnavailable(_) => {
                "Could not reach the store. Check your connection and try again.".to_string()
            }
            Self::UnrecognizedResponse(_) => {
                "The store sent an unexpected response. Please try again later.".to_string()
            }
            Self::NotYetPaid(_) => {
                "We have not received your payment yet. Please wait a moment and try again."
                    .to_string()
            }
            Self::AmountMismatch { .. } => {
                "The amount received does not match the order total. Check your transfer."
                    .to_string()
            }
            Self::NoAddressSelected => "Please choose a delivery address.".to_string(),
            Self::MissingPaymentMethod => "Please choose a payment method.".to_string(),
            Self::SessionClosed => "This checkout is no longer active.".to_string(),
            _ => self.to_string(),
        }
    }
}

// Names used by the individual components
pub type InvalidCartError = CheckoutError;
pub type OrderCreationError = CheckoutError;
pub type PaymentLinkError = CheckoutError;
pub type VerificationError = CheckoutError;
