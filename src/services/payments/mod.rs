//! Payment link issuance, status polling and final confirmation.

pub mod confirmer;
pub mod payment_link;
pub mod status_poller;

pub use confirmer::PaymentConfirmer;
pub use payment_link::{derive_order_code, payment_description, PaymentLinkProvider};
pub use status_poller::{PaymentStatusPoller, PollOutcome};

use crate::config::PaymentConfig;

/// Case-insensitive allow-list of backend statuses that mean "paid".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuccessStatuses(Vec<String>);

impl SuccessStatuses {
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            statuses
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, status: &str) -> bool {
        let status = status.trim();
        self.0.iter().any(|s| s.eq_ignore_ascii_case(status))
    }
}

impl Default for SuccessStatuses {
    fn default() -> Self {
        Self::from(&PaymentConfig::default())
    }
}

impl From<&PaymentConfig> for SuccessStatuses {
    fn from(config: &PaymentConfig) -> Self {
        Self::new(&config.success_statuses)
    }
}
