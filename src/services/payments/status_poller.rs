use super::SuccessStatuses;
use crate::{
    backend::StorefrontBackend,
    errors::CheckoutError,
    models::{OrderId, RemotePaymentStatus},
};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Result of one status query.
#[derive(Debug)]
pub enum PollOutcome {
    /// Backend answered with a non-success status.
    Pending(RemotePaymentStatus),
    /// Backend reports a success status; still needs confirmation.
    Paid(RemotePaymentStatus),
    /// Query failed; polling continues on the next tick.
    Unavailable(CheckoutError),
}

impl PollOutcome {
    pub fn is_paid(&self) -> bool {
        matches!(self, PollOutcome::Paid(_))
    }
}

/// Queries the backend for an order's payment status at a fixed interval.
#[derive(Clone)]
pub struct PaymentStatusPoller {
    backend: Arc<dyn StorefrontBackend>,
    interval: Duration,
    success: SuccessStatuses,
}

impl PaymentStatusPoller {
    pub fn new(
        backend: Arc<dyn StorefrontBackend>,
        interval: Duration,
        success: SuccessStatuses,
    ) -> Self {
        Self {
            backend,
            interval,
            success,
        }
    }

    /// Ticker whose first tick fires one full interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub async fn poll_once(&self, order_id: &OrderId) -> PollOutcome {
        match self.backend.payment_status(order_id).await {
            Ok(status) if self.success.contains(&status.status) => {
                debug!(
                    %order_id,
                    status = %status.status,
                    amount = ?status.amount,
                    "Payment reported"
                );
                PollOutcome::Paid(status)
            }
            Ok(status) => {
                debug!(%order_id, status = %status.status, "Payment still pending");
                PollOutcome::Pending(status)
            }
            Err(e) => {
                warn!(%order_id, error = %e, "Payment status query failed");
                PollOutcome::Unavailable(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockStorefrontBackend;
    use assert_matches::assert_matches;

    fn poller(mock: MockStorefrontBackend) -> PaymentStatusPoller {
        PaymentStatusPoller::new(
            Arc::new(mock),
            Duration::from_secs(10),
            SuccessStatuses::default(),
        )
    }

    #[tokio::test]
    async fn classifies_statuses() {
        let mut mock = MockStorefrontBackend::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_payment_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(RemotePaymentStatus {
                    status: "PENDING".into(),
                    amount: None,
                })
            });
        mock.expect_payment_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(RemotePaymentStatus {
                    status: "PAID".into(),
                    amount: Some(480_000),
                })
            });
        mock.expect_payment_status()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CheckoutError::Transport("timeout".into())));

        let poller = poller(mock);
        let id = OrderId::new("65f1c2d3e4f5a6b7c8d9e0f1");
        assert_matches!(poller.poll_once(&id).await, PollOutcome::Pending(_));
        assert!(poller.poll_once(&id).await.is_paid());
        assert_matches!(
            poller.poll_once(&id).await,
            PollOutcome::Unavailable(CheckoutError::Transport(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_interval() {
        let poller = poller(MockStorefrontBackend::new());
        let start = Instant::now();
        let mut ticker = poller.ticker();
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }
}
