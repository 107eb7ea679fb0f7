use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{PaymentMethod, SessionPhase};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without waiting; a full or closed channel only logs.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping checkout event: {}", e);
        }
    }
}

/// Lifecycle notifications emitted by checkout sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderSubmitted {
        order_id: String,
        total: i64,
        payment_method: PaymentMethod,
    },
    PaymentLinkIssued {
        order_id: String,
        order_code: i64,
        amount: i64,
    },
    PaymentConfirmed {
        order_id: String,
        amount: i64,
        verified: bool,
    },
    CheckoutCancelled {
        order_id: Option<String>,
        phase: SessionPhase,
    },
    CheckoutExpired {
        order_id: String,
    },
    CheckoutFailed {
        order_id: Option<String>,
        reason: String,
    },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn phase_changed(from: SessionPhase, to: SessionPhase) -> Self {
        Event::PhaseChanged {
            from,
            to,
            at: Utc::now(),
        }
    }
}

// Handlers implementing this trait receive every event drained by `dispatch_events`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel, logging each event until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        log_event(&event);
    }

    warn!("Event processing loop has ended");
}

/// Like [`process_events`] but also forwards each event to `handlers`.
pub async fn dispatch_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    while let Some(event) = rx.recv().await {
        log_event(&event);
        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for e in results.into_iter().filter_map(Result::err) {
            warn!("Event handler failed: {}", e);
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::OrderSubmitted {
            order_id,
            total,
            payment_method,
        } => {
            info!(%order_id, total, %payment_method, "Order submitted");
        }
        Event::PaymentLinkIssued {
            order_id,
            order_code,
            amount,
        } => {
            info!(%order_id, order_code, amount, "Payment link issued");
        }
        Event::PaymentConfirmed {
            order_id,
            amount,
            verified,
        } => {
            info!(%order_id, amount, verified, "Payment confirmed");
        }
        Event::CheckoutCancelled { order_id, phase } => {
            info!(order_id = ?order_id, %phase, "Checkout cancelled");
        }
        Event::CheckoutExpired { order_id } => {
            warn!(%order_id, "Checkout expired before payment");
        }
        Event::CheckoutFailed { order_id, reason } => {
            warn!(order_id = ?order_id, %reason, "Checkout failed");
        }
        Event::PhaseChanged { from, to, .. } => {
            info!(%from, %to, "Checkout phase changed");
        }
    }
}
