#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storefront_checkout::{
    backend::{
        ConfirmPaymentRequest, CreateOrderRequest, PaymentConfirmation, PaymentLinkRequest,
        StorefrontBackend,
    },
    config::CheckoutConfig,
    errors::CheckoutError,
    events::{Event, EventSender},
    models::{
        CartLine, CartSnapshot, CounterAccount, DeliveryAddress, OrderId, PayableReference,
        PaymentMethod, RemotePaymentStatus,
    },
    services::commerce::{CheckoutRequest, CheckoutServices, CheckoutSession, SessionSettings},
};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const ORDER_ID: &str = "65f1c2d3e4f5a6b7c8d9e0f1";
pub const ADDRESS_ID: &str = "64b7f0c2a1d3e4f5a6b7c8d9";

/// Backend fake with scripted failures and a clock-driven payment.
#[derive(Default)]
pub struct ScriptedBackend {
    order_outcomes: Mutex<VecDeque<CheckoutError>>,
    link_outcomes: Mutex<VecDeque<CheckoutError>>,
    confirm_outcomes: Mutex<VecDeque<CheckoutError>>,
    status_outcomes: Mutex<VecDeque<CheckoutError>>,
    paid_at: Mutex<Option<Instant>>,
    reported_amount: Mutex<Option<i64>>,
    link_amount: Mutex<Option<i64>>,
    status_delay: Duration,
    pub order_requests: Mutex<Vec<CreateOrderRequest>>,
    pub confirm_requests: Mutex<Vec<ConfirmPaymentRequest>>,
    pub create_order_calls: AtomicUsize,
    pub payment_link_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status query takes `delay` to answer.
    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn fail_next_order(&self, error: CheckoutError) {
        self.order_outcomes.lock().unwrap().push_back(error);
    }

    pub fn fail_next_link(&self, error: CheckoutError) {
        self.link_outcomes.lock().unwrap().push_back(error);
    }

    pub fn fail_next_confirm(&self, error: CheckoutError) {
        self.confirm_outcomes.lock().unwrap().push_back(error);
    }

    pub fn fail_next_status(&self, error: CheckoutError) {
        self.status_outcomes.lock().unwrap().push_back(error);
    }

    /// Status switches to PAID once `after` has elapsed from now.
    pub fn pay_after(&self, after: Duration) {
        *self.paid_at.lock().unwrap() = Some(Instant::now() + after);
    }

    pub fn pay_now(&self) {
        self.pay_after(Duration::ZERO);
    }

    /// Paid amount to report instead of the payment link amount.
    pub fn report_amount(&self, amount: i64) {
        *self.reported_amount.lock().unwrap() = Some(amount);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorefrontBackend for ScriptedBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderId, CheckoutError> {
        self.create_order_calls.fetch_add(1, Ordering::SeqCst);
        self.order_requests.lock().unwrap().push(request.clone());
        match self.order_outcomes.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(OrderId::new(ORDER_ID)),
        }
    }

    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PayableReference, CheckoutError> {
        self.payment_link_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.link_outcomes.lock().unwrap().pop_front() {
            return Err(error);
        }
        *self.link_amount.lock().unwrap() = Some(request.order.amount);
        Ok(PayableReference {
            payment_url: Some(format!("https://pay.example/{}", request.order.order_id)),
            qr_code: Some("00020101021238570010A000000727".to_string()),
            account_number: "0123456789".to_string(),
            reference: "REF-0001".to_string(),
            payment_link_id: "plink_0001".to_string(),
            order_code: 0xa6b7c8d9e0f1,
            counter_account: CounterAccount {
                bank_id: Some("970422".to_string()),
                bank_name: Some("MB Bank".to_string()),
                account_name: Some("STOREFRONT JSC".to_string()),
                account_number: Some("0123456789".to_string()),
            },
            amount: request.order.amount,
            description: request.order.description.clone(),
        })
    }

    async fn payment_status(
        &self,
        _order_id: &OrderId,
    ) -> Result<RemotePaymentStatus, CheckoutError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        if let Some(error) = self.status_outcomes.lock().unwrap().pop_front() {
            return Err(error);
        }
        let paid = self
            .paid_at
            .lock()
            .unwrap()
            .map_or(false, |at| Instant::now() >= at);
        if paid {
            let amount = self
                .reported_amount
                .lock()
                .unwrap()
                .or(*self.link_amount.lock().unwrap());
            Ok(RemotePaymentStatus {
                status: "PAID".to_string(),
                amount,
            })
        } else {
            Ok(RemotePaymentStatus {
                status: "PENDING".to_string(),
                amount: None,
            })
        }
    }

    async fn confirm_payment(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<PaymentConfirmation, CheckoutError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirm_requests.lock().unwrap().push(request.clone());
        match self.confirm_outcomes.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(PaymentConfirmation {
                code: Some("00".to_string()),
                desc: Some("success".to_string()),
                data: None,
            }),
        }
    }
}

pub fn services(backend: Arc<ScriptedBackend>) -> (Arc<CheckoutServices>, mpsc::Receiver<Event>) {
    let (events, rx) = EventSender::channel(256);
    let services = CheckoutServices::new(backend, &CheckoutConfig::default(), events);
    (Arc::new(services), rx)
}

pub fn session(backend: Arc<ScriptedBackend>) -> (CheckoutSession, mpsc::Receiver<Event>) {
    let (services, rx) = services(backend);
    (CheckoutSession::new(services, SessionSettings::default()), rx)
}

pub fn address_book() -> Vec<DeliveryAddress> {
    vec![DeliveryAddress {
        id: ADDRESS_ID.to_string(),
        recipient_name: "Tran Thi B".to_string(),
        phone: "0912345678".to_string(),
        line: "12 Nguyen Hue, District 1".to_string(),
        is_default: true,
    }]
}

/// Subtotal 450,000: below the free-shipping threshold.
pub fn small_cart() -> CartSnapshot {
    CartSnapshot::new(vec![
        CartLine::new("tea-oolong", 150_000, 2),
        CartLine::new("tea-cup", 75_000, 2),
    ])
}

/// Subtotal 600,000: above the free-shipping threshold.
pub fn large_cart() -> CartSnapshot {
    CartSnapshot::new(vec![CartLine::new("tea-set", 300_000, 2)])
}

pub fn request(cart: CartSnapshot, method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        user_id: "user-42".to_string(),
        cart,
        redeemed_points: None,
        addresses: address_book(),
        selected_address: Some(ADDRESS_ID.to_string()),
        payment_method: Some(method),
        note: None,
    }
}

/// Lets spawned timer tasks observe cancellation and exit.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, Event::PhaseChanged { .. }) {
            events.push(event);
        }
    }
    events
}
