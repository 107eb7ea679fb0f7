use crate::{
    backend::StorefrontBackend,
    config::{CheckoutConfig, SessionConfig},
    errors::CheckoutError,
    events::{Event, EventSender},
    models::{
        CartSnapshot, DeliveryAddress, OrderId, PayableReference, PaymentMethod, PaymentResult,
        PaymentSession, PaymentStatus, PriceBreakdown, SessionPhase,
    },
    services::{
        commerce::{
            address_service::AddressResolver,
            cart_service::{CartAggregator, PricingPolicy},
            order_service::{OrderCreator, OrderDraft, OrderIntent},
        },
        payments::{
            PaymentConfirmer, PaymentLinkProvider, PaymentStatusPoller, PollOutcome,
            SuccessStatuses,
        },
    },
};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// The collaborators a checkout session drives.
pub struct CheckoutServices {
    pub cart: CartAggregator,
    pub addresses: AddressResolver,
    pub orders: OrderCreator,
    pub payment_links: PaymentLinkProvider,
    pub poller: PaymentStatusPoller,
    pub confirmer: PaymentConfirmer,
    pub events: EventSender,
}

impl CheckoutServices {
    pub fn new(
        backend: Arc<dyn StorefrontBackend>,
        config: &CheckoutConfig,
        events: EventSender,
    ) -> Self {
        let success = SuccessStatuses::from(&config.payment);
        Self {
            cart: CartAggregator::new(PricingPolicy::from(&config.pricing)),
            addresses: AddressResolver::new(),
            orders: OrderCreator::new(backend.clone()),
            payment_links: PaymentLinkProvider::new(backend.clone()),
            poller: PaymentStatusPoller::new(
                backend.clone(),
                config.session.poll_interval(),
                success.clone(),
            ),
            confirmer: PaymentConfirmer::new(backend, success, config.payment.currency.clone()),
            events,
        }
    }
}

/// Per-session timing and redirect targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub countdown: Duration,
    pub return_url: String,
    pub cancel_url: String,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            countdown: config.countdown(),
            return_url: config.return_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// What the shopper chose on the checkout screen.
#[derive(Clone, Debug, Default)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub cart: CartSnapshot,
    pub redeemed_points: Option<i64>,
    pub addresses: Vec<DeliveryAddress>,
    pub selected_address: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub note: Option<String>,
}

/// Read-only view of a session, published on every tick and transition.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub order_id: Option<OrderId>,
    pub breakdown: Option<PriceBreakdown>,
    pub remaining_seconds: u64,
    pub payable_reference: Option<PayableReference>,
    pub result: Option<PaymentResult>,
    pub last_error: Option<CheckoutError>,
}

impl SessionSnapshot {
    fn idle(session_id: Uuid) -> Self {
        Self {
            session_id,
            phase: SessionPhase::Idle,
            order_id: None,
            breakdown: None,
            remaining_seconds: 0,
            payable_reference: None,
            result: None,
            last_error: None,
        }
    }
}

/// Counters over the countdown/poller pair of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    pub countdowns_started: u64,
    pub pollers_started: u64,
    /// Times a running countdown/poller pair was cancelled.
    pub cancellations: u64,
    /// Timer tasks that have not exited yet.
    pub live_tasks: u64,
}

#[derive(Default)]
struct TimerCounters {
    countdowns_started: AtomicU64,
    pollers_started: AtomicU64,
    cancellations: AtomicU64,
    live_tasks: AtomicU64,
}

impl TimerCounters {
    fn stats(&self) -> TimerStats {
        TimerStats {
            countdowns_started: self.countdowns_started.load(Ordering::SeqCst),
            pollers_started: self.pollers_started.load(Ordering::SeqCst),
            cancellations: self.cancellations.load(Ordering::SeqCst),
            live_tasks: self.live_tasks.load(Ordering::SeqCst),
        }
    }
}

/// Counts a timer task as live until the task drops it.
struct LiveTask(Arc<TimerCounters>);

impl LiveTask {
    fn enter(counters: &Arc<TimerCounters>) -> Self {
        counters.live_tasks.fetch_add(1, Ordering::SeqCst);
        Self(counters.clone())
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.0.live_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held while a confirmation is in flight.
struct ConfirmingGuard<'a>(&'a AtomicBool);

impl<'a> ConfirmingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConfirmingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum ConfirmTrigger {
    Shopper,
    Poller,
}

struct SessionState {
    phase: SessionPhase,
    intent: Option<OrderIntent>,
    breakdown: Option<PriceBreakdown>,
    payment: Option<PaymentSession>,
    result: Option<PaymentResult>,
    last_error: Option<CheckoutError>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            intent: None,
            breakdown: None,
            payment: None,
            result: None,
            last_error: None,
        }
    }

    fn order_id(&self) -> Option<&OrderId> {
        self.payment.as_ref().map(|p| &p.order.order_id)
    }
}

struct SessionInner {
    id: Uuid,
    services: Arc<CheckoutServices>,
    settings: SessionSettings,
    /// Single writer for every transition.
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
    /// Cancelled on teardown; parent of every timer token.
    shutdown: CancellationToken,
    /// Token of the running countdown/poller pair, if any.
    timers: StdMutex<Option<CancellationToken>>,
    counters: Arc<TimerCounters>,
    confirming: AtomicBool,
}

impl SessionInner {
    fn timers(&self) -> StdMutexGuard<'_, Option<CancellationToken>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    fn ensure_open(&self) -> Result<(), CheckoutError> {
        if self.shutdown.is_cancelled() {
            Err(CheckoutError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn publish(&self, state: &SessionState) -> SessionSnapshot {
        let snapshot = SessionSnapshot {
            session_id: self.id,
            phase: state.phase,
            order_id: state.order_id().cloned(),
            breakdown: state.breakdown,
            remaining_seconds: state
                .payment
                .as_ref()
                .map(|p| p.remaining_seconds)
                .unwrap_or(0),
            payable_reference: state
                .payment
                .as_ref()
                .and_then(|p| p.payable_reference.clone()),
            result: state.result.clone(),
            last_error: state.last_error.clone(),
        };
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    fn transition(&self, state: &mut SessionState, to: SessionPhase) {
        let from = state.phase;
        if from == to {
            return;
        }
        state.phase = to;
        info!(session_id = %self.id, %from, %to, "Checkout phase changed");
        self.services
            .events
            .send_or_log(Event::phase_changed(from, to));
        if to.is_terminal() {
            self.stop_timers();
        }
    }

    fn fail(&self, state: &mut SessionState, error: CheckoutError) -> SessionSnapshot {
        warn!(session_id = %self.id, error = %error, "Checkout failed");
        let order_id = state.order_id().map(ToString::to_string);
        state.last_error = Some(error.clone());
        self.transition(state, SessionPhase::Failed);
        self.services.events.send_or_log(Event::CheckoutFailed {
            order_id,
            reason: error.to_string(),
        });
        self.publish(state)
    }

    /// Records a failure that leaves the phase unchanged.
    fn keep_with_error(&self, state: &mut SessionState, error: &CheckoutError) {
        state.last_error = Some(error.clone());
        self.publish(state);
    }

    fn countdown_secs(&self) -> u64 {
        self.settings.countdown.as_secs()
    }

    fn start_timers(self: &Arc<Self>, state: &SessionState) {
        let Some(order_id) = state.order_id().cloned() else {
            return;
        };

        let token = self.shutdown.child_token();
        if let Some(previous) = self.timers().replace(token.clone()) {
            previous.cancel();
            self.counters.cancellations.fetch_add(1, Ordering::SeqCst);
        }

        let started = Instant::now();
        let deadline = started + self.settings.countdown;
        self.counters
            .countdowns_started
            .fetch_add(1, Ordering::SeqCst);
        self.counters.pollers_started.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(run_countdown(
            Arc::downgrade(self),
            token.clone(),
            started,
            deadline,
            LiveTask::enter(&self.counters),
        ));
        tokio::spawn(run_poller(
            Arc::downgrade(self),
            token,
            self.services.poller.clone(),
            order_id,
            LiveTask::enter(&self.counters),
        ));
        debug!(session_id = %self.id, countdown_secs = self.countdown_secs(), "Timers started");
    }

    /// Cancels the running countdown/poller pair. Safe to call repeatedly.
    fn stop_timers(&self) -> bool {
        let Some(token) = self.timers().take() else {
            return false;
        };
        token.cancel();
        self.counters.cancellations.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = %self.id, "Timers cancelled");
        true
    }

    fn teardown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(session_id = %self.id, "Tearing down checkout session");
        }
        self.stop_timers();
        self.shutdown.cancel();
    }

    fn prepare(&self, request: &CheckoutRequest) -> Result<OrderDraft, CheckoutError> {
        let breakdown = self
            .services
            .cart
            .compute(&request.cart, request.redeemed_points)?;
        let address = self
            .services
            .addresses
            .resolve(&request.addresses, request.selected_address.as_deref())?;
        self.services.orders.prepare(
            &request.user_id,
            &request.cart,
            breakdown,
            &address,
            request.payment_method,
            request.note.as_deref(),
        )
    }

    async fn submit(
        self: &Arc<Self>,
        request: CheckoutRequest,
    ) -> Result<SessionSnapshot, CheckoutError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        match state.phase {
            SessionPhase::Idle => {}
            phase if phase.is_terminal() => {
                debug!(session_id = %self.id, %phase, "Ignoring submit on finished session");
                return Ok(self.current());
            }
            phase => {
                return Err(CheckoutError::InvalidTransition {
                    from: phase,
                    action: "submit an order",
                })
            }
        }

        let draft = match self.prepare(&request) {
            Ok(draft) => draft,
            Err(e) => {
                self.keep_with_error(&mut state, &e);
                return Err(e);
            }
        };

        let intent = OrderIntent::reuse_or_new(state.intent.as_ref(), draft);
        if state.intent.as_ref().map(|i| &i.token) == Some(&intent.token) {
            info!(session_id = %self.id, token = %intent.token, "Retrying order submission");
        }
        state.intent = Some(intent.clone());
        state.breakdown = Some(intent.draft.breakdown);

        let submitted = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(CheckoutError::SessionClosed),
            result = self.services.orders.submit(&intent) => result,
        };
        let order = match submitted {
            Ok(order) => order,
            Err(e) if e.is_retryable() => {
                self.keep_with_error(&mut state, &e);
                return Err(e);
            }
            Err(e) => {
                self.fail(&mut state, e.clone());
                return Err(e);
            }
        };

        self.services.events.send_or_log(Event::OrderSubmitted {
            order_id: order.order_id.to_string(),
            total: order.breakdown.total,
            payment_method: order.payment_method,
        });
        state.payment = Some(PaymentSession {
            payment_method: order.payment_method,
            order,
            payable_reference: None,
            remaining_seconds: self.countdown_secs(),
        });
        state.last_error = None;
        self.transition(&mut state, SessionPhase::OrderSubmitted);
        self.publish(&state);

        self.setup_payment(&mut state).await
    }

    async fn retry_payment_setup(self: &Arc<Self>) -> Result<SessionSnapshot, CheckoutError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        match state.phase {
            SessionPhase::OrderSubmitted => self.setup_payment(&mut state).await,
            phase if phase.is_terminal() => Ok(self.current()),
            phase => Err(CheckoutError::InvalidTransition {
                from: phase,
                action: "retry payment setup",
            }),
        }
    }

    /// Moves an `OrderSubmitted` session on: cash orders are confirmed
    /// straight away, everything else waits on a payment link.
    async fn setup_payment(
        self: &Arc<Self>,
        state: &mut SessionState,
    ) -> Result<SessionSnapshot, CheckoutError> {
        let Some(order) = state.payment.as_ref().map(|p| p.order.clone()) else {
            return Err(CheckoutError::InvalidTransition {
                from: state.phase,
                action: "set up payment",
            });
        };

        if order.payment_method.is_cash() {
            let confirmed = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(CheckoutError::SessionClosed),
                result = self.services.confirmer.confirm_cash(&order) => result,
            };
            return match confirmed {
                Ok(result) => {
                    self.services.events.send_or_log(Event::PaymentConfirmed {
                        order_id: order.order_id.to_string(),
                        amount: result.amount,
                        verified: result.verified,
                    });
                    state.result = Some(result);
                    state.last_error = None;
                    self.transition(state, SessionPhase::Confirmed);
                    Ok(self.publish(state))
                }
                Err(e) if e.is_retryable() => {
                    self.keep_with_error(state, &e);
                    Err(e)
                }
                Err(e) => {
                    self.fail(state, e.clone());
                    Err(e)
                }
            };
        }

        let linked = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(CheckoutError::SessionClosed),
            result = self.services.payment_links.get_payable_reference(
                &order,
                &self.settings.return_url,
                &self.settings.cancel_url,
            ) => result,
        };
        match linked {
            Ok(reference) => {
                self.services.events.send_or_log(Event::PaymentLinkIssued {
                    order_id: order.order_id.to_string(),
                    order_code: reference.order_code,
                    amount: reference.amount,
                });
                let countdown = self.countdown_secs();
                if let Some(payment) = state.payment.as_mut() {
                    payment.payable_reference = Some(reference);
                    payment.remaining_seconds = countdown;
                }
                state.last_error = None;
                self.transition(state, SessionPhase::AwaitingPayment);
                self.start_timers(state);
                Ok(self.publish(state))
            }
            Err(e) if e.is_retryable() => {
                self.keep_with_error(state, &e);
                Err(e)
            }
            Err(e) => {
                self.fail(state, e.clone());
                Err(e)
            }
        }
    }

    /// Verifies and confirms the payment, then commits `Confirmed` if the
    /// session is still awaiting payment. The network part runs outside the
    /// state lock so expiry and cancellation are never blocked by it.
    async fn confirm(&self, trigger: ConfirmTrigger) -> Result<SessionSnapshot, CheckoutError> {
        self.ensure_open()?;
        let (order, reference, token, _confirming) = {
            let state = self.state.lock().await;
            match state.phase {
                SessionPhase::AwaitingPayment => {}
                phase if phase.is_terminal() => {
                    debug!(
                        session_id = %self.id,
                        %phase,
                        %trigger,
                        "Ignoring confirmation on finished session"
                    );
                    return Ok(self.current());
                }
                phase => {
                    return Err(CheckoutError::InvalidTransition {
                        from: phase,
                        action: "confirm payment",
                    })
                }
            }
            let confirming = ConfirmingGuard::acquire(&self.confirming)
                .ok_or(CheckoutError::ConfirmationInProgress)?;
            let (order, reference) = match state.payment.as_ref() {
                Some(PaymentSession {
                    order,
                    payable_reference: Some(reference),
                    ..
                }) => (order.clone(), reference.clone()),
                _ => {
                    return Err(CheckoutError::InvalidTransition {
                        from: state.phase,
                        action: "confirm payment",
                    })
                }
            };
            let token = self.timers().clone().ok_or(CheckoutError::SessionClosed)?;
            (order, reference, token, confirming)
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.services.confirmer.verify_and_confirm(&order, &reference) => Some(result),
        };

        let mut state = self.state.lock().await;
        let outcome = match outcome {
            Some(outcome)
                if !token.is_cancelled() && state.phase == SessionPhase::AwaitingPayment =>
            {
                outcome
            }
            _ => {
                debug!(
                    session_id = %self.id,
                    phase = %state.phase,
                    %trigger,
                    "Discarding confirmation result for a session that moved on"
                );
                return Ok(self.current());
            }
        };

        match outcome {
            Ok(result) => {
                self.services.events.send_or_log(Event::PaymentConfirmed {
                    order_id: order.order_id.to_string(),
                    amount: result.amount,
                    verified: result.verified,
                });
                if let Some(payment) = state.payment.as_mut() {
                    payment.order.payment_status = PaymentStatus::Paid;
                }
                state.result = Some(result);
                state.last_error = None;
                self.transition(&mut state, SessionPhase::Confirmed);
                Ok(self.publish(&state))
            }
            Err(e @ CheckoutError::ConfirmationRejected(_)) => {
                self.fail(&mut state, e.clone());
                Err(e)
            }
            Err(e) => {
                if trigger == ConfirmTrigger::Shopper {
                    self.keep_with_error(&mut state, &e);
                } else {
                    debug!(
                        session_id = %self.id,
                        error = %e,
                        "Poll-triggered verification did not pass"
                    );
                }
                Err(e)
            }
        }
    }

    async fn cancel(&self) -> Result<SessionSnapshot, CheckoutError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let from = state.phase;
        if from.is_terminal() {
            debug!(session_id = %self.id, phase = %from, "Ignoring cancel on finished session");
            return Ok(self.current());
        }
        let order_id = state.order_id().map(ToString::to_string);
        self.transition(&mut state, SessionPhase::Cancelled);
        self.services
            .events
            .send_or_log(Event::CheckoutCancelled { order_id, phase: from });
        Ok(self.publish(&state))
    }

    async fn tick(&self, token: &CancellationToken, remaining: u64) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() || state.phase != SessionPhase::AwaitingPayment {
            return;
        }
        if let Some(payment) = state.payment.as_mut() {
            payment.remaining_seconds = remaining;
        }
        self.publish(&state);
    }

    async fn expire(&self, token: &CancellationToken) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() || state.phase != SessionPhase::AwaitingPayment {
            debug!(session_id = %self.id, phase = %state.phase, "Ignoring late expiry");
            return;
        }
        if let Some(payment) = state.payment.as_mut() {
            payment.remaining_seconds = 0;
        }
        let order_id = state
            .order_id()
            .map(ToString::to_string)
            .unwrap_or_default();
        warn!(session_id = %self.id, %order_id, "Payment window expired");
        self.transition(&mut state, SessionPhase::Expired);
        self.services
            .events
            .send_or_log(Event::CheckoutExpired { order_id });
        self.publish(&state);
    }
}

fn remaining_seconds(deadline: Instant, now: Instant) -> u64 {
    let left = deadline.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}

async fn run_countdown(
    session: Weak<SessionInner>,
    token: CancellationToken,
    started: Instant,
    deadline: Instant,
    _live: LiveTask,
) {
    let mut ticker = time::interval_at(started + COUNTDOWN_TICK, COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = session.upgrade() else {
            break;
        };
        let remaining = remaining_seconds(deadline, Instant::now());
        if remaining == 0 {
            inner.expire(&token).await;
            break;
        }
        inner.tick(&token, remaining).await;
    }
}

async fn run_poller(
    session: Weak<SessionInner>,
    token: CancellationToken,
    poller: PaymentStatusPoller,
    order_id: OrderId,
    _live: LiveTask,
) {
    let mut ticker = poller.ticker();
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = poller.poll_once(&order_id) => outcome,
        };
        if token.is_cancelled() {
            debug!(%order_id, "Discarding poll result after the session moved on");
            break;
        }
        if let PollOutcome::Paid(_) = outcome {
            let Some(inner) = session.upgrade() else {
                break;
            };
            match inner.confirm(ConfirmTrigger::Poller).await {
                Ok(_) => {}
                Err(CheckoutError::ConfirmationInProgress) => {
                    debug!(%order_id, "Shopper confirmation already in flight");
                }
                Err(e) => {
                    debug!(%order_id, error = %e, "Payment reported but not yet confirmed");
                }
            }
        }
    }
}

/// One checkout attempt: order submission, payment link, countdown, polling
/// and the final confirmation.
///
/// All transitions go through a single async mutex. The countdown and the
/// poller run as separate tasks that hold only a weak reference to the
/// session and a cancellation token, and re-check both before each side
/// effect. Terminal phases are absorbing: later events are ignored.
///
/// Dropping the session tears it down.
pub struct CheckoutSession {
    inner: Arc<SessionInner>,
}

impl CheckoutSession {
    pub fn new(services: Arc<CheckoutServices>, settings: SessionSettings) -> Self {
        let id = Uuid::new_v4();
        let (snapshots, _) = watch::channel(SessionSnapshot::idle(id));
        Self {
            inner: Arc::new(SessionInner {
                id,
                services,
                settings,
                state: Mutex::new(SessionState::new()),
                snapshots,
                shutdown: CancellationToken::new(),
                timers: StdMutex::new(None),
                counters: Arc::new(TimerCounters::default()),
                confirming: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.snapshots.borrow().phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.current()
    }

    /// Receives a new snapshot on every tick and transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn timer_stats(&self) -> TimerStats {
        self.inner.counters.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// `Idle -> OrderSubmitted -> AwaitingPayment | Confirmed`.
    ///
    /// Validation and transport failures leave the session `Idle`; a
    /// retry with an unchanged request reuses the idempotency token.
    #[instrument(skip(self, request), fields(session_id = %self.inner.id))]
    pub async fn submit(&self, request: CheckoutRequest) -> Result<SessionSnapshot, CheckoutError> {
        self.inner.submit(request).await
    }

    /// Retries the payment link or cash confirmation after a transient failure.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn retry_payment_setup(&self) -> Result<SessionSnapshot, CheckoutError> {
        self.inner.retry_payment_setup().await
    }

    /// The shopper says they have paid. Only commits after verification.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn confirm_paid(&self) -> Result<SessionSnapshot, CheckoutError> {
        self.inner.confirm(ConfirmTrigger::Shopper).await
    }

    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn cancel(&self) -> Result<SessionSnapshot, CheckoutError> {
        self.inner.cancel().await
    }

    /// Stops both timers and closes the session regardless of phase.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

/// Keeps at most one live checkout session.
pub struct CheckoutManager {
    services: Arc<CheckoutServices>,
    settings: SessionSettings,
    current: Mutex<Option<Arc<CheckoutSession>>>,
}

impl CheckoutManager {
    pub fn new(services: Arc<CheckoutServices>, settings: SessionSettings) -> Self {
        Self {
            services,
            settings,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(
        backend: Arc<dyn StorefrontBackend>,
        config: &CheckoutConfig,
        events: EventSender,
    ) -> Self {
        Self::new(
            Arc::new(CheckoutServices::new(backend, config, events)),
            SessionSettings::from(&config.session),
        )
    }

    /// Tears down the current session, if any, and starts a fresh one.
    pub async fn begin(&self) -> Arc<CheckoutSession> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!(session_id = %previous.id(), "Replacing active checkout session");
            previous.teardown();
        }
        let session = Arc::new(CheckoutSession::new(
            self.services.clone(),
            self.settings.clone(),
        ));
        *current = Some(session.clone());
        session
    }

    pub async fn current(&self) -> Option<Arc<CheckoutSession>> {
        self.current.lock().await.clone()
    }

    pub async fn end(&self) {
        if let Some(session) = self.current.lock().await.take() {
            session.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MockStorefrontBackend, PaymentConfirmation},
        models::CartLine,
    };
    use assert_matches::assert_matches;

    const ADDRESS: &str = "64b7f0c2a1d3e4f5a6b7c8d9";

    fn services(mock: MockStorefrontBackend) -> Arc<CheckoutServices> {
        let (events, _rx) = EventSender::channel(16);
        Arc::new(CheckoutServices::new(
            Arc::new(mock),
            &CheckoutConfig::default(),
            events,
        ))
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            user_id: "user-1".into(),
            cart: CartSnapshot::new(vec![CartLine::new("sku-1", 150_000, 3)]),
            redeemed_points: None,
            addresses: vec![DeliveryAddress {
                id: ADDRESS.into(),
                recipient_name: "A".into(),
                phone: "0900000000".into(),
                line: "1 Le Loi".into(),
                is_default: true,
            }],
            selected_address: Some(ADDRESS.into()),
            payment_method: Some(method),
            note: None,
        }
    }

    #[test]
    fn remaining_rounds_up() {
        let now = Instant::now();
        assert_eq!(remaining_seconds(now + Duration::from_millis(1500), now), 2);
        assert_eq!(remaining_seconds(now + Duration::from_secs(3), now), 3);
        assert_eq!(remaining_seconds(now, now + Duration::from_secs(1)), 0);
    }

    #[tokio::test]
    async fn cash_order_confirms_without_timers() {
        let mut mock = MockStorefrontBackend::new();
        mock.expect_create_order()
            .times(1)
            .returning(|_| Ok(OrderId::new("65f1c2d3e4f5a6b7c8d9e0f1")));
        mock.expect_confirm_payment().times(1).returning(|_| {
            Ok(PaymentConfirmation {
                code: Some("00".into()),
                desc: None,
                data: None,
            })
        });
        mock.expect_create_payment_link().never();

        let session = CheckoutSession::new(services(mock), SessionSettings::default());
        let snapshot = session
            .submit(request(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        assert_eq!(snapshot.phase, SessionPhase::Confirmed);
        assert_eq!(snapshot.breakdown.map(|b| b.total), Some(480_000));
        let result = snapshot.result.unwrap();
        assert!(!result.verified);
        assert_eq!(result.raw_status, "PENDING");
        assert_eq!(session.timer_stats(), TimerStats::default());
    }

    #[tokio::test]
    async fn validation_errors_never_reach_backend() {
        let mut mock = MockStorefrontBackend::new();
        mock.expect_create_order().never();
        let session = CheckoutSession::new(services(mock), SessionSettings::default());

        let mut bad = request(PaymentMethod::BankTransfer);
        bad.selected_address = Some("123".into());
        assert_matches!(
            session.submit(bad).await,
            Err(CheckoutError::MalformedAddressId(_))
        );

        let mut no_method = request(PaymentMethod::BankTransfer);
        no_method.payment_method = None;
        assert_matches!(
            session.submit(no_method).await,
            Err(CheckoutError::MissingPaymentMethod)
        );
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn confirm_before_payment_link_is_invalid() {
        let session = CheckoutSession::new(
            services(MockStorefrontBackend::new()),
            SessionSettings::default(),
        );
        assert_matches!(
            session.confirm_paid().await,
            Err(CheckoutError::InvalidTransition {
                from: SessionPhase::Idle,
                ..
            })
        );
    }

    #[tokio::test]
    async fn rejected_order_fails_session() {
        let mut mock = MockStorefrontBackend::new();
        mock.expect_create_order()
            .returning(|_| Err(CheckoutError::OrderRejected("out of stock".into())));
        let session = CheckoutSession::new(services(mock), SessionSettings::default());

        assert_matches!(
            session.submit(request(PaymentMethod::BankTransfer)).await,
            Err(CheckoutError::OrderRejected(_))
        );
        assert_eq!(session.phase(), SessionPhase::Failed);

        // absorbing
        let snapshot = session.cancel().await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Failed);
    }

    #[tokio::test]
    async fn torn_down_session_refuses_work() {
        let session = CheckoutSession::new(
            services(MockStorefrontBackend::new()),
            SessionSettings::default(),
        );
        session.teardown();
        session.teardown();
        assert!(session.is_closed());
        assert_matches!(session.cancel().await, Err(CheckoutError::SessionClosed));
    }
}
