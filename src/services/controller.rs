//! Cash controller actor
//!
//! Single owner of the payment session. Device frames and HTTP requests reach
//! it through two mailboxes, so bill and coin credits are serialized without
//! locks. Device commands go out through `CommandSink`s.

use crate::domain::types::{CashEvent, CreditSource, Device, TubeInventory, TubeStatusEvent};
use crate::domain::Money;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::commands::DeviceCommand;
use crate::io::device::CommandSink;
use crate::io::framing::Frame;
use crate::io::serial::DeviceFrame;
use crate::services::bill_evaluator::{BillEvaluator, BillVerdict};
use crate::services::change::{compute_commands, dispense};
use crate::services::coin_evaluator::{evaluate_coin, parse_tube_status};
use crate::services::error::{ControllerError, Result};
use crate::services::event_bus::EventBus;
use crate::services::session::{Completion, CreditOutcome, PaymentSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Timing and threshold knobs of the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub debounce: Duration,
    pub settle: Duration,
    pub hold_delay: Duration,
    pub dispense_delay: Duration,
    pub startup_step: Duration,
    pub tube_status_timeout: Duration,
    pub min_change_float: Money,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms()),
            settle: Duration::from_millis(config.settle_ms()),
            hold_delay: Duration::from_millis(config.hold_delay_ms()),
            dispense_delay: Duration::from_millis(config.dispense_delay_ms()),
            startup_step: Duration::from_millis(config.startup_step_ms()),
            tube_status_timeout: Duration::from_millis(config.tube_status_timeout_ms()),
            min_change_float: config.min_change_float(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Requests from the HTTP side
#[derive(Debug)]
pub enum ControllerRequest {
    RequestAmount { amount: Money, reply: oneshot::Sender<Result<TubeStatusEvent>> },
    Credit { amount: Money, reply: oneshot::Sender<Result<CreditOutcome>> },
}

/// Cloneable front door to the controller task
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerRequest>,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<ControllerRequest>) -> Self {
        Self { tx }
    }

    /// Open a payment session for `amount` and wait for its tube status
    pub async fn request_amount(&self, amount: Money) -> Result<TubeStatusEvent> {
        if !amount.is_positive() {
            return Err(ControllerError::InvalidAmount);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerRequest::RequestAmount { amount, reply })
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        rx.await.map_err(|_| ControllerError::Unavailable)?
    }

    /// Credit the active session as if currency had been inserted
    pub async fn credit(&self, amount: Money) -> Result<CreditOutcome> {
        if !amount.is_positive() {
            return Err(ControllerError::InvalidAmount);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerRequest::Credit { amount, reply })
            .await
            .map_err(|_| ControllerError::Unavailable)?;
        rx.await.map_err(|_| ControllerError::Unavailable)?
    }
}

/// Create the controller request mailbox
///
/// Returns the handle (for HTTP) and the receiver (for the controller task)
pub fn create_controller_channel(
    buffer_size: usize,
) -> (ControllerHandle, mpsc::Receiver<ControllerRequest>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ControllerHandle::new(tx), rx)
}

pub struct CashController {
    settings: ControllerSettings,
    session: PaymentSession,
    bills: BillEvaluator,
    bill_sink: Arc<dyn CommandSink>,
    coin_sink: Arc<dyn CommandSink>,
    bus: EventBus,
    metrics: Arc<Metrics>,
}

impl CashController {
    pub fn new(
        settings: ControllerSettings,
        bill_sink: Arc<dyn CommandSink>,
        coin_sink: Arc<dyn CommandSink>,
        bus: EventBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        let bills = BillEvaluator::new(settings.debounce, settings.settle);
        Self {
            settings,
            session: PaymentSession::idle(),
            bills,
            bill_sink,
            coin_sink,
            bus,
            metrics,
        }
    }

    pub fn session(&self) -> &PaymentSession {
        &self.session
    }

    /// Run until shutdown or until the request mailbox closes
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<DeviceFrame>,
        mut requests: mpsc::Receiver<ControllerRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            min_change_float = %self.settings.min_change_float,
            debounce_ms = %self.settings.debounce.as_millis(),
            settle_ms = %self.settings.settle.as_millis(),
            "cash_controller_started"
        );
        self.start_bill_acceptor().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cash_controller_shutdown");
                        return;
                    }
                }
                Some(frame) = frames.recv() => self.handle_frame(frame).await,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        info!("cash_controller_requests_closed");
                        return;
                    }
                },
            }
        }
    }

    /// Bring the bill acceptor into its waiting state
    pub async fn start_bill_acceptor(&self) {
        self.bill_sink.send(DeviceCommand::InhibitBills).await;
        tokio::time::sleep(self.settings.startup_step).await;
        self.bill_sink.send(DeviceCommand::DesinhibitBilletero).await;
        tokio::time::sleep(self.settings.startup_step).await;
        self.bill_sink.send(DeviceCommand::BilleteroEnEspera).await;
        info!("bill_acceptor_initialized");
    }

    pub async fn handle_request(&mut self, request: ControllerRequest) {
        match request {
            ControllerRequest::RequestAmount { amount, reply } => {
                let result = self.request_amount(amount).await;
                if reply.send(result).is_err() {
                    debug!("request_amount_caller_gone");
                }
            }
            ControllerRequest::Credit { amount, reply } => {
                let outcome = self.manual_credit(amount);
                let completion = match &outcome {
                    Ok(CreditOutcome::Completed(done)) => Some(done.clone()),
                    _ => None,
                };
                if reply.send(outcome).is_err() {
                    debug!("credit_caller_gone");
                }
                if let Some(done) = completion {
                    self.finish(&done, CreditSource::Manual).await;
                }
            }
        }
    }

    /// Open a session and arm both devices for it
    pub async fn request_amount(&mut self, amount: Money) -> Result<TubeStatusEvent> {
        let replaced = self.session.is_active();
        let session_id = match self.session.begin(amount) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_invalid_amount();
                warn!(amount = %amount, "payment_amount_invalid");
                return Err(e);
            }
        };
        if replaced {
            self.metrics.record_session_replaced();
            info!(session_id = %session_id, "payment_session_replaced");
        }
        self.metrics.record_session_started();
        info!(session_id = %session_id, amount = %amount, "payment_requested");

        self.bill_sink.send(DeviceCommand::BillEnables).await;
        self.bill_sink.send(DeviceCommand::DesinhibitBilletero).await;

        let inventory = self.read_tubes().await;
        let float = inventory.total();
        if float >= self.settings.min_change_float {
            self.coin_sink.send(DeviceCommand::EnableMonedero).await;
            info!(session_id = %session_id, change_float = %float, "coin_acceptor_enabled");
        } else {
            self.coin_sink.send(DeviceCommand::InhibitMonedero).await;
            warn!(
                session_id = %session_id,
                change_float = %float,
                required = %self.settings.min_change_float,
                "change_float_insufficient"
            );
        }

        let tier = self.session.tier();
        self.bill_sink.send(DeviceCommand::BilleteroEnEspera).await;
        tokio::time::sleep(self.settings.hold_delay).await;
        self.bill_sink.send(tier.command).await;
        debug!(session_id = %session_id, tier = %tier.command, bills = ?tier.bills, "acceptance_tier_applied");

        let event = TubeStatusEvent { session_id, total: float, accepted_bills: tier.bills.to_vec() };
        self.bus.publish(CashEvent::TubeStatus(event.clone()));
        Ok(event)
    }

    async fn read_tubes(&self) -> TubeInventory {
        match self
            .coin_sink
            .query(DeviceCommand::TubeStatus, self.settings.tube_status_timeout)
            .await
        {
            Some(reply) => {
                let inventory = parse_tube_status(reply.as_bytes());
                debug!(raw = %reply.hex(), total = %inventory.total(), "tube_status_read");
                inventory
            }
            None => {
                warn!(
                    timeout_ms = %self.settings.tube_status_timeout.as_millis(),
                    "tube_status_missing"
                );
                TubeInventory::default()
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: DeviceFrame) {
        self.metrics
            .record_frame_processed(frame.received_at.elapsed().as_micros() as u64);
        match frame.device {
            Device::BillAcceptor => self.handle_bill_frame(&frame.frame, frame.received_at).await,
            Device::CoinChanger => self.handle_coin_frame(&frame.frame).await,
        }
    }

    async fn handle_bill_frame(&mut self, frame: &Frame, now: Instant) {
        match self.bills.screen(frame, now) {
            BillVerdict::Bill(value) if self.session.accepts_bill(value) => {
                self.bill_sink.send(DeviceCommand::AcceptBill).await;
                self.bills.record_stacked(now);
                self.metrics.record_bill_stacked();
                info!(session_id = %self.session.id(), value = %value, "bill_stacked");
                self.credit_and_finish(value, CreditSource::Bill).await;
            }
            BillVerdict::Bill(value) => {
                self.bill_sink.send(DeviceCommand::RejectBill).await;
                self.metrics.record_bill_rejected();
                info!(
                    value = %value,
                    session_active = %self.session.is_active(),
                    "bill_rejected"
                );
            }
            BillVerdict::Noise => {
                self.metrics.record_noise_frame();
                trace!(raw = %frame.hex(), "bill_frame_noise");
            }
            verdict => {
                self.metrics.record_bill_suppressed();
                debug!(verdict = %verdict.as_str(), raw = %frame.hex(), "bill_frame_suppressed");
            }
        }
    }

    async fn handle_coin_frame(&mut self, frame: &Frame) {
        match evaluate_coin(frame) {
            Some(value) if self.session.is_active() => {
                self.metrics.record_coin_accepted();
                info!(session_id = %self.session.id(), value = %value, "coin_accepted");
                self.credit_and_finish(value, CreditSource::Coin).await;
            }
            Some(value) => {
                self.metrics.record_coin_ignored();
                warn!(value = %value, raw = %frame.hex(), "coin_without_session");
            }
            None => {
                self.metrics.record_noise_frame();
                trace!(raw = %frame.hex(), "coin_frame_noise");
            }
        }
    }

    fn manual_credit(&mut self, amount: Money) -> Result<CreditOutcome> {
        if !self.session.is_active() {
            warn!(amount = %amount, "manual_credit_without_session");
            return Err(ControllerError::NoActiveSession);
        }
        match self.credit(amount, CreditSource::Manual) {
            CreditOutcome::Overflow => Err(ControllerError::InvalidAmount),
            outcome => {
                self.metrics.record_manual_credit();
                Ok(outcome)
            }
        }
    }

    async fn credit_and_finish(&mut self, value: Money, source: CreditSource) {
        if let CreditOutcome::Completed(done) = self.credit(value, source) {
            self.finish(&done, source).await;
        }
    }

    fn credit(&mut self, value: Money, source: CreditSource) -> CreditOutcome {
        let outcome = self.session.credit(value);
        match &outcome {
            CreditOutcome::InProgress { accumulated, remaining } => info!(
                session_id = %self.session.id(),
                source = %source.as_str(),
                value = %value,
                accumulated = %accumulated,
                remaining = %remaining,
                "payment_progress"
            ),
            CreditOutcome::Overflow => warn!(
                session_id = %self.session.id(),
                source = %source.as_str(),
                value = %value,
                accumulated = %self.session.accumulated(),
                "credit_overflow"
            ),
            _ => {}
        }
        outcome
    }

    /// Inhibit both devices, announce completion, pay out change, go idle.
    ///
    /// Manual credits never went through the acceptors, so their change is
    /// reported but not dispensed.
    async fn finish(&mut self, done: &Completion, source: CreditSource) {
        self.coin_sink.send(DeviceCommand::InhibitMonedero).await;
        self.bill_sink.send(DeviceCommand::InhibitBills).await;

        self.metrics.record_session_completed(done.total_paid);
        info!(
            session_id = %done.session_id,
            target = %done.target,
            total_paid = %done.total_paid,
            change = %done.change,
            "payment_completed"
        );
        self.bus.publish(CashEvent::PaymentCompleted(done.event()));

        if done.change.is_positive() && source == CreditSource::Manual {
            info!(session_id = %done.session_id, change = %done.change, "change_not_dispensed");
        } else if done.change.is_positive() {
            let plan = compute_commands(done.change);
            if !plan.remainder.is_zero() {
                self.metrics.record_change_shortfall(plan.remainder);
            }
            let sent = dispense(&plan, self.coin_sink.as_ref(), self.settings.dispense_delay).await;
            self.metrics.record_change_commands(sent);
        }

        self.session.reset();
    }
}
