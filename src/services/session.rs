//! Payment session state machine
//!
//! `Idle → AwaitingPayment → Completed → Idle`. Pure state: no I/O, no clock.
//! The controller drives the devices around it.

use crate::domain::types::{PaymentCompletedEvent, SessionId, SessionStatus};
use crate::domain::Money;
use crate::services::acceptance::{select_tier, AcceptanceTier, TIERS};
use crate::services::error::{ControllerError, Result};

pub const COMPLETED_MESSAGE: &str = "Pago completado";
pub const IN_PROGRESS_MESSAGE: &str = "Pago en progreso";

/// Result of a session reaching its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub session_id: SessionId,
    pub target: Money,
    pub total_paid: Money,
    pub change: Money,
}

impl Completion {
    pub fn event(&self) -> PaymentCompletedEvent {
        PaymentCompletedEvent {
            session_id: self.session_id,
            message: COMPLETED_MESSAGE.to_string(),
            total_paid: self.total_paid.to_string(),
            change: self.change.is_positive().then(|| self.change.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    InProgress { accumulated: Money, remaining: Money },
    Completed(Completion),
    NoSession,
    /// Credit would overflow the accumulated total; session left unchanged
    Overflow,
}

#[derive(Debug)]
pub struct PaymentSession {
    id: SessionId,
    status: SessionStatus,
    target: Money,
    accumulated: Money,
    tier: &'static AcceptanceTier,
}

impl PaymentSession {
    pub fn idle() -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Idle,
            target: Money::ZERO,
            accumulated: Money::ZERO,
            tier: &TIERS[0],
        }
    }

    /// Start a new session, discarding whatever the previous one held
    pub fn begin(&mut self, target: Money) -> Result<SessionId> {
        if !target.is_positive() {
            return Err(ControllerError::InvalidAmount);
        }
        self.id = SessionId::new();
        self.status = SessionStatus::AwaitingPayment;
        self.target = target;
        self.accumulated = Money::ZERO;
        self.tier = select_tier(target);
        Ok(self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::AwaitingPayment
    }

    /// Bill allowed by the tier the session was opened with
    pub fn accepts_bill(&self, bill: Money) -> bool {
        self.is_active() && self.tier.accepts(bill)
    }

    pub fn credit(&mut self, value: Money) -> CreditOutcome {
        if !self.is_active() {
            return CreditOutcome::NoSession;
        }

        let Some(accumulated) = self.accumulated.checked_add(value) else {
            return CreditOutcome::Overflow;
        };
        self.accumulated = accumulated;
        if self.accumulated >= self.target {
            self.status = SessionStatus::Completed;
            return CreditOutcome::Completed(Completion {
                session_id: self.id,
                target: self.target,
                total_paid: self.accumulated,
                change: self.accumulated - self.target,
            });
        }

        CreditOutcome::InProgress {
            accumulated: self.accumulated,
            remaining: self.target - self.accumulated,
        }
    }

    pub fn reset(&mut self) {
        self.status = SessionStatus::Idle;
        self.target = Money::ZERO;
        self.accumulated = Money::ZERO;
        self.tier = &TIERS[0];
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn target(&self) -> Money {
        self.target
    }

    pub fn accumulated(&self) -> Money {
        self.accumulated
    }

    pub fn tier(&self) -> &'static AcceptanceTier {
        self.tier
    }
}

impl Default for PaymentSession {
    fn default() -> Self {
        Self::idle()
    }
}
