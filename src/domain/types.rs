//! Shared types for the cash gateway

use crate::domain::money::Money;
use serde::Serialize;
use uuid::Uuid;

/// Newtype wrapper for payment session IDs (UUID v7, time ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial-attached cash devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    BillAcceptor,
    CoinChanger,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::BillAcceptor => "bill_acceptor",
            Device::CoinChanger => "coin_changer",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a credited amount came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditSource {
    Bill,
    Coin,
    /// Operator credit through the HTTP API
    Manual,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Bill => "bill",
            CreditSource::Coin => "coin",
            CreditSource::Manual => "manual",
        }
    }
}

/// Payment session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    AwaitingPayment,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::AwaitingPayment => "awaiting_payment",
            SessionStatus::Completed => "completed",
        }
    }
}

/// Calibrated coin count for one change tube
///
/// Signed: the 0.20 tube reads one below its raw counter, so an empty tube
/// reports -1 and pulls the total down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TubeCount {
    pub denomination: Money,
    pub count: i32,
}

/// Coin tube inventory, rebuilt from every tube status reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TubeInventory {
    tubes: Vec<TubeCount>,
}

impl TubeInventory {
    pub fn new(tubes: Vec<TubeCount>) -> Self {
        Self { tubes }
    }

    pub fn tubes(&self) -> &[TubeCount] {
        &self.tubes
    }

    /// Coins held for a denomination (0 if no tube)
    pub fn count_of(&self, denomination: Money) -> i32 {
        self.tubes
            .iter()
            .find(|t| t.denomination == denomination)
            .map(|t| t.count)
            .unwrap_or(0)
    }

    /// Σ count × denomination
    pub fn total(&self) -> Money {
        self.tubes
            .iter()
            .map(|t| Money::from_cents(t.denomination.cents() * i64::from(t.count)))
            .fold(Money::ZERO, |acc, m| acc + m)
    }
}

/// `tubeStatus` event, emitted once per accepted amount request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TubeStatusEvent {
    #[serde(skip)]
    pub session_id: SessionId,
    pub total: Money,
    /// Bill denominations (whole Bs) currently enabled
    pub accepted_bills: Vec<u32>,
}

/// `paymentCompleted` event, emitted exactly once per completed session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompletedEvent {
    #[serde(skip)]
    pub session_id: SessionId,
    pub message: String,
    /// Two-decimal string, e.g. "7.00"
    pub total_paid: String,
    /// Two-decimal string, `None` when the payment was exact
    pub change: Option<String>,
}

/// Everything published on the event bus
#[derive(Debug, Clone, PartialEq)]
pub enum CashEvent {
    TubeStatus(TubeStatusEvent),
    PaymentCompleted(PaymentCompletedEvent),
}

impl CashEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashEvent::TubeStatus(_) => "tubeStatus",
            CashEvent::PaymentCompleted(_) => "paymentCompleted",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            CashEvent::TubeStatus(e) => e.session_id,
            CashEvent::PaymentCompleted(e) => e.session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_total() {
        let inventory = TubeInventory::new(vec![
            TubeCount { denomination: Money::from_cents(10), count: 5 },
            TubeCount { denomination: Money::from_cents(100), count: 3 },
        ]);
        assert_eq!(inventory.total(), Money::from_cents(350));
        assert_eq!(inventory.count_of(Money::from_cents(100)), 3);
        assert_eq!(inventory.count_of(Money::from_cents(50)), 0);
    }

    #[test]
    fn test_completed_event_json_shape() {
        let event = PaymentCompletedEvent {
            session_id: SessionId::new(),
            message: "Pago completado".to_string(),
            total_paid: "7.00".to_string(),
            change: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": "Pago completado", "totalPaid": "7.00", "change": null})
        );
    }

    #[test]
    fn test_tube_status_json_shape() {
        let event = TubeStatusEvent {
            session_id: SessionId::new(),
            total: Money::from_cents(1250),
            accepted_bills: vec![10, 20],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"total": 12.5, "acceptedBills": [10, 20]}));
    }
}
