//! Process-wide event bus for `tubeStatus` and `paymentCompleted`
//!
//! Every HTTP status request takes its own subscription, so one slow waiter
//! never consumes an event meant for another.

use crate::domain::types::{CashEvent, PaymentCompletedEvent, TubeStatusEvent};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CashEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, event: CashEvent) -> usize {
        let name = event.as_str();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event = %name, receivers = %receivers, "event_published");
                receivers
            }
            Err(_) => {
                debug!(event = %name, "event_published_no_subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// What a status waiter saw first
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Completed(PaymentCompletedEvent),
    InProgress(TubeStatusEvent),
    TimedOut,
    Closed,
}

pub struct EventSubscription {
    rx: broadcast::Receiver<CashEvent>,
}

impl EventSubscription {
    /// Next event, skipping over a lag gap; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<CashEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "event_subscription_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Already-published event, without waiting
    pub fn try_next(&mut self) -> Option<CashEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "event_subscription_lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait for the first event, up to `timeout`
    pub async fn wait_status(&mut self, timeout: Duration) -> StatusOutcome {
        match tokio::time::timeout(timeout, self.next()).await {
            Ok(Some(CashEvent::PaymentCompleted(event))) => StatusOutcome::Completed(event),
            Ok(Some(CashEvent::TubeStatus(event))) => StatusOutcome::InProgress(event),
            Ok(None) => StatusOutcome::Closed,
            Err(_) => StatusOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SessionId;
    use crate::domain::Money;

    fn completed() -> CashEvent {
        CashEvent::PaymentCompleted(PaymentCompletedEvent {
            session_id: SessionId::new(),
            message: "Pago completado".to_string(),
            total_paid: "5.00".to_string(),
            change: None,
        })
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(completed()), 2);
        assert_eq!(a.next().await.map(|e| e.as_str()), Some("paymentCompleted"));
        assert_eq!(b.next().await.map(|e| e.as_str()), Some("paymentCompleted"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(completed()), 0);
    }

    #[tokio::test]
    async fn test_subscription_only_sees_later_events() {
        let bus = EventBus::default();
        bus.publish(completed());
        let mut sub = bus.subscribe();
        let tube = CashEvent::TubeStatus(TubeStatusEvent {
            session_id: SessionId::new(),
            total: Money::from_cents(490),
            accepted_bills: vec![],
        });
        bus.publish(tube);
        assert!(matches!(
            sub.wait_status(Duration::from_secs(1)).await,
            StatusOutcome::InProgress(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_status_times_out() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        assert_eq!(sub.wait_status(Duration::from_secs(120)).await, StatusOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(completed());
        }
        assert!(sub.next().await.is_some());
    }
}
