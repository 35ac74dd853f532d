//! Services - payment logic and state management
//!
//! This module contains the core business logic services:
//! - `bill_evaluator` - Bill frame decoding, debounce and settle windows
//! - `coin_evaluator` - Coin codes and tube status parsing
//! - `acceptance` - Amount-due tiers for the bill acceptor
//! - `change` - Greedy change plan and hopper dispensing
//! - `session` - Payment session state machine
//! - `event_bus` - `tubeStatus` / `paymentCompleted` broadcast
//! - `controller` - Actor that owns the session and drives both devices
//! - `error` - Controller boundary errors

pub mod acceptance;
pub mod bill_evaluator;
pub mod change;
pub mod coin_evaluator;
pub mod controller;
pub mod error;
pub mod event_bus;
pub mod session;

// Re-export commonly used types
pub use controller::{
    create_controller_channel, CashController, ControllerHandle, ControllerRequest,
    ControllerSettings,
};
pub use error::ControllerError;
pub use event_bus::{EventBus, EventSubscription, StatusOutcome};
pub use session::{CreditOutcome, PaymentSession};
