//! Domain models - money and core cash-handling types
//!
//! - `Money` - integer-cent amounts
//! - `TubeInventory` - coin tube counts reported by the changer
//! - `TubeStatusEvent` / `PaymentCompletedEvent` - events published to the HTTP layer
//! - `Device`, `SessionId`, `SessionStatus` - identifiers and lifecycle

pub mod money;
pub mod types;

pub use money::Money;
