//! Change computation and dispensing
//!
//! Greedy over the hopper's fixed ladder. With integer cents the greedy walk is
//! exact for every multiple of 0.10; anything below 0.10 cannot be paid out.

use crate::domain::Money;
use crate::io::commands::DeviceCommand;
use crate::io::device::CommandSink;
use smallvec::SmallVec;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hopper mechanical completion time between dispense commands
pub const DISPENSE_DELAY: Duration = Duration::from_millis(500);

/// Strictly descending (cents, command)
pub const CHANGE_LADDER: [(i64, DeviceCommand); 8] = [
    (300, DeviceCommand::Cambio3Bs),
    (250, DeviceCommand::Cambio2_50Bs),
    (200, DeviceCommand::Cambio2Bs),
    (150, DeviceCommand::Cambio1_50Bs),
    (100, DeviceCommand::Cambio1Bs),
    (50, DeviceCommand::Cambio50Ctvs),
    (20, DeviceCommand::Cambio20Ctvs),
    (10, DeviceCommand::Cambio10Ctvs),
];

/// Dispense commands for one change amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    pub commands: SmallVec<[DeviceCommand; 8]>,
    /// Part of the change the ladder cannot represent
    pub remainder: Money,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sum of the queued commands
    pub fn dispensed(&self) -> Money {
        self.commands
            .iter()
            .filter_map(denomination_of)
            .fold(Money::ZERO, |acc, m| acc + m)
    }
}

/// Value paid out by a dispense command
pub fn denomination_of(command: &DeviceCommand) -> Option<Money> {
    CHANGE_LADDER
        .iter()
        .find(|(_, cmd)| cmd == command)
        .map(|&(cents, _)| Money::from_cents(cents))
}

/// Greedy decomposition of `change` into dispense commands
pub fn compute_commands(change: Money) -> ChangePlan {
    let mut remaining = change.cents().max(0);
    let mut commands = SmallVec::new();

    for &(cents, command) in CHANGE_LADDER.iter() {
        while remaining >= cents {
            commands.push(command);
            remaining -= cents;
        }
    }

    let remainder = Money::from_cents(remaining);
    if !remainder.is_zero() {
        warn!(
            change = %change,
            remainder = %remainder,
            "change_remainder_undispensable"
        );
    }

    ChangePlan { commands, remainder }
}

/// Send the plan to the coin changer one command at a time.
///
/// Returns the number of commands sent.
pub async fn dispense(plan: &ChangePlan, sink: &dyn CommandSink, delay: Duration) -> usize {
    if plan.is_empty() {
        debug!("change_nothing_to_dispense");
        return 0;
    }

    let total = plan.commands.len();
    for (i, command) in plan.commands.iter().enumerate() {
        sink.send(*command).await;
        debug!(command = %command, step = i + 1, of = total, "change_dispense_sent");
        if i + 1 < total {
            tokio::time::sleep(delay).await;
        }
    }

    info!(dispensed = %plan.dispensed(), commands = total, "change_delivered");
    total
}
