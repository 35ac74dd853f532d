//! Bill acceptance tiers
//!
//! The amount due decides which bills the acceptor may take, so a customer can
//! never overpay by more than one large bill.

use crate::domain::Money;
use crate::io::commands::DeviceCommand;

/// One row of the tier table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptanceTier {
    /// Inclusive upper bound; `None` is unbounded
    pub upper_bound: Option<Money>,
    /// Bill denominations in whole Bs
    pub bills: &'static [u32],
    pub command: DeviceCommand,
}

impl AcceptanceTier {
    pub fn covers(&self, amount: Money) -> bool {
        self.upper_bound.map_or(true, |bound| amount <= bound)
    }

    pub fn accepts(&self, bill: Money) -> bool {
        self.bills.iter().any(|&units| Money::from_units(i64::from(units)) == bill)
    }
}

/// Ordered ascending by bound
pub const TIERS: [AcceptanceTier; 6] = [
    AcceptanceTier {
        upper_bound: Some(Money::from_cents(510)),
        bills: &[],
        command: DeviceCommand::InhibitBills,
    },
    AcceptanceTier {
        upper_bound: Some(Money::from_cents(1510)),
        bills: &[10],
        command: DeviceCommand::Enable10,
    },
    AcceptanceTier {
        upper_bound: Some(Money::from_cents(4510)),
        bills: &[10, 20],
        command: DeviceCommand::Enable10To20,
    },
    AcceptanceTier {
        upper_bound: Some(Money::from_cents(9510)),
        bills: &[10, 20, 50],
        command: DeviceCommand::Enable10To50,
    },
    AcceptanceTier {
        upper_bound: Some(Money::from_cents(19510)),
        bills: &[10, 20, 50, 100],
        command: DeviceCommand::Enable10To100,
    },
    AcceptanceTier {
        upper_bound: None,
        bills: &[10, 20, 50, 100, 200],
        command: DeviceCommand::Enable10To200,
    },
];

/// First tier whose bound is at or above `amount`
pub fn select_tier(amount: Money) -> &'static AcceptanceTier {
    TIERS.iter().find(|tier| tier.covers(amount)).unwrap_or(&TIERS[TIERS.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert!(select_tier(Money::from_cents(500)).bills.is_empty());
        assert!(select_tier(Money::from_cents(510)).bills.is_empty());
        assert_eq!(select_tier(Money::from_cents(511)).bills, &[10]);
        assert_eq!(select_tier(Money::from_cents(1510)).bills, &[10]);
        assert_eq!(select_tier(Money::from_units(30)).bills, &[10, 20]);
        assert_eq!(select_tier(Money::from_units(95)).bills, &[10, 20, 50]);
        assert_eq!(select_tier(Money::from_units(150)).bills, &[10, 20, 50, 100]);
        assert_eq!(select_tier(Money::from_units(1000)).bills, &[10, 20, 50, 100, 200]);
    }

    #[test]
    fn test_tier_commands() {
        assert_eq!(select_tier(Money::from_units(3)).command, DeviceCommand::InhibitBills);
        assert_eq!(select_tier(Money::from_units(12)).command, DeviceCommand::Enable10);
        assert_eq!(select_tier(Money::from_units(500)).command, DeviceCommand::Enable10To200);
    }

    #[test]
    fn test_tiers_monotonic_in_allowed_set() {
        let mut previous = 0;
        for cents in (10..=30_000).step_by(10) {
            let size = select_tier(Money::from_cents(cents)).bills.len();
            assert!(size >= previous, "tier shrank at {cents} cents");
            previous = size;
        }
    }

    #[test]
    fn test_tiers_sorted_by_bound() {
        let bounds: Vec<_> = TIERS.iter().filter_map(|t| t.upper_bound).collect();
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        assert!(TIERS[TIERS.len() - 1].upper_bound.is_none());
    }

    #[test]
    fn test_accepts() {
        let tier = select_tier(Money::from_units(30));
        assert!(tier.accepts(Money::from_units(20)));
        assert!(!tier.accepts(Money::from_units(50)));
    }
}
