//! Coin changer frame evaluation and tube status parsing
//!
//! Coin frames run from the 0x06 marker to the 0x10 0x03 trailer. Two coin
//! code schemes are in use on the same line:
//! - multi-byte runs `45 00 45` (5 Bs) and `44 00 44` (2 Bs), anywhere in the frame
//! - a single code at offset 3: 0x40..0x43 or 0x50..0x55

use crate::domain::types::{TubeCount, TubeInventory};
use crate::domain::Money;
use crate::io::framing::Frame;

const CODE_FIVE_BS: [u8; 3] = [0x45, 0x00, 0x45];
const CODE_TWO_BS: [u8; 3] = [0x44, 0x00, 0x44];
const COIN_CODE_OFFSET: usize = 3;

/// Raw tube counters start at byte 5 of the reply (hex chars 10..42)
const TUBE_COUNTER_OFFSET: usize = 5;
const TUBE_COUNTER_LEN: usize = 16;

/// Tube index → denomination in cents, with the sensor calibration offset
const TUBE_LAYOUT: [(i64, i32); 4] = [(10, 1), (20, -1), (50, 2), (100, 5)];

/// Value of an inserted coin, or `None` for anything else on the line
pub fn evaluate_coin(frame: &Frame) -> Option<Money> {
    if frame.contains(&CODE_FIVE_BS) {
        return Some(Money::from_cents(500));
    }
    if frame.contains(&CODE_TWO_BS) {
        return Some(Money::from_cents(200));
    }
    let cents = match frame.as_bytes().get(COIN_CODE_OFFSET)? {
        0x40 | 0x50 => 10,
        0x41 | 0x51 => 20,
        0x42 | 0x52 => 50,
        0x43 | 0x53 => 100,
        0x54 => 200,
        0x55 => 500,
        _ => return None,
    };
    Some(Money::from_cents(cents))
}

/// Build a fresh inventory from a tube status reply.
///
/// Missing counters read as zero. Calibration offsets compensate the
/// changer's reporting bias and are applied as-is, so the 0.20 tube can read
/// -1 when its counter is zero.
pub fn parse_tube_status(reply: &[u8]) -> TubeInventory {
    let counters = reply
        .get(TUBE_COUNTER_OFFSET..)
        .map(|rest| &rest[..rest.len().min(TUBE_COUNTER_LEN)])
        .unwrap_or(&[]);

    let tubes = TUBE_LAYOUT
        .iter()
        .enumerate()
        .map(|(index, &(cents, offset))| {
            let raw = counters.get(index).copied().unwrap_or(0);
            let count = i32::from(raw) + offset;
            TubeCount { denomination: Money::from_cents(cents), count }
        })
        .collect();

    TubeInventory::new(tubes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(bytes: &[u8]) -> Frame {
        Frame::from(bytes)
    }

    #[test]
    fn test_multi_byte_codes_win() {
        // Offset 3 says 0.10, but the 5 Bs run takes precedence
        let frame = coin(&[0x06, 0x00, 0x00, 0x40, 0x45, 0x00, 0x45, 0x10, 0x03]);
        assert_eq!(evaluate_coin(&frame), Some(Money::from_cents(500)));

        let frame = coin(&[0x06, 0x44, 0x00, 0x44, 0x10, 0x03]);
        assert_eq!(evaluate_coin(&frame), Some(Money::from_cents(200)));
    }

    #[test]
    fn test_single_byte_codes() {
        let cases = [
            (0x40, 10),
            (0x41, 20),
            (0x42, 50),
            (0x43, 100),
            (0x50, 10),
            (0x51, 20),
            (0x52, 50),
            (0x53, 100),
            (0x54, 200),
            (0x55, 500),
        ];
        for (code, cents) in cases {
            let frame = coin(&[0x06, 0x00, 0x00, code, 0x10, 0x03]);
            assert_eq!(evaluate_coin(&frame), Some(Money::from_cents(cents)), "code {code:#04x}");
        }
    }

    #[test]
    fn test_unknown_or_short_frame() {
        assert_eq!(evaluate_coin(&coin(&[0x06, 0x00, 0x00, 0x30, 0x10, 0x03])), None);
        assert_eq!(evaluate_coin(&coin(&[0x06, 0x10, 0x03])), None);
    }

    #[test]
    fn test_parse_tube_status_fixture() {
        // 24-byte reply; raw counters 0C 08 06 0A at bytes 5..9
        let reply =
            hex::decode("02000A00000C08060A000000000000000000000000001003").unwrap();
        assert_eq!(reply.len(), 24);

        let inventory = parse_tube_status(&reply);
        assert_eq!(inventory.count_of(Money::from_cents(10)), 13);
        assert_eq!(inventory.count_of(Money::from_cents(20)), 7);
        assert_eq!(inventory.count_of(Money::from_cents(50)), 8);
        assert_eq!(inventory.count_of(Money::from_cents(100)), 15);
        // 1.30 + 1.40 + 4.00 + 15.00
        assert_eq!(inventory.total(), Money::from_cents(2170));
    }

    #[test]
    fn test_parse_tube_status_empty_reply() {
        let inventory = parse_tube_status(&[]);
        // Only the calibration offsets remain
        assert_eq!(inventory.count_of(Money::from_cents(10)), 1);
        assert_eq!(inventory.count_of(Money::from_cents(20)), -1);
        assert_eq!(inventory.count_of(Money::from_cents(50)), 2);
        assert_eq!(inventory.count_of(Money::from_cents(100)), 5);
        // 0.10 - 0.20 + 1.00 + 5.00
        assert_eq!(inventory.total(), Money::from_cents(590));
    }

    #[test]
    fn test_empty_twenty_cent_tube_lowers_total() {
        // Every raw counter zero except the 1.00 tube
        let mut reply = vec![0u8; 24];
        reply[8] = 0x03;
        let inventory = parse_tube_status(&reply);
        assert_eq!(inventory.count_of(Money::from_cents(20)), -1);
        // 0.10 - 0.20 + 1.00 + 8.00
        assert_eq!(inventory.total(), Money::from_cents(890));
    }

    #[test]
    fn test_parse_tube_status_partial_counters() {
        let inventory = parse_tube_status(&[0x02, 0x00, 0x0A, 0x00, 0x00, 0x03]);
        assert_eq!(inventory.count_of(Money::from_cents(10)), 4);
        assert_eq!(inventory.tubes().len(), 4);
    }
}
