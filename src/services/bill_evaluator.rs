//! Bill acceptor frame evaluation
//!
//! A frame is the 8-byte chunk read from the acceptor. Only its trailing 7 bytes
//! are meaningful:
//!
//! ```text
//! 02 07 CC <denom> <state> 00 <cs>
//!          01..05  02 | 08
//! ```
//!
//! Two time windows guard against double counting:
//! - debounce: the same chunk repeated within 200 ms is line echo
//! - settle: for 1500 ms after a bill is stacked everything is ignored while
//!   the bill travels into the stacker

use crate::domain::Money;
use crate::io::framing::Frame;
use std::time::Duration;
use tokio::time::Instant;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);
pub const SETTLE_WINDOW: Duration = Duration::from_millis(1500);

const BILL_WINDOW_LEN: usize = 7;
const BILL_STX: u8 = 0x02;

/// Status echoes the acceptor repeats while a bill sits in escrow
const ESCROW_ECHO: [[u8; BILL_WINDOW_LEN]; 5] = [
    [0x02, 0x07, 0xCC, 0x01, 0x02, 0x00, 0x28],
    [0x02, 0x07, 0xCC, 0x02, 0x02, 0x00, 0x27],
    [0x02, 0x07, 0xCC, 0x03, 0x02, 0x00, 0x26],
    [0x02, 0x07, 0xCC, 0x04, 0x02, 0x00, 0x25],
    [0x02, 0x07, 0xCC, 0x05, 0x02, 0x00, 0x24],
];

/// Outcome of screening one bill frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillVerdict {
    /// Same chunk inside the debounce window
    Duplicate,
    /// Inside the settle window of the last stacked bill
    Settling,
    /// Escrow status echo
    EscrowEcho,
    /// Not a bill frame
    Noise,
    /// A recognised bill
    Bill(Money),
}

impl BillVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillVerdict::Duplicate => "duplicate",
            BillVerdict::Settling => "settling",
            BillVerdict::EscrowEcho => "escrow_echo",
            BillVerdict::Noise => "noise",
            BillVerdict::Bill(_) => "bill",
        }
    }
}

/// Trailing 7-byte evaluation window, if the frame has one starting with STX
pub fn bill_window(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < BILL_WINDOW_LEN {
        return None;
    }
    let window = &frame[frame.len() - BILL_WINDOW_LEN..];
    (window[0] == BILL_STX).then_some(window)
}

/// Map the denomination/state bytes of a window to a bill value
pub fn decode_bill(window: &[u8]) -> Option<Money> {
    if window.len() < BILL_WINDOW_LEN {
        return None;
    }
    let units = match window[3] {
        0x01 => 10,
        0x02 => 20,
        0x03 => 50,
        0x04 => 100,
        0x05 => 200,
        _ => return None,
    };
    match window[4] {
        0x02 | 0x08 => Some(Money::from_units(units)),
        _ => None,
    }
}

/// Stateful screening of the bill channel
#[derive(Debug)]
pub struct BillEvaluator {
    debounce: Duration,
    settle: Duration,
    last_chunk: Option<(Frame, Instant)>,
    last_stacked: Option<Instant>,
}

impl BillEvaluator {
    pub fn new(debounce: Duration, settle: Duration) -> Self {
        Self { debounce, settle, last_chunk: None, last_stacked: None }
    }

    /// Classify a frame received at `now`.
    ///
    /// Every frame that passes the debounce check becomes the new reference
    /// for the next one, even if it is then dropped by the settle window.
    pub fn screen(&mut self, frame: &Frame, now: Instant) -> BillVerdict {
        if let Some((last, at)) = &self.last_chunk {
            if last == frame && now.saturating_duration_since(*at) < self.debounce {
                return BillVerdict::Duplicate;
            }
        }
        self.last_chunk = Some((frame.clone(), now));

        if let Some(stacked) = self.last_stacked {
            if now.saturating_duration_since(stacked) < self.settle {
                return BillVerdict::Settling;
            }
        }

        let Some(window) = bill_window(frame.as_bytes()) else {
            return BillVerdict::Noise;
        };
        if ESCROW_ECHO.iter().any(|echo| echo.as_slice() == window) {
            return BillVerdict::EscrowEcho;
        }
        match decode_bill(window) {
            Some(value) => BillVerdict::Bill(value),
            None => BillVerdict::Noise,
        }
    }

    /// Start the settle window after a bill was accepted
    pub fn record_stacked(&mut self, now: Instant) {
        self.last_stacked = Some(now);
    }
}

impl Default for BillEvaluator {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW, SETTLE_WINDOW)
    }
}
