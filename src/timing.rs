//! Adaptive timeout estimation.
//!
//! RFC 6298-style smoothed RTT in integer millisecond math. Every
//! ACK-bearing exchange feeds a sample unless it followed a retransmission
//! (Karn's rule); each protocol operation derives its timeout from the
//! estimate through a per-operation multiplier, clamped to the configured
//! bounds.

use crate::constants::{DEFAULT_MAX_TIMEOUT_MS, DEFAULT_MIN_TIMEOUT_MS};

/// Protocol operations with distinct timeout multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Handshake,
    Meta,
    DataAck,
    Verify,
    DoneAck,
    EotAck,
    /// Receiver-side watchdog for inbound data.
    DataRecv,
}

impl Operation {
    fn multiplier(self) -> u32 {
        match self {
            Operation::Handshake => 5,
            Operation::Meta => 4,
            Operation::DataAck => 3,
            Operation::Verify => 3,
            Operation::DoneAck => 4,
            Operation::EotAck => 4,
            Operation::DataRecv => 6,
        }
    }
}

#[derive(Debug)]
pub struct TimingEstimator {
    min_timeout_ms: u32,
    max_timeout_ms: u32,
    srtt_ms: u32,
    rttvar_ms: u32,
    samples_taken: u8,
    in_retransmit: bool,
}

fn clamp(v: u32, lo: u32, hi: u32) -> u32 {
    v.max(lo).min(hi)
}

impl TimingEstimator {
    /// Builds an estimator from configured bounds. Zero bounds fall back to
    /// the defaults and inverted bounds are swapped.
    pub fn new(min_timeout_ms: u32, max_timeout_ms: u32) -> TimingEstimator {
        let mut min_to = if min_timeout_ms == 0 { DEFAULT_MIN_TIMEOUT_MS } else { min_timeout_ms };
        let mut max_to = if max_timeout_ms == 0 { DEFAULT_MAX_TIMEOUT_MS } else { max_timeout_ms };
        if min_to > max_to {
            std::mem::swap(&mut min_to, &mut max_to);
        }
        TimingEstimator {
            min_timeout_ms: min_to,
            max_timeout_ms: max_to,
            // Conservative until the first sample arrives.
            srtt_ms: max_to / 2,
            rttvar_ms: max_to / 4,
            samples_taken: 0,
            in_retransmit: false,
        }
    }

    /// Feeds one RTT measurement. Ignored while `in_retransmit` is set: a
    /// reply after a retransmission cannot be attributed to a specific send.
    pub fn record_rtt(&mut self, measured_ms: u32) {
        if self.in_retransmit {
            return;
        }
        let rtt = measured_ms.max(1);
        if self.samples_taken == 0 {
            self.srtt_ms = rtt;
            self.rttvar_ms = rtt / 2;
            self.samples_taken = 1;
            return;
        }
        let diff = self.srtt_ms.abs_diff(rtt);
        // RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - RTT|; SRTT = 7/8 SRTT + 1/8 RTT
        self.rttvar_ms = ((3 * u64::from(self.rttvar_ms) + u64::from(diff)) >> 2) as u32;
        self.srtt_ms = ((7 * u64::from(self.srtt_ms) + u64::from(rtt)) >> 3) as u32;
        self.samples_taken = self.samples_taken.saturating_add(1);
    }

    /// Timeout for one attempt of `op`.
    pub fn timeout_for(&self, op: Operation) -> u32 {
        let base = u64::from(self.srtt_ms) + 4 * u64::from(self.rttvar_ms);
        let base = clamp(
            base.min(u64::from(u32::MAX)) as u32,
            self.min_timeout_ms,
            self.max_timeout_ms,
        );
        let rto = u64::from(base) * u64::from(op.multiplier());
        clamp(
            rto.min(u64::from(u32::MAX)) as u32,
            self.min_timeout_ms,
            self.max_timeout_ms,
        )
    }

    pub fn mark_retransmit(&mut self) {
        self.in_retransmit = true;
    }

    pub fn clear_retransmit(&mut self) {
        self.in_retransmit = false;
    }

    pub fn in_retransmit(&self) -> bool {
        self.in_retransmit
    }

    pub fn srtt_ms(&self) -> u32 {
        self.srtt_ms
    }

    pub fn rttvar_ms(&self) -> u32 {
        self.rttvar_ms
    }

    pub fn samples_taken(&self) -> u8 {
        self.samples_taken
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_timeout_ms, self.max_timeout_ms)
    }
}
