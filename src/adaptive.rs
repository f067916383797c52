//! Adaptive transmission window control.
//!
//! The window moves along enumerated rungs: stop-and-wait, then powers of
//! two up to 64 packets. Consecutive transmission errors halve the rung,
//! sustained success doubles it, never past the cap both peers agreed on at
//! handshake (AIMD). Rung changes are announced to the peer with a
//! best-effort MODE_SYNC; the protocol stays correct if every one of them is
//! lost.

use crate::config::AdaptiveConfig;
use crate::constants::{DEFAULT_DEGRADE_ERROR_THRESHOLD, DEFAULT_RECOVERY_SUCCESS_THRESHOLD};

/// Window rungs. The discriminant is the window size in packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TxMode {
    StopAndWait = 1,
    Window2 = 2,
    Window4 = 4,
    Window8 = 8,
    Window16 = 16,
    Window32 = 32,
    Window64 = 64,
}

impl TxMode {
    pub fn window(self) -> u32 {
        self as u32
    }

    /// Largest rung whose window does not exceed `window`.
    pub fn from_window(window: u32) -> TxMode {
        match window {
            0..=1 => TxMode::StopAndWait,
            2..=3 => TxMode::Window2,
            4..=7 => TxMode::Window4,
            8..=15 => TxMode::Window8,
            16..=31 => TxMode::Window16,
            32..=63 => TxMode::Window32,
            _ => TxMode::Window64,
        }
    }

    /// Decodes a wire byte; anything off the ladder degrades to
    /// stop-and-wait.
    pub fn from_wire(byte: u8) -> TxMode {
        match byte {
            1 => TxMode::StopAndWait,
            2 => TxMode::Window2,
            4 => TxMode::Window4,
            8 => TxMode::Window8,
            16 => TxMode::Window16,
            32 => TxMode::Window32,
            64 => TxMode::Window64,
            _ => TxMode::StopAndWait,
        }
    }
}

/// Slot reserved for future multi-in-flight accounting; reset on every mode
/// change.
#[derive(Debug, Clone, Copy, Default)]
pub struct InflightSlot {
    pub offset: u64,
    pub len: u32,
    pub sent_at_ms: u32,
    pub in_use: bool,
}

#[derive(Debug)]
pub struct AdaptiveTx {
    current: TxMode,
    peer: TxMode,
    cap: TxMode,
    consecutive_errors: u16,
    consecutive_successes: u16,
    degrade_threshold: u16,
    recovery_threshold: u16,
    sync_sequence: u32,
    tracking_slots: Vec<InflightSlot>,
}

impl AdaptiveTx {
    pub fn new(cfg: &AdaptiveConfig) -> AdaptiveTx {
        let degrade = if cfg.degrade_error_threshold == 0 {
            DEFAULT_DEGRADE_ERROR_THRESHOLD
        } else {
            cfg.degrade_error_threshold
        };
        let recovery = if cfg.recovery_success_threshold == 0 {
            DEFAULT_RECOVERY_SUCCESS_THRESHOLD
        } else {
            cfg.recovery_success_threshold
        };
        let slots = cfg.max_performance_mode.window();
        AdaptiveTx {
            current: TxMode::StopAndWait,
            peer: TxMode::StopAndWait,
            cap: cfg.max_performance_mode,
            consecutive_errors: 0,
            consecutive_successes: 0,
            degrade_threshold: degrade,
            recovery_threshold: recovery,
            sync_sequence: 0,
            tracking_slots: vec![InflightSlot::default(); if slots > 1 { slots as usize } else { 0 }],
        }
    }

    /// Applies the handshake outcome: cap is the smaller of the two maxima,
    /// the starting rung the slowest of both preferences, clamped to the cap.
    pub fn negotiate(&mut self, local: &AdaptiveConfig, peer_max: u8, peer_preferred: u8) {
        let shared = local
            .max_performance_mode
            .window()
            .min(TxMode::from_wire(peer_max).window());
        self.cap = TxMode::from_window(shared);
        let mut local_pref = local.preferred_initial_mode;
        let mut peer_pref = TxMode::from_wire(peer_preferred);
        if local_pref.window() > shared {
            local_pref = self.cap;
        }
        if peer_pref.window() > shared {
            peer_pref = self.cap;
        }
        self.current = TxMode::from_window(local_pref.window().min(peer_pref.window()));
        self.peer = self.current;
        self.consecutive_errors = 0;
        self.consecutive_successes = 0;
    }

    /// Records a transmission error. Returns the new rung when the degrade
    /// threshold was crossed.
    pub fn record_error(&mut self) -> Option<TxMode> {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.consecutive_successes = 0;
        if self.consecutive_errors < self.degrade_threshold || self.current == TxMode::StopAndWait {
            return None;
        }
        let window = self.current.window();
        let next = if window <= 2 { TxMode::StopAndWait } else { TxMode::from_window((window / 2).max(2)) };
        self.apply_change(next);
        Some(next)
    }

    /// Records a successful exchange. Returns the new rung when the recovery
    /// threshold was crossed and headroom remains below the cap.
    pub fn record_success(&mut self) -> Option<TxMode> {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_errors = 0;
        if self.consecutive_successes < self.recovery_threshold || self.current == self.cap {
            return None;
        }
        let next = TxMode::from_window((self.current.window() * 2).min(self.cap.window()));
        if next == self.current {
            return None;
        }
        self.apply_change(next);
        Some(next)
    }

    fn apply_change(&mut self, next: TxMode) {
        self.current = next;
        self.peer = next;
        self.consecutive_errors = 0;
        self.consecutive_successes = 0;
        for slot in &mut self.tracking_slots {
            *slot = InflightSlot::default();
        }
    }

    pub fn next_sync_sequence(&mut self) -> u32 {
        self.sync_sequence = self.sync_sequence.wrapping_add(1);
        self.sync_sequence
    }

    pub fn current(&self) -> TxMode {
        self.current
    }

    pub fn peer(&self) -> TxMode {
        self.peer
    }

    /// Fastest rung both sides allow.
    pub fn cap(&self) -> TxMode {
        self.cap
    }

    pub fn set_peer(&mut self, mode: TxMode) {
        self.peer = mode;
    }

    pub fn counters(&self) -> (u16, u16) {
        (self.consecutive_errors, self.consecutive_successes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: TxMode, preferred: TxMode) -> AdaptiveConfig {
        AdaptiveConfig {
            max_performance_mode: max,
            preferred_initial_mode: preferred,
            ..AdaptiveConfig::default()
        }
    }

    fn negotiated(max: TxMode, preferred: TxMode) -> AdaptiveTx {
        let cfg = config(max, preferred);
        let mut tx = AdaptiveTx::new(&cfg);
        tx.negotiate(&cfg, max as u8, preferred as u8);
        tx
    }

    #[test]
    fn rung_ladder_round_trips() {
        for mode in [
            TxMode::StopAndWait,
            TxMode::Window2,
            TxMode::Window4,
            TxMode::Window8,
            TxMode::Window16,
            TxMode::Window32,
            TxMode::Window64,
        ] {
            assert_eq!(TxMode::from_window(mode.window()), mode);
            assert_eq!(TxMode::from_wire(mode as u8), mode);
        }
        assert_eq!(TxMode::from_wire(3), TxMode::StopAndWait);
        assert_eq!(TxMode::from_window(48), TxMode::Window32);
    }

    #[test]
    fn negotiation_takes_elementwise_minimum() {
        let cfg = config(TxMode::Window64, TxMode::Window16);
        let mut tx = AdaptiveTx::new(&cfg);
        tx.negotiate(&cfg, TxMode::Window8 as u8, TxMode::Window2 as u8);
        assert_eq!(tx.cap(), TxMode::Window8);
        assert_eq!(tx.current(), TxMode::Window2);
    }

    #[test]
    fn preferred_above_cap_is_clamped() {
        let cfg = config(TxMode::Window4, TxMode::Window64);
        let mut tx = AdaptiveTx::new(&cfg);
        tx.negotiate(&cfg, TxMode::Window64 as u8, TxMode::Window64 as u8);
        assert_eq!(tx.cap(), TxMode::Window4);
        assert_eq!(tx.current(), TxMode::Window4);
    }

    #[test]
    fn errors_degrade_after_threshold() {
        let mut tx = negotiated(TxMode::Window64, TxMode::Window64);
        assert_eq!(tx.record_error(), None);
        assert_eq!(tx.record_error(), None);
        assert_eq!(tx.record_error(), Some(TxMode::Window32));
        // counter reset; the next two errors alone do not degrade again
        assert_eq!(tx.record_error(), None);
        assert_eq!(tx.record_error(), None);
        assert_eq!(tx.record_error(), Some(TxMode::Window16));
    }

    #[test]
    fn degrade_floor_is_two_then_one() {
        let mut tx = negotiated(TxMode::Window4, TxMode::Window4);
        for _ in 0..2 {
            assert_eq!(tx.record_error(), None);
        }
        assert_eq!(tx.record_error(), Some(TxMode::Window2));
        for _ in 0..2 {
            assert_eq!(tx.record_error(), None);
        }
        assert_eq!(tx.record_error(), Some(TxMode::StopAndWait));
        for _ in 0..6 {
            assert_eq!(tx.record_error(), None);
        }
        assert_eq!(tx.current(), TxMode::StopAndWait);
    }

    #[test]
    fn success_upgrades_and_clamps_at_cap() {
        let mut tx = negotiated(TxMode::Window8, TxMode::StopAndWait);
        for _ in 0..9 {
            assert_eq!(tx.record_success(), None);
        }
        assert_eq!(tx.record_success(), Some(TxMode::Window2));
        for _ in 0..9 {
            assert_eq!(tx.record_success(), None);
        }
        assert_eq!(tx.record_success(), Some(TxMode::Window4));
        for _ in 0..9 {
            assert_eq!(tx.record_success(), None);
        }
        assert_eq!(tx.record_success(), Some(TxMode::Window8));
        // at the cap: success keeps counting but never upgrades further
        for _ in 0..25 {
            assert_eq!(tx.record_success(), None);
        }
        assert_eq!(tx.current(), TxMode::Window8);
    }

    #[test]
    fn success_resets_error_count_and_vice_versa() {
        let mut tx = negotiated(TxMode::Window64, TxMode::Window64);
        tx.record_error();
        tx.record_error();
        tx.record_success();
        assert_eq!(tx.counters(), (0, 1));
        tx.record_error();
        assert_eq!(tx.counters(), (1, 0));
    }

    #[test]
    fn sync_sequence_increments() {
        let mut tx = negotiated(TxMode::Window2, TxMode::Window2);
        assert_eq!(tx.next_sync_sequence(), 1);
        assert_eq!(tx.next_sync_sequence(), 2);
    }
}
