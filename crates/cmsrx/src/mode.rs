//! Emulation mode engine.
//!
//! Every receiver owns one mode engine: a small state machine that
//! decides how the next frame is answered. The operator flips modes at
//! runtime (stdin or the command socket) while connection handlers
//! consume packets, so all state lives behind a mutex; every critical
//! section is O(1) and never awaits.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::receiver::ReceiverKind;

/// Timestamp layout substituted into SIA replies: `HH:MM:SS,MM-DD-YYYY`.
pub const SIA_TIMESTAMP_FORMAT: &str = "%H:%M:%S,%m-%d-%Y";

/// Reply policy for a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationMode {
    /// Acknowledge everything (default).
    Ack,
    /// Reject events (and, per dialect, heartbeats) with NAKs.
    Nak,
    /// Emit nothing at all.
    NoResponse,
    /// Acknowledge heartbeats, stay silent on events.
    OnlyPing,
    /// Swallow the next N events without replying.
    DropN,
    /// Acknowledge after a fixed delay.
    DelayN,
    /// Acknowledge with a spoofed timestamp.
    TimeCustom,
}

impl EmulationMode {
    /// Parse an operator-facing mode name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ack" => Some(Self::Ack),
            "nak" => Some(Self::Nak),
            "none" | "no-response" => Some(Self::NoResponse),
            "only-ping" => Some(Self::OnlyPing),
            "drop" => Some(Self::DropN),
            "delay" => Some(Self::DelayN),
            "time" => Some(Self::TimeCustom),
            _ => None,
        }
    }
}

impl fmt::Display for EmulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ack => "ack",
            Self::Nak => "nak",
            Self::NoResponse => "no-response",
            Self::OnlyPing => "only-ping",
            Self::DropN => "drop",
            Self::DelayN => "delay",
            Self::TimeCustom => "time",
        };
        f.write_str(name)
    }
}

/// How long a timestamp override stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideDuration {
    /// Used for exactly one reply.
    Once,
    /// Used for the next N replies.
    Times(u32),
    /// Used until replaced or cleared.
    Forever,
}

#[derive(Debug, Clone)]
struct TimeOverride {
    timestamp: NaiveDateTime,
    duration: OverrideDuration,
    time_left: u32,
}

/// Mode engine state for one receiver.
#[derive(Debug)]
pub struct ModeState {
    mode: EmulationMode,
    previous_mode: Option<EmulationMode>,
    next_mode: Option<EmulationMode>,
    /// Packets remaining before a timed mode reverts.
    budget: Option<u32>,
    drop_remaining: u32,
    delay_seconds: u64,
    nak_result_code: Option<u32>,
    time_override: Option<TimeOverride>,
}

impl Default for ModeState {
    fn default() -> Self {
        Self {
            mode: EmulationMode::Ack,
            previous_mode: None,
            next_mode: None,
            budget: None,
            drop_remaining: 0,
            delay_seconds: 0,
            nak_result_code: None,
            time_override: None,
        }
    }
}

impl ModeState {
    /// Current mode.
    pub fn mode(&self) -> EmulationMode {
        self.mode
    }

    /// Switch mode, optionally for a bounded number of packets.
    ///
    /// A budget captures the current mode as the fallback to revert to;
    /// counters that do not belong to the new mode are reset.
    pub fn set_mode(
        &mut self,
        mode: EmulationMode,
        budget: Option<u32>,
        next_mode: Option<EmulationMode>,
    ) {
        if budget.is_some() && self.mode != mode {
            self.previous_mode = Some(self.mode);
        }
        self.mode = mode;
        self.budget = budget;
        self.next_mode = next_mode;
        if mode != EmulationMode::DropN {
            self.drop_remaining = 0;
        }
        if mode != EmulationMode::DelayN {
            self.delay_seconds = 0;
        }

        let budget_info = budget
            .map(|n| format!(" for next {n} packets"))
            .unwrap_or_default();
        let next_info = next_mode
            .map(|m| format!(" then switch to {m}"))
            .unwrap_or_default();
        info!("[MODE] switched to mode: {mode}{budget_info}{next_info}");
    }

    /// Enter DROP mode for the next `count` events.
    pub fn set_drop(&mut self, count: u32) {
        self.set_mode(EmulationMode::DropN, None, None);
        self.drop_remaining = count;
        info!("[MODE] dropping next {count} packets");
    }

    /// Enter DELAY mode with a per-reply delay in seconds.
    pub fn set_delay(&mut self, seconds: u64) {
        self.set_mode(EmulationMode::DelayN, None, None);
        self.delay_seconds = seconds;
        info!("[MODE] delaying responses by {seconds} seconds");
    }

    /// Set the result code carried by subsequent NAKs.
    pub fn set_nak_code(&mut self, code: u32) {
        self.nak_result_code = Some(code);
        info!("[MODE] NAK result code set to {code}");
    }

    /// NAK result code, when one was set.
    pub fn nak_code(&self) -> Option<u32> {
        self.nak_result_code
    }

    /// Delay applied per reply in DELAY mode.
    pub fn delay_seconds(&self) -> u64 {
        self.delay_seconds
    }

    /// Install a timestamp override for replies.
    ///
    /// Plain ACK operation shows up as TIME_CUSTOM while the override
    /// is live; failure modes (NAK, DROP, ...) keep their mode and only
    /// borrow the spoofed timestamp.
    pub fn set_time(&mut self, timestamp: NaiveDateTime, duration: OverrideDuration) {
        let time_left = match duration {
            OverrideDuration::Once => 1,
            OverrideDuration::Times(n) => n,
            OverrideDuration::Forever => 0,
        };
        self.time_override = Some(TimeOverride {
            timestamp,
            duration,
            time_left,
        });
        if self.mode == EmulationMode::Ack {
            self.mode = EmulationMode::TimeCustom;
        }
        info!("[MODE] timestamp override {timestamp} installed ({duration:?})");
    }

    /// Account one answered event against the mode budget.
    ///
    /// At zero the engine reverts: to `next_mode` when the operator
    /// named one, else to the mode active before the switch, else ACK.
    /// Returns true when a transition happened.
    pub fn consume_packet(&mut self) -> bool {
        let Some(budget) = self.budget.as_mut() else {
            return false;
        };
        *budget = budget.saturating_sub(1);
        if *budget > 0 {
            return false;
        }
        let from = self.mode;
        let to = self
            .next_mode
            .take()
            .or(self.previous_mode.take())
            .unwrap_or(EmulationMode::Ack);
        info!("[MODE] mode {from} completed, switching to {to}");
        self.set_mode(to, None, None);
        true
    }

    /// Account one dropped event. Returns true while frames are still
    /// being swallowed; at zero remaining the mode reverts to ACK and
    /// the current frame is answered normally.
    pub fn begin_drop(&mut self) -> bool {
        if self.drop_remaining > 0 {
            self.drop_remaining -= 1;
            info!(
                "[MODE] dropped message (remaining: {})",
                self.drop_remaining
            );
            if self.drop_remaining == 0 {
                self.set_mode(EmulationMode::Ack, None, None);
            }
            return true;
        }
        self.set_mode(EmulationMode::Ack, None, None);
        false
    }

    /// The timestamp to substitute into the next reply.
    ///
    /// Returns the override while one is active, consuming one use
    /// under ONCE/TIMES; otherwise the current local time.
    pub fn response_timestamp(&mut self) -> String {
        let Some(over) = self.time_override.as_mut() else {
            return Local::now().format(SIA_TIMESTAMP_FORMAT).to_string();
        };
        let stamp = over.timestamp.format(SIA_TIMESTAMP_FORMAT).to_string();
        let exhausted = match over.duration {
            OverrideDuration::Once => true,
            OverrideDuration::Times(_) => {
                over.time_left = over.time_left.saturating_sub(1);
                over.time_left == 0
            }
            OverrideDuration::Forever => false,
        };
        if exhausted {
            self.clear_time_override();
        }
        stamp
    }

    fn clear_time_override(&mut self) {
        debug!("[MODE] clearing timestamp override");
        self.time_override = None;
        if self.mode == EmulationMode::TimeCustom {
            self.mode = EmulationMode::Ack;
        }
    }
}

/// Shared handle to one receiver's mode engine.
///
/// Cloning is cheap; all clones observe the same state. `consume_packet`
/// and `set_mode` arrive from different tasks and are serialized by the
/// inner mutex.
#[derive(Debug, Clone, Default)]
pub struct ModeHandle {
    state: Arc<Mutex<ModeState>>,
}

impl ModeHandle {
    /// Fresh engine in the default ACK mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a closure under the engine lock.
    ///
    /// Critical sections are O(1) and never await; a poisoned lock is
    /// recovered rather than propagated, since the state stays valid.
    pub fn with<R>(&self, f: impl FnOnce(&mut ModeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Snapshot of the current mode.
    pub fn mode(&self) -> EmulationMode {
        self.with(|s| s.mode())
    }

    /// See [`ModeState::consume_packet`].
    pub fn consume_packet(&self) -> bool {
        self.with(|s| s.consume_packet())
    }

    /// See [`ModeState::response_timestamp`].
    pub fn response_timestamp(&self) -> String {
        self.with(|s| s.response_timestamp())
    }
}

/// Process-wide registry of mode engines, one per receiver.
///
/// Engines are created lazily on first lookup and live for the process
/// lifetime.
#[derive(Debug, Default)]
pub struct ModeRegistry {
    engines: Mutex<HashMap<ReceiverKind, ModeHandle>>,
}

impl ModeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The mode engine for a receiver, created on first use.
    pub fn handle(&self, kind: ReceiverKind) -> ModeHandle {
        let mut engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        engines.entry(kind).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_default_mode_is_ack() {
        let state = ModeState::default();
        assert_eq!(state.mode(), EmulationMode::Ack);
    }

    #[test]
    fn test_budget_reverts_to_next_mode() {
        let mut state = ModeState::default();
        state.set_mode(EmulationMode::Nak, Some(2), Some(EmulationMode::OnlyPing));

        assert_eq!(state.mode(), EmulationMode::Nak);
        state.consume_packet();
        assert_eq!(state.mode(), EmulationMode::Nak);
        state.consume_packet();
        assert_eq!(state.mode(), EmulationMode::OnlyPing);
    }

    #[test]
    fn test_budget_reverts_to_previous_mode() {
        let mut state = ModeState::default();
        state.set_mode(EmulationMode::OnlyPing, None, None);
        state.set_mode(EmulationMode::Nak, Some(1), None);

        state.consume_packet();
        assert_eq!(state.mode(), EmulationMode::OnlyPing);
    }

    #[test]
    fn test_budget_reverts_to_ack_by_default() {
        let mut state = ModeState::default();
        state.set_mode(EmulationMode::NoResponse, Some(1), None);
        state.consume_packet();
        assert_eq!(state.mode(), EmulationMode::Ack);
    }

    #[test]
    fn test_drop_bookkeeping() {
        let mut state = ModeState::default();
        state.set_drop(2);

        assert!(state.begin_drop());
        assert_eq!(state.mode(), EmulationMode::DropN);
        assert!(state.begin_drop());
        // Second drop exhausted the counter.
        assert_eq!(state.mode(), EmulationMode::Ack);
    }

    #[test]
    fn test_time_override_once() {
        let mut state = ModeState::default();
        state.set_time(ts(2020, 8, 26, 14, 46, 14), OverrideDuration::Once);
        assert_eq!(state.mode(), EmulationMode::TimeCustom);

        assert_eq!(state.response_timestamp(), "14:46:14,08-26-2020");
        // Override cleared after one use; mode reverts.
        assert_eq!(state.mode(), EmulationMode::Ack);
        assert_ne!(state.response_timestamp(), "14:46:14,08-26-2020");
    }

    #[test]
    fn test_time_override_times_n() {
        let mut state = ModeState::default();
        state.set_time(ts(2024, 1, 1, 0, 0, 0), OverrideDuration::Times(2));

        assert_eq!(state.response_timestamp(), "00:00:00,01-01-2024");
        assert_eq!(state.response_timestamp(), "00:00:00,01-01-2024");
        assert_ne!(state.response_timestamp(), "00:00:00,01-01-2024");
    }

    #[test]
    fn test_time_override_keeps_failure_mode() {
        let mut state = ModeState::default();
        state.set_mode(EmulationMode::Nak, None, None);
        state.set_time(ts(2024, 1, 1, 0, 0, 0), OverrideDuration::Forever);
        // NAK stays active; only the timestamp is spoofed.
        assert_eq!(state.mode(), EmulationMode::Nak);
        assert_eq!(state.response_timestamp(), "00:00:00,01-01-2024");
        assert_eq!(state.response_timestamp(), "00:00:00,01-01-2024");
    }

    #[test]
    fn test_nak_code() {
        let mut state = ModeState::default();
        assert_eq!(state.nak_code(), None);
        state.set_nak_code(9);
        assert_eq!(state.nak_code(), Some(9));
    }

    #[test]
    fn test_registry_returns_same_engine() {
        let registry = ModeRegistry::new();
        let a = registry.handle(ReceiverKind::Masxml);
        a.with(|s| s.set_mode(EmulationMode::Nak, None, None));

        let b = registry.handle(ReceiverKind::Masxml);
        assert_eq!(b.mode(), EmulationMode::Nak);

        let other = registry.handle(ReceiverKind::SiaDcs);
        assert_eq!(other.mode(), EmulationMode::Ack);
    }
}
