//! Sol-Ark SOC automation: switch the Solis between self-use and
//! feed-in based on the other inverter's battery state of charge.
//!
//! Two thresholds give hysteresis (arm high, release low) and a cooldown
//! stops the mode from flapping when SOC hovers near a threshold. All
//! comparisons happen in hundredths of a percent ("pptt"), the unit the
//! Sol-Ark board reports.

use crate::solis::registers::StorageBits;
use std::time::{Duration, Instant};

/// Readings older than this are ignored; the state machine freezes
/// rather than act on stale data.
pub const EXTERNAL_READING_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    /// SOC is high: force self-use (storage bit 0 on, bit 6 off).
    ToSelfUse,
    /// SOC dropped below the release threshold: back to feed-in.
    ToFeedIn,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Arm (switch to self-use) at or above this SOC, in pptt.
    /// Zero or negative disables the automation.
    pub arm_pptt: i64,
    /// Release (allow feed-in) below this SOC, in pptt.
    pub release_pptt: i64,
    pub cooldown: Duration,
}

/// Owned by the coordinator; mutated only after a control write succeeds.
#[derive(Debug, Default)]
pub struct SocAutomation {
    armed: bool,
    last_switch: Option<Instant>,
}

impl SocAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Decide whether this cycle should switch modes. Pure: performs no
    /// I/O and does not advance any state.
    ///
    /// The arm condition fires when the inverter is in feed-in *or* any
    /// mode other than self-use; release demands it currently be
    /// self-use. The asymmetry is intentional; do not make these
    /// conditions symmetric.
    pub fn evaluate(
        &self,
        now: Instant,
        enabled: bool,
        soc_pptt: Option<u16>,
        bits: &StorageBits,
        thresholds: &Thresholds,
    ) -> Option<SwitchAction> {
        if !enabled || thresholds.arm_pptt <= 0 {
            return None;
        }
        let soc = soc_pptt? as i64;

        if let Some(last) = self.last_switch {
            if now.duration_since(last) < thresholds.cooldown {
                return None;
            }
        }

        if soc >= thresholds.arm_pptt && (bits.feed_in_priority || !bits.self_use) {
            Some(SwitchAction::ToSelfUse)
        } else if self.armed && soc < thresholds.release_pptt && bits.self_use {
            Some(SwitchAction::ToFeedIn)
        } else {
            None
        }
    }

    /// Record a switch that actually happened. A failed write never gets
    /// here, so neither the state nor the cooldown advances and the
    /// switch is retried on the next eligible cycle.
    pub fn record_switch(&mut self, action: SwitchAction, now: Instant) {
        self.armed = matches!(action, SwitchAction::ToSelfUse);
        self.last_switch = Some(now);
    }
}
