//! Detection confirmation gate.
//!
//! Debounces per-frame detector confidence into a single "confirmed" trigger
//! per sustained sighting:
//!
//! - `Idle -> Armed` when a reading reaches `confidence_threshold`; the dwell
//!   timer starts at that reading's instant.
//! - `Armed -> Idle` (abandoned) when a reading falls below `drop_threshold`.
//! - `Armed -> Confirmed -> Idle` when a reading at or above
//!   `confidence_threshold` arrives at least `dwell` after the timer started.
//! - Readings between the two thresholds hold the current state and never
//!   restart the timer.
//!
//! After a trigger the gate is idle again, so a plate that stays in view must
//! serve a full new dwell before it can trigger a second time.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_DROP_THRESHOLD: f32 = 0.3;
pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateConfig {
    /// A reading must reach this to arm the gate or to confirm.
    pub confidence_threshold: f32,
    /// A reading below this abandons an armed candidate.
    pub drop_threshold: f32,
    /// Minimum time between arming and confirming.
    pub dwell: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            dwell: DEFAULT_DWELL,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("drop_threshold", self.drop_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within 0..=1, got {}", name, value));
            }
        }
        if self.drop_threshold >= self.confidence_threshold {
            return Err(anyhow!(
                "drop_threshold ({}) must be below confidence_threshold ({})",
                self.drop_threshold,
                self.confidence_threshold
            ));
        }
        if self.dwell.is_zero() {
            return Err(anyhow!("dwell duration must be greater than zero"));
        }
        Ok(())
    }
}

/// Resting phase of the gate. `Confirmed` is never a resting phase; it is
/// reported once through `GateTransition::Confirmed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    Armed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed { dwell_start: Instant },
}

/// Gate state. The dwell start exists exactly while the gate is armed.
///
/// Only the gate can move between phases; a state cannot be forged or
/// written back from outside:
///
/// ```compile_fail
/// use plate_sentry::{ConfirmationGate, GateConfig};
///
/// let mut gate = ConfirmationGate::new(GateConfig::default()).unwrap();
/// gate.state = gate.state();
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationState {
    phase: Phase,
}

impl ConfirmationState {
    fn idle() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn phase(&self) -> GatePhase {
        match self.phase {
            Phase::Idle => GatePhase::Idle,
            Phase::Armed { .. } => GatePhase::Armed,
        }
    }

    pub fn dwell_start(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle => None,
            Phase::Armed { dwell_start } => Some(dwell_start),
        }
    }
}

/// What one reading did to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateTransition {
    /// Idle before and after.
    Idle,
    /// The reading armed the gate.
    Armed { dwell_start: Instant },
    /// Still armed, dwell not complete.
    Holding { dwell_start: Instant, elapsed: Duration },
    /// The candidate fell below the drop threshold. No trigger.
    Abandoned { dwell_start: Instant },
    /// Trigger. The gate is idle again.
    Confirmed {
        dwell_start: Instant,
        confirmed_at: Instant,
    },
}

impl GateTransition {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, GateTransition::Confirmed { .. })
    }
}

/// Owner of the single `ConfirmationState`.
#[derive(Clone, Debug)]
pub struct ConfirmationGate {
    config: GateConfig,
    state: ConfirmationState,
}

impl ConfirmationGate {
    pub fn new(config: GateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ConfirmationState::idle(),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    /// Force the gate back to idle without a trigger.
    pub fn reset(&mut self) {
        self.state = ConfirmationState::idle();
    }

    /// Feed one reading taken at `now`.
    ///
    /// `None` (no detection this frame) and non-finite values count as 0.
    pub fn observe(&mut self, confidence: Option<f32>, now: Instant) -> GateTransition {
        let confidence = confidence.filter(|c| c.is_finite()).unwrap_or(0.0);

        match self.state.phase {
            Phase::Idle => {
                if confidence >= self.config.confidence_threshold {
                    self.state.phase = Phase::Armed { dwell_start: now };
                    GateTransition::Armed { dwell_start: now }
                } else {
                    GateTransition::Idle
                }
            }
            Phase::Armed { dwell_start } => {
                if confidence < self.config.drop_threshold {
                    self.state = ConfirmationState::idle();
                    return GateTransition::Abandoned { dwell_start };
                }
                let elapsed = now.saturating_duration_since(dwell_start);
                if confidence >= self.config.confidence_threshold && elapsed >= self.config.dwell {
                    self.state = ConfirmationState::idle();
                    GateTransition::Confirmed {
                        dwell_start,
                        confirmed_at: now,
                    }
                } else {
                    GateTransition::Holding {
                        dwell_start,
                        elapsed,
                    }
                }
            }
        }
    }
}
