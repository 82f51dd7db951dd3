//! [`RecoveryMachine`] – escalation policy for anomaly recovery.
//!
//! A table-driven state machine.  Each anomaly occurrence starts at the
//! cheapest tier and escalates one tier per failure:
//!
//! ```text
//! Idle ──Anomaly──▶ Reassess ──failed──▶ Dismiss ──failed──▶ ReturnToAnchor
//!                      │                    │                   │      │
//!                  succeeded            succeeded          succeeded  failed / anchor timeout
//!                      ▼                    ▼                   ▼      ▼
//!                   Resolved ◀──────────────┴───────────────────┘    Abort ──▶ Aborted
//! ```
//!
//! An anomaly class that recurs more than `anomaly_budget` times within one
//! navigation request goes straight to `Abort`.  The machine only decides;
//! executing a tier is the runtime's job.

use std::collections::HashMap;
use std::fmt;

use gamepilot_types::{AnomalyKind, RecoveryTier};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Phases and events
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryPhase {
    Idle,
    Reassess,
    Dismiss,
    ReturnToAnchor,
    Abort,
    Resolved,
    Aborted,
}

impl RecoveryPhase {
    /// The tier to execute in this phase, if any.
    pub fn tier(self) -> Option<RecoveryTier> {
        match self {
            RecoveryPhase::Reassess => Some(RecoveryTier::Reassess),
            RecoveryPhase::Dismiss => Some(RecoveryTier::Dismiss),
            RecoveryPhase::ReturnToAnchor => Some(RecoveryTier::ReturnToAnchor),
            RecoveryPhase::Abort => Some(RecoveryTier::Abort),
            RecoveryPhase::Idle | RecoveryPhase::Resolved | RecoveryPhase::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryPhase::Resolved | RecoveryPhase::Aborted)
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    Anomaly(AnomalyKind),
    TierSucceeded,
    TierFailed,
    AnchorTimedOut,
    BudgetExhausted,
    Reset,
}

/// Event class used as the table key; `Anomaly` ignores its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Anomaly,
    TierSucceeded,
    TierFailed,
    AnchorTimedOut,
    BudgetExhausted,
    Reset,
}

impl RecoveryEvent {
    fn trigger(self) -> Trigger {
        match self {
            RecoveryEvent::Anomaly(_) => Trigger::Anomaly,
            RecoveryEvent::TierSucceeded => Trigger::TierSucceeded,
            RecoveryEvent::TierFailed => Trigger::TierFailed,
            RecoveryEvent::AnchorTimedOut => Trigger::AnchorTimedOut,
            RecoveryEvent::BudgetExhausted => Trigger::BudgetExhausted,
            RecoveryEvent::Reset => Trigger::Reset,
        }
    }
}

use RecoveryPhase as P;

static TABLE: &[(RecoveryPhase, Trigger, RecoveryPhase)] = &[
    (P::Idle, Trigger::Anomaly, P::Reassess),
    (P::Idle, Trigger::BudgetExhausted, P::Abort),
    (P::Reassess, Trigger::TierSucceeded, P::Resolved),
    (P::Reassess, Trigger::TierFailed, P::Dismiss),
    (P::Reassess, Trigger::BudgetExhausted, P::Abort),
    (P::Dismiss, Trigger::TierSucceeded, P::Resolved),
    (P::Dismiss, Trigger::TierFailed, P::ReturnToAnchor),
    (P::Dismiss, Trigger::BudgetExhausted, P::Abort),
    (P::ReturnToAnchor, Trigger::TierSucceeded, P::Resolved),
    (P::ReturnToAnchor, Trigger::TierFailed, P::Abort),
    (P::ReturnToAnchor, Trigger::AnchorTimedOut, P::Abort),
    (P::ReturnToAnchor, Trigger::BudgetExhausted, P::Abort),
    (P::Abort, Trigger::TierFailed, P::Aborted),
    (P::Resolved, Trigger::Reset, P::Idle),
    (P::Aborted, Trigger::Reset, P::Idle),
];

// ────────────────────────────────────────────────────────────────────────────
// RecoveryMachine
// ────────────────────────────────────────────────────────────────────────────

/// Escalation state for one navigation request.
///
/// # Example
///
/// ```
/// use gamepilot_kernel::recovery_policy::{RecoveryEvent, RecoveryMachine, RecoveryPhase};
/// use gamepilot_types::AnomalyKind;
///
/// let mut machine = RecoveryMachine::new(3);
/// assert_eq!(machine.begin(AnomalyKind::TransitionTimeout), RecoveryPhase::Reassess);
/// assert_eq!(machine.fire(RecoveryEvent::TierFailed), Some(RecoveryPhase::Dismiss));
/// assert_eq!(machine.fire(RecoveryEvent::TierSucceeded), Some(RecoveryPhase::Resolved));
/// ```
#[derive(Debug, Clone)]
pub struct RecoveryMachine {
    phase: RecoveryPhase,
    anomaly_budget: u32,
    occurrences: HashMap<AnomalyKind, u32>,
    cause: Option<AnomalyKind>,
}

impl RecoveryMachine {
    pub fn new(anomaly_budget: u32) -> Self {
        Self {
            phase: RecoveryPhase::Idle,
            anomaly_budget,
            occurrences: HashMap::new(),
            cause: None,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// The anomaly currently being recovered from.
    pub fn cause(&self) -> Option<AnomalyKind> {
        self.cause
    }

    pub fn occurrences(&self, kind: AnomalyKind) -> u32 {
        self.occurrences.get(&kind).copied().unwrap_or(0)
    }

    /// Start recovery for a new anomaly occurrence.  Escalation restarts at
    /// Tier 1 unless the class has exhausted its budget, in which case the
    /// machine moves straight to `Abort`.
    pub fn begin(&mut self, kind: AnomalyKind) -> RecoveryPhase {
        if self.phase.is_terminal() {
            self.fire(RecoveryEvent::Reset);
        }
        self.phase = RecoveryPhase::Idle;
        self.cause = Some(kind);

        let count = self.occurrences.entry(kind).or_insert(0);
        *count += 1;
        let count = *count;
        if count > self.anomaly_budget {
            warn!(?kind, count, budget = self.anomaly_budget, "anomaly budget exhausted");
            self.fire(RecoveryEvent::BudgetExhausted);
        } else {
            self.fire(RecoveryEvent::Anomaly(kind));
        }
        self.phase
    }

    /// Apply `event`.  Returns the new phase, or `None` (phase unchanged)
    /// when the table has no row for the current phase and event.
    pub fn fire(&mut self, event: RecoveryEvent) -> Option<RecoveryPhase> {
        let trigger = event.trigger();
        let next = TABLE
            .iter()
            .find(|(from, t, _)| *from == self.phase && *t == trigger)
            .map(|(_, _, to)| *to);
        match next {
            Some(to) => {
                debug!(from = %self.phase, ?event, to = %to, "recovery transition");
                self.phase = to;
            }
            None => debug!(phase = %self.phase, ?event, "event ignored in this phase"),
        }
        next
    }

    /// Forget per-class occurrence counts; called at the start of every
    /// navigation request.
    pub fn reset_request(&mut self) {
        self.occurrences.clear();
        self.phase = RecoveryPhase::Idle;
        self.cause = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_one_tier_per_failure() {
        let mut m = RecoveryMachine::new(5);
        let mut tiers = vec![m.begin(AnomalyKind::StateUnknown).tier().unwrap()];
        while let Some(phase) = m.fire(RecoveryEvent::TierFailed) {
            if let Some(tier) = phase.tier() {
                tiers.push(tier);
            }
        }
        assert_eq!(
            tiers,
            vec![
                RecoveryTier::Reassess,
                RecoveryTier::Dismiss,
                RecoveryTier::ReturnToAnchor,
                RecoveryTier::Abort
            ]
        );
        assert_eq!(m.phase(), RecoveryPhase::Aborted);
    }

    #[test]
    fn anchor_timeout_aborts() {
        let mut m = RecoveryMachine::new(5);
        m.begin(AnomalyKind::TransitionTimeout);
        m.fire(RecoveryEvent::TierFailed);
        m.fire(RecoveryEvent::TierFailed);
        assert_eq!(m.phase(), RecoveryPhase::ReturnToAnchor);
        assert_eq!(m.fire(RecoveryEvent::AnchorTimedOut), Some(RecoveryPhase::Abort));
    }

    #[test]
    fn escalation_resets_per_occurrence() {
        let mut m = RecoveryMachine::new(5);
        m.begin(AnomalyKind::TransitionTimeout);
        m.fire(RecoveryEvent::TierFailed);
        m.fire(RecoveryEvent::TierSucceeded);
        assert_eq!(m.phase(), RecoveryPhase::Resolved);
        assert_eq!(m.begin(AnomalyKind::TransitionTimeout), RecoveryPhase::Reassess);
        assert_eq!(m.occurrences(AnomalyKind::TransitionTimeout), 2);
    }

    #[test]
    fn budget_exhaustion_goes_straight_to_abort() {
        let mut m = RecoveryMachine::new(2);
        for _ in 0..2 {
            assert_eq!(m.begin(AnomalyKind::StateUnknown), RecoveryPhase::Reassess);
            m.fire(RecoveryEvent::TierSucceeded);
        }
        assert_eq!(m.begin(AnomalyKind::StateUnknown), RecoveryPhase::Abort);
        // Other classes keep their own count.
        assert_eq!(m.begin(AnomalyKind::TransitionTimeout), RecoveryPhase::Reassess);
    }

    #[test]
    fn unknown_event_leaves_phase_unchanged() {
        let mut m = RecoveryMachine::new(1);
        assert_eq!(m.fire(RecoveryEvent::TierSucceeded), None);
        assert_eq!(m.phase(), RecoveryPhase::Idle);
    }

    #[test]
    fn reset_request_clears_counts() {
        let mut m = RecoveryMachine::new(1);
        m.begin(AnomalyKind::StateUnknown);
        m.reset_request();
        assert_eq!(m.occurrences(AnomalyKind::StateUnknown), 0);
        assert_eq!(m.phase(), RecoveryPhase::Idle);
    }
}
