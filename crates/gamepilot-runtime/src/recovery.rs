//! [`RecoveryRunner`] – executes the tiers chosen by the recovery FSM.
//!
//! | Tier | Action | Resolves when |
//! |---|---|---|
//! | 1 Reassess | one unhinted estimate | the expected state is recognized |
//! | 2 Dismiss | each dismissal recipe, settle, estimate | the expected state is recognized |
//! | 3 ReturnToAnchor | the safe-return chain, then poll | the anchor is recognized within `anchor_timeout` |
//! | 4 Abort | nothing | never |
//!
//! The expected state is the transition target for a timeout.  Without one
//! (an unknown start) any recognized state resolves Tiers 1 and 2.
//!
//! Every attempt is logged, appended to the trail and published with its
//! cause, tier, outcome and the belief it left behind.

use std::time::Duration;

use gamepilot_kernel::{RecoveryEvent, RecoveryMachine, RecoveryPhase};
use gamepilot_types::{
    ActionRecipe, AnomalyKind, DiagnosticTrail, RecoveryTier, StateBelief, StateId, TierOutcome,
    TrailEntry,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::session::{Session, pause};

/// Recovery recipes and timing.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Tier 2 recipes, tried in order (close button, tap empty area, …).
    pub dismiss: Vec<ActionRecipe>,
    /// Tier 3 chain that should bring the client back to the anchor.
    pub anchor_return: Vec<ActionRecipe>,
    pub anchor_timeout: Duration,
    /// Wait after each recovery recipe before observing.
    pub settle: Duration,
    pub poll_interval: Duration,
    /// Occurrences of one anomaly class tolerated per navigation request.
    pub anomaly_budget: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dismiss: Vec::new(),
            anchor_return: Vec::new(),
            anchor_timeout: Duration::from_secs(10),
            settle: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
            anomaly_budget: 3,
        }
    }
}

/// How a recovery episode ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// A fresh known belief to re-plan from.
    Resolved(StateBelief),
    Aborted(String),
    Cancelled,
}

pub struct RecoveryRunner {
    config: RecoveryConfig,
    machine: RecoveryMachine,
    anchor: StateId,
}

impl RecoveryRunner {
    pub fn new(config: RecoveryConfig, anchor: StateId) -> Self {
        let machine = RecoveryMachine::new(config.anomaly_budget);
        Self {
            config,
            machine,
            anchor,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Forget anomaly counts from the previous navigation request.
    pub fn begin_request(&mut self) {
        self.machine.reset_request();
    }

    /// Run tiers for one anomaly occurrence until it resolves or aborts.
    #[instrument(skip_all, fields(cause = %cause, expected = ?expected))]
    pub async fn recover(
        &mut self,
        cause: AnomalyKind,
        expected: Option<&StateId>,
        session: &mut Session,
        trail: &mut DiagnosticTrail,
        cancel: &CancellationToken,
    ) -> RecoveryOutcome {
        let mut phase = self.machine.begin(cause);
        loop {
            let Some(tier) = phase.tier() else {
                return self.finish(phase, cause, session);
            };
            if cancel.is_cancelled() {
                return RecoveryOutcome::Cancelled;
            }

            info!(%tier, "recovery tier started");
            let outcome = match tier {
                RecoveryTier::Reassess => Some(reassess(session, expected)),
                RecoveryTier::Dismiss => self.dismiss(session, expected, cancel).await,
                RecoveryTier::ReturnToAnchor => self.return_to_anchor(session, cancel).await,
                RecoveryTier::Abort => Some(TierOutcome::Aborted),
            };
            let Some(outcome) = outcome else {
                return RecoveryOutcome::Cancelled;
            };

            let belief = session.belief().clone();
            match outcome {
                TierOutcome::Resolved => info!(%tier, belief = %belief, "recovery tier resolved"),
                TierOutcome::Aborted => error!(%tier, "recovery aborted"),
                _ => warn!(%tier, ?outcome, belief = %belief, "recovery tier failed"),
            }
            session.record(
                trail,
                TrailEntry::Recovery {
                    cause,
                    tier,
                    outcome,
                    state: belief.state.clone(),
                    confidence: belief.confidence,
                },
            );

            let event = match outcome {
                TierOutcome::Resolved => RecoveryEvent::TierSucceeded,
                TierOutcome::TimedOut => RecoveryEvent::AnchorTimedOut,
                TierOutcome::Failed | TierOutcome::Aborted => RecoveryEvent::TierFailed,
            };
            phase = self.machine.fire(event).unwrap_or(RecoveryPhase::Aborted);
            if phase.is_terminal() {
                return self.finish(phase, cause, session);
            }
        }
    }

    fn finish(&self, phase: RecoveryPhase, cause: AnomalyKind, session: &Session) -> RecoveryOutcome {
        if phase == RecoveryPhase::Resolved {
            return RecoveryOutcome::Resolved(session.belief().clone());
        }
        let count = self.machine.occurrences(cause);
        if count > self.config.anomaly_budget {
            RecoveryOutcome::Aborted(format!(
                "{cause} occurred {count} times, budget is {}",
                self.config.anomaly_budget
            ))
        } else {
            RecoveryOutcome::Aborted(format!(
                "recovery from {cause} exhausted: anchor '{}' not reached",
                self.anchor
            ))
        }
    }

    async fn dismiss(
        &self,
        session: &mut Session,
        expected: Option<&StateId>,
        cancel: &CancellationToken,
    ) -> Option<TierOutcome> {
        for recipe in &self.config.dismiss {
            if let Err(e) = session.execute(recipe) {
                warn!(recipe = %recipe.name, error = %e, "dismissal recipe failed");
                continue;
            }
            if pause(self.config.settle, cancel).await {
                return None;
            }
            if reassess(session, expected) == TierOutcome::Resolved {
                return Some(TierOutcome::Resolved);
            }
        }
        Some(TierOutcome::Failed)
    }

    async fn return_to_anchor(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Option<TierOutcome> {
        for recipe in &self.config.anchor_return {
            if let Err(e) = session.execute(recipe) {
                warn!(recipe = %recipe.name, error = %e, "anchor-return recipe failed");
            }
            if pause(self.config.settle, cancel).await {
                return None;
            }
        }

        let deadline = Instant::now() + self.config.anchor_timeout;
        loop {
            match session.observe(Some(&self.anchor)) {
                Ok(belief) if belief.is(&self.anchor) => return Some(TierOutcome::Resolved),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "observation failed while returning to anchor"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(TierOutcome::TimedOut);
            }
            if pause(self.config.poll_interval.min(deadline - now), cancel).await {
                return None;
            }
        }
    }
}

/// One unhinted estimate.  Resolves on `expected`, or on any known state
/// when nothing particular is expected; a capture failure counts as not
/// recognized.
fn reassess(session: &mut Session, expected: Option<&StateId>) -> TierOutcome {
    match session.observe(None) {
        Ok(belief) if expected.map_or(belief.is_known(), |state| belief.is(state)) => {
            TierOutcome::Resolved
        }
        Ok(_) => TierOutcome::Failed,
        Err(e) => {
            warn!(error = %e, "observation failed during recovery");
            TierOutcome::Failed
        }
    }
}
