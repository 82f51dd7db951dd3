//! [`Navigator`] – the perception-to-action control loop.
//!
//! One call to [`Navigator::navigate_to`] drives the client to a goal state:
//!
//! 1. **Observe** – confirm where the client is (recovering first if the
//!    screen matches no known state).
//! 2. **Plan** – cheapest route from the observed state to the goal.
//! 3. **Act** – per transition: re-confirm the source state, dispatch the
//!    recipe, wait its expected duration, then poll for the target state
//!    until the transition timeout.  Landing in any other known state
//!    re-plans from there.
//! 4. **Recover** – on timeout, hand over to the
//!    [`RecoveryRunner`][crate::recovery::RecoveryRunner] and re-plan from
//!    whatever belief it returns.
//!
//! The loop is bounded: each transition may be attempted at most
//! `max_transition_attempts` times in a row, a request re-plans at most
//! `max_replans` times, and recovery aborts once an anomaly class exceeds
//! its budget.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(mut navigator: gamepilot_runtime::Navigator) {
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! match navigator.navigate_to(&"shop".into(), &cancel).await {
//!     Ok(report) => println!("arrived: {}", report.final_belief),
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use gamepilot_kernel::{StateGraph, Transition, TransitionId, plan};
use gamepilot_types::{
    AnomalyKind, DiagnosticTrail, NavError, NavigationReport, PilotError, StateBelief, StateId,
    TrailEntry,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::loop_guard::LoopGuard;
use crate::recovery::{RecoveryConfig, RecoveryOutcome, RecoveryRunner};
use crate::session::{Session, pause};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Execution knobs of the control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigatorConfig {
    /// Interval between arrival polls.
    pub poll_interval: Duration,
    /// A belief older than this is re-checked before acting on it.
    pub freshness: Duration,
    /// Consecutive attempts allowed for one transition.
    pub max_transition_attempts: usize,
    /// Re-plans allowed per request.
    pub max_replans: u32,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            freshness: Duration::from_millis(500),
            max_transition_attempts: 3,
            max_replans: 8,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal outcomes
// ─────────────────────────────────────────────────────────────────────────────

enum Arrival {
    Arrived(StateBelief),
    /// A known state other than the source or target.
    Diverged(StateBelief),
    TimedOut,
    Cancelled,
}

/// Why the current plan was abandoned.
enum Abandon {
    Replan,
    Fail(String),
    Cancelled,
}

// ─────────────────────────────────────────────────────────────────────────────
// Navigator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Navigator {
    graph: Arc<StateGraph>,
    session: Session,
    recovery: RecoveryRunner,
    config: NavigatorConfig,
}

impl Navigator {
    pub fn new(
        session: Session,
        config: NavigatorConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        let graph = Arc::clone(session.estimator().graph());
        let recovery = RecoveryRunner::new(recovery, graph.anchor().clone());
        Self {
            graph,
            session,
            recovery,
            config,
        }
    }

    pub fn belief(&self) -> &StateBelief {
        self.session.belief()
    }

    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drive the client to `goal`.
    ///
    /// # Errors
    ///
    /// - [`NavError::Unreachable`] – `goal` is not a known state or no route
    ///   leads to it.  No input is issued for an unknown goal.
    /// - [`NavError::NavigationFailed`] – recovery aborted, an input failed,
    ///   or a retry budget ran out.
    /// - [`NavError::Cancelled`] – `cancel` fired; the trail ends with a
    ///   final observation.
    #[instrument(skip(self, cancel), fields(goal = %goal))]
    pub async fn navigate_to(
        &mut self,
        goal: &StateId,
        cancel: &CancellationToken,
    ) -> Result<NavigationReport, NavError> {
        let started = Instant::now();
        let mut trail = DiagnosticTrail::new();

        if !self.graph.contains(goal) {
            warn!("goal is not a modelled state");
            return Err(NavError::Unreachable {
                from: self.session.belief().label(),
                to: goal.clone(),
            });
        }

        self.recovery.begin_request();
        let mut guard = LoopGuard::new(self.config.max_transition_attempts.saturating_add(1));
        let mut replans: u32 = 0;

        let hint = self.session.belief().state.clone();
        let mut belief = self.observe(hint.as_ref(), &mut trail);

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(None, trail));
            }

            let Some(current) = belief.state.clone() else {
                self.record_anomaly(&mut trail, AnomalyKind::StateUnknown, None, started);
                belief = match self
                    .recover(AnomalyKind::StateUnknown, None, &mut trail, cancel)
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(Abandon::Cancelled) => return Err(NavError::Cancelled { trail }),
                    Err(Abandon::Fail(reason)) => {
                        error!(%reason, "navigation failed");
                        return Err(NavError::NavigationFailed { reason, trail });
                    }
                    Err(Abandon::Replan) => self.session.belief().clone(),
                };
                continue;
            };

            if &current == goal {
                info!(belief = %belief, elapsed_ms = started.elapsed().as_millis() as u64, "goal reached");
                return Ok(NavigationReport {
                    goal: goal.clone(),
                    final_belief: belief,
                    trail,
                });
            }

            let Some(route) = plan(&self.graph, &current, goal) else {
                warn!(from = %current, "no route to goal");
                return Err(NavError::Unreachable {
                    from: current.to_string(),
                    to: goal.clone(),
                });
            };
            let labels = route.labels(&self.graph);
            info!(from = %current, cost = route.cost, steps = ?labels, replan = replans > 0, "plan");
            self.session.record(
                &mut trail,
                TrailEntry::Planned {
                    from: current.clone(),
                    to: goal.clone(),
                    transitions: labels,
                    cost: route.cost,
                    replan: replans > 0,
                },
            );

            match self
                .execute_plan(&route.steps, &mut guard, &mut trail, started, cancel)
                .await
            {
                Ok(arrived) => belief = arrived,
                Err(Abandon::Replan) => {
                    replans += 1;
                    if replans > self.config.max_replans {
                        let reason = format!("re-plan budget of {} exhausted", self.config.max_replans);
                        error!(%reason, "navigation failed");
                        return Err(NavError::NavigationFailed { reason, trail });
                    }
                    belief = self.session.belief().clone();
                }
                Err(Abandon::Fail(reason)) => {
                    error!(%reason, "navigation failed");
                    return Err(NavError::NavigationFailed { reason, trail });
                }
                Err(Abandon::Cancelled) => return Err(NavError::Cancelled { trail }),
            }
        }
    }

    /// Run `steps` in order.  Returns the belief after the last arrival.
    async fn execute_plan(
        &mut self,
        steps: &[TransitionId],
        guard: &mut LoopGuard<TransitionId>,
        trail: &mut DiagnosticTrail,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<StateBelief, Abandon> {
        let mut belief = self.session.belief().clone();
        for &step in steps {
            if cancel.is_cancelled() {
                self.final_observation(None, trail);
                return Err(Abandon::Cancelled);
            }
            let graph = Arc::clone(&self.graph);
            let Some(transition) = graph.transition(step) else {
                return Err(Abandon::Fail(format!("plan references unknown transition {step}")));
            };

            if !(belief.is(&transition.from) && self.session.is_fresh(self.config.freshness)) {
                belief = self.observe(Some(&transition.from), trail);
            }
            if !belief.is(&transition.from) {
                warn!(expected = %transition.from, observed = %belief, "source state mismatch");
                if belief.is_known() {
                    return Err(Abandon::Replan);
                }
                self.record_anomaly(trail, AnomalyKind::StateUnknown, Some(&transition.from), started);
                self.recover(AnomalyKind::StateUnknown, None, trail, cancel).await?;
                return Err(Abandon::Replan);
            }

            if guard.record(step) {
                return Err(Abandon::Fail(format!(
                    "transition {} did not land after {} attempts",
                    transition.label(),
                    self.config.max_transition_attempts
                )));
            }
            let attempt = guard.streak() as u32;
            self.session.record(
                trail,
                TrailEntry::TransitionAttempted {
                    from: transition.from.clone(),
                    to: transition.to.clone(),
                    recipe: transition.recipe.name.clone(),
                    attempt,
                },
            );
            info!(transition = %transition.label(), recipe = %transition.recipe.name, attempt, "acting");
            match self.session.execute(&transition.recipe) {
                Ok(()) => {}
                Err(e @ PilotError::Input(_)) => {
                    return Err(Abandon::Fail(format!(
                        "input failed on {}: {e}",
                        transition.label()
                    )));
                }
                // Nothing was dispatched; waiting it out hands over to recovery.
                Err(e) => warn!(transition = %transition.label(), error = %e, "recipe not dispatched"),
            }

            let sent = Instant::now();
            match self.await_arrival(transition, cancel).await {
                Arrival::Arrived(arrived) => {
                    let elapsed_ms = sent.elapsed().as_millis() as u64;
                    info!(state = %transition.to, elapsed_ms, "arrived");
                    self.session.record(
                        trail,
                        TrailEntry::Arrived {
                            state: transition.to.clone(),
                            confidence: arrived.confidence,
                            elapsed_ms,
                        },
                    );
                    belief = arrived;
                }
                Arrival::Diverged(observed) => {
                    warn!(transition = %transition.label(), observed = %observed, "landed off plan");
                    return Err(Abandon::Replan);
                }
                Arrival::Cancelled => {
                    self.final_observation(Some(&transition.to), trail);
                    return Err(Abandon::Cancelled);
                }
                Arrival::TimedOut => {
                    warn!(transition = %transition.label(), observed = %self.session.belief(), "arrival timed out");
                    self.record_anomaly(trail, AnomalyKind::TransitionTimeout, Some(&transition.to), sent);
                    self.recover(AnomalyKind::TransitionTimeout, Some(&transition.to), trail, cancel)
                        .await?;
                    return Err(Abandon::Replan);
                }
            }
        }
        Ok(belief)
    }

    /// Wait the recipe's expected duration, then poll for the target state
    /// until the transition timeout.  Still seeing the source state, or no
    /// known state, keeps polling.
    async fn await_arrival(&mut self, transition: &Transition, cancel: &CancellationToken) -> Arrival {
        let deadline = Instant::now() + transition.timeout;
        let settle = transition.recipe.expected_duration().min(transition.timeout);
        if pause(settle, cancel).await {
            return Arrival::Cancelled;
        }
        loop {
            match self.session.observe(Some(&transition.to)) {
                Ok(belief) if belief.is(&transition.to) => return Arrival::Arrived(belief),
                Ok(belief) if belief.is_known() && !belief.is(&transition.from) => {
                    return Arrival::Diverged(belief);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "observation failed while polling"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Arrival::TimedOut;
            }
            if pause(self.config.poll_interval.min(deadline - now), cancel).await {
                return Arrival::Cancelled;
            }
        }
    }

    /// Run recovery; a resolved episode yields the new belief.
    async fn recover(
        &mut self,
        cause: AnomalyKind,
        expected: Option<&StateId>,
        trail: &mut DiagnosticTrail,
        cancel: &CancellationToken,
    ) -> Result<StateBelief, Abandon> {
        match self
            .recovery
            .recover(cause, expected, &mut self.session, trail, cancel)
            .await
        {
            RecoveryOutcome::Resolved(belief) => Ok(belief),
            RecoveryOutcome::Aborted(reason) => Err(Abandon::Fail(reason)),
            RecoveryOutcome::Cancelled => {
                self.final_observation(None, trail);
                Err(Abandon::Cancelled)
            }
        }
    }

    /// Observe and record; a capture failure leaves the belief as it was.
    fn observe(&mut self, hint: Option<&StateId>, trail: &mut DiagnosticTrail) -> StateBelief {
        let belief = match self.session.observe(hint) {
            Ok(belief) => belief,
            Err(e) => {
                warn!(error = %e, "observation failed");
                self.session.belief().clone()
            }
        };
        self.session.record(
            trail,
            TrailEntry::Observed {
                hint: hint.cloned(),
                state: belief.state.clone(),
                confidence: belief.confidence,
            },
        );
        belief
    }

    fn final_observation(&mut self, hint: Option<&StateId>, trail: &mut DiagnosticTrail) {
        let belief = self.observe(hint, trail);
        info!(belief = %belief, "cancelled");
    }

    fn cancelled(&mut self, hint: Option<&StateId>, mut trail: DiagnosticTrail) -> NavError {
        self.final_observation(hint, &mut trail);
        NavError::Cancelled { trail }
    }

    fn record_anomaly(
        &self,
        trail: &mut DiagnosticTrail,
        kind: AnomalyKind,
        expected: Option<&StateId>,
        since: Instant,
    ) {
        let observed = self.session.belief().state.clone();
        warn!(%kind, expected = ?expected, observed = ?observed, "anomaly");
        self.session.record(
            trail,
            TrailEntry::Anomaly {
                kind,
                expected: expected.cloned(),
                observed,
                elapsed_ms: since.elapsed().as_millis() as u64,
            },
        );
    }
}
