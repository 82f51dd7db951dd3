//! `gamepilot-kernel` – State model, planning and recovery policy.
//!
//! Pure decision logic: nothing in this crate captures frames or sends
//! input.
//!
//! # Modules
//!
//! - [`state_graph`] – [`StateGraph`][state_graph::StateGraph]: the validated
//!   hierarchy of application states, their signature templates and the
//!   transitions between them.
//! - [`planner`] – [`plan`][planner::plan]: Dijkstra over transition cost,
//!   producing a [`NavigationPlan`][planner::NavigationPlan].
//! - [`recovery_policy`] – [`RecoveryMachine`][recovery_policy::RecoveryMachine]:
//!   the table-driven escalation FSM that decides which recovery tier runs
//!   next.

pub mod planner;
pub mod recovery_policy;
pub mod state_graph;

pub use planner::{NavigationPlan, plan};
pub use recovery_policy::{RecoveryEvent, RecoveryMachine, RecoveryPhase};
pub use state_graph::{SignaturePolicy, StateDef, StateGraph, StateGraphBuilder, Transition, TransitionId};
