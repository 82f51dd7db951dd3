//! `gamepilot-runtime` – the perception-to-action control loop.
//!
//! Wires the recognizer, the state graph and the capture/input backends
//! into a loop that observes the client, plans a route, acts, and recovers
//! when the client does not behave as modelled.
//!
//! # Modules
//!
//! - [`estimator`] – [`StateEstimator`]: scores states against a frame and
//!   keeps the single current [`StateBelief`][gamepilot_types::StateBelief].
//! - [`session`] – [`Session`]: the estimator plus capture, input and the
//!   diagnostics sink behind one observe/act/record surface.
//! - [`navigator`] – [`Navigator`]: `navigate_to(goal)`, the observe → plan →
//!   act → verify loop with bounded retries.
//! - [`recovery`] – [`RecoveryRunner`]: runs the escalating recovery tiers
//!   chosen by the kernel's recovery state machine.
//! - [`loop_guard`] – [`LoopGuard`]: flags the same transition being
//!   attempted too many times in a row.
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with
//!   optional OTLP span export.

pub mod estimator;
pub mod loop_guard;
pub mod navigator;
pub mod recovery;
pub mod session;
pub mod telemetry;

pub use estimator::{EstimatorConfig, StateEstimator};
pub use loop_guard::LoopGuard;
pub use navigator::{Navigator, NavigatorConfig};
pub use recovery::{RecoveryConfig, RecoveryOutcome, RecoveryRunner};
pub use session::Session;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
