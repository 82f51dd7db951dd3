//! `gamepilot-middleware` – Diagnostics plumbing
//!
//! Routes diagnostic events out of the control loop without caring about
//! their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe bus built on Tokio broadcast
//!   channels.
//! - [`sink`] – the write-only [`DiagnosticsSink`] seam plus null and
//!   in-memory sinks.

pub mod bus;
pub mod sink;

pub use bus::{DiagnosticsBus, Topic, TopicReceiver};
pub use sink::{DiagnosticsSink, MemorySink, NullSink};
