//! Write-only diagnostics sinks.
//!
//! The control loop never reads diagnostics back; it only hands events to a
//! [`DiagnosticsSink`].  [`DiagnosticsBus`][crate::bus::DiagnosticsBus] is
//! the production sink; [`NullSink`] discards and [`MemorySink`] records for
//! inspection in tests and the CLI.

use std::sync::{Arc, Mutex};

use gamepilot_types::DiagnosticEvent;

/// Destination for recognition results, plan changes and recovery tiers.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn emit(&self, _event: DiagnosticEvent) {}
}

/// Keeps every event in memory.  Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events in emission order.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamepilot_types::TrailEntry;

    #[test]
    fn memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let clone = sink.clone();
        clone.emit(DiagnosticEvent::new(
            "test",
            TrailEntry::Recognition {
                template: "home/menu".into(),
                confidence: 0.9,
                accepted: true,
            },
        ));
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].source, "test");
    }

    #[test]
    fn null_sink_accepts_events() {
        let sink: Box<dyn DiagnosticsSink> = Box::new(NullSink);
        sink.emit(DiagnosticEvent::new(
            "test",
            TrailEntry::Observed {
                hint: None,
                state: None,
                confidence: 0.0,
            },
        ));
    }
}
