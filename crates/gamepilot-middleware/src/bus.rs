//! Headless, topic-based publish/subscribe bus for navigation diagnostics.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the control loop.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Recognition`] | Per-template match results and state observations |
//! | [`Topic::Planning`] | Plans, replans, transition attempts and arrivals |
//! | [`Topic::Recovery`] | Anomalies and recovery tier attempts |

use gamepilot_types::{DiagnosticEvent, TrailEntry};
use tokio::sync::broadcast;
use tracing::warn;

use crate::sink::DiagnosticsSink;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the diagnostics bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Recognition,
    Planning,
    Recovery,
}

impl Topic {
    /// The lane a trail entry is published on.
    pub fn for_entry(entry: &TrailEntry) -> Topic {
        match entry {
            TrailEntry::Recognition { .. } | TrailEntry::Observed { .. } => Topic::Recognition,
            TrailEntry::Planned { .. }
            | TrailEntry::TransitionAttempted { .. }
            | TrailEntry::Arrived { .. } => Topic::Planning,
            TrailEntry::Anomaly { .. } | TrailEntry::Recovery { .. } => Topic::Recovery,
        }
    }
}

/// Shared diagnostics bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
///
/// Every event goes to its topic lane *and* to the global channel, so a
/// single [`DiagnosticsBus::subscribe`] receiver sees the full stream.
#[derive(Clone, Debug)]
pub struct DiagnosticsBus {
    all: broadcast::Sender<DiagnosticEvent>,
    recognition: broadcast::Sender<DiagnosticEvent>,
    planning: broadcast::Sender<DiagnosticEvent>,
    recovery: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticsBus {
    /// Create a new bus with the given per-channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (recognition, _) = broadcast::channel(capacity);
        let (planning, _) = broadcast::channel(capacity);
        let (recovery, _) = broadcast::channel(capacity);
        Self {
            all,
            recognition,
            planning,
            recovery,
        }
    }

    /// Publish `event` on its topic lane and the global channel.
    ///
    /// Returns the number of receivers handed the event across both
    /// channels.  Zero receivers is a normal condition for a write-only
    /// diagnostics stream.
    pub fn publish(&self, event: DiagnosticEvent) -> usize {
        let topic = Topic::for_entry(&event.payload);
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_all = self.all.send(event).unwrap_or(0);
        on_topic + on_all
    }

    /// Subscribe to a single [`Topic`] lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.all.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<DiagnosticEvent> {
        match topic {
            Topic::Recognition => &self.recognition,
            Topic::Planning => &self.planning,
            Topic::Recovery => &self.recovery,
        }
    }
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiagnosticsSink for DiagnosticsBus {
    fn emit(&self, event: DiagnosticEvent) {
        self.publish(event);
    }
}

/// An async receiver bound to a single [`Topic`] lane.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<DiagnosticEvent>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic, skipping over lag gaps.
    ///
    /// Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<DiagnosticEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "diagnostics subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
