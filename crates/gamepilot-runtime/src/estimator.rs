//! [`StateEstimator`] – turns recognition results into a state belief.
//!
//! The estimator is the only writer of the [`StateBelief`]; everything else
//! reads it through [`StateEstimator::belief`].
//!
//! # Algorithm
//!
//! 1. **Hinted check** – when the caller expects a particular state, only
//!    that state's signatures are evaluated.  If its policy is satisfied the
//!    belief becomes the hint, with the lowest accepted signature confidence
//!    as its confidence.
//! 2. **Scan** – otherwise (a `RecognitionAmbiguous` anomaly is published
//!    when a hint was given) every state within `hop_radius` transitions of
//!    the last confirmed state is scored.  That state is remembered while
//!    the belief is unknown; only before the first confirmation does a scan
//!    cover the whole graph.  The highest score wins; ties go to the deeper
//!    state in the hierarchy, then to the state declared first.
//! 3. A winner below `unknown_threshold` leaves the belief unknown.
//!
//! A known belief therefore always carries a confidence of at least
//! `unknown_threshold`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gamepilot_kernel::{StateDef, StateGraph};
use gamepilot_middleware::{DiagnosticsSink, NullSink};
use gamepilot_perception::Recognizer;
use gamepilot_types::{
    AnomalyKind, DiagnosticEvent, Frame, MatchResult, StateBelief, StateId, TemplateKey, TrailEntry,
};
use tokio::time::Instant;
use tracing::debug;

const SOURCE: &str = "gamepilot-runtime::estimator";

/// Estimator tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// Minimum aggregate confidence for any known belief.
    pub unknown_threshold: f32,
    /// Transition hops around the last known state considered by a scan.
    pub hop_radius: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            unknown_threshold: 0.6,
            hop_radius: 2,
        }
    }
}

pub struct StateEstimator {
    graph: Arc<StateGraph>,
    recognizer: Recognizer,
    config: EstimatorConfig,
    belief: StateBelief,
    /// Centre of the scan neighborhood; survives an unknown belief.
    last_known: Option<StateId>,
    confirmed_at: Option<Instant>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl StateEstimator {
    /// Start with an unknown belief.
    pub fn new(graph: Arc<StateGraph>, recognizer: Recognizer, config: EstimatorConfig) -> Self {
        Self {
            graph,
            recognizer,
            config,
            belief: StateBelief::unknown(),
            last_known: None,
            confirmed_at: None,
            sink: Arc::new(NullSink),
        }
    }

    /// Publish recognition results and observations to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn belief(&self) -> &StateBelief {
        &self.belief
    }

    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }

    /// `true` when the belief is known and was confirmed within `window`.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.belief.is_known() && self.confirmed_at.is_some_and(|t| t.elapsed() <= window)
    }

    /// Update the belief from `frame`, checking `hint` first when given.
    pub fn estimate(&mut self, frame: &Frame, hint: Option<&StateId>) -> &StateBelief {
        let graph = Arc::clone(&self.graph);

        let hinted = hint
            .and_then(|h| graph.state(h))
            .and_then(|state| {
                let results = self.recognize(frame, &state.signatures);
                score(state, &results)
            })
            .filter(|confidence| *confidence >= self.config.unknown_threshold);

        match (hint, hinted) {
            (Some(state), Some(confidence)) => self.confirm(state.clone(), confidence),
            _ => {
                if let Some(state) = hint {
                    debug!(hint = %state, "hinted state not confirmed, scanning");
                    self.sink.emit(DiagnosticEvent::new(
                        SOURCE,
                        TrailEntry::Anomaly {
                            kind: AnomalyKind::RecognitionAmbiguous,
                            expected: Some(state.clone()),
                            observed: self.belief.state.clone(),
                            elapsed_ms: self
                                .confirmed_at
                                .map_or(0, |t| t.elapsed().as_millis() as u64),
                        },
                    ));
                }
                self.scan(&graph, frame);
            }
        }

        self.sink.emit(DiagnosticEvent::new(
            SOURCE,
            TrailEntry::Observed {
                hint: hint.cloned(),
                state: self.belief.state.clone(),
                confidence: self.belief.confidence,
            },
        ));
        debug!(?hint, belief = %self.belief, "estimate");
        &self.belief
    }

    /// Estimate without a hint.
    pub fn full_scan(&mut self, frame: &Frame) -> &StateBelief {
        self.estimate(frame, None)
    }

    fn scan(&mut self, graph: &StateGraph, frame: &Frame) {
        let candidates: Vec<&StateDef> = match &self.last_known {
            Some(last) => graph
                .neighborhood(last, self.config.hop_radius)
                .into_iter()
                .filter_map(|id| graph.state(id))
                .collect(),
            None => graph.states().collect(),
        };

        match self.best_of(graph, frame, &candidates) {
            Some((state, confidence)) if confidence >= self.config.unknown_threshold => {
                self.confirm(state, confidence)
            }
            _ => self.belief = StateBelief::unknown(),
        }
    }

    /// Highest-scoring candidate whose policy is satisfied.
    fn best_of(
        &self,
        graph: &StateGraph,
        frame: &Frame,
        candidates: &[&StateDef],
    ) -> Option<(StateId, f32)> {
        let mut keys: Vec<TemplateKey> = Vec::new();
        for state in candidates {
            for key in &state.signatures {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        let results = self.recognize(frame, &keys);

        let mut best: Option<(&StateDef, f32, usize)> = None;
        for state in candidates {
            let Some(confidence) = score(state, &results) else {
                continue;
            };
            let depth = graph.depth(&state.id).unwrap_or(0);
            let better = match best {
                None => true,
                Some((_, c, d)) => confidence > c || (confidence == c && depth > d),
            };
            if better {
                best = Some((state, confidence, depth));
            }
        }
        best.map(|(state, confidence, _)| (state.id.clone(), confidence))
    }

    fn recognize(&self, frame: &Frame, keys: &[TemplateKey]) -> HashMap<TemplateKey, MatchResult> {
        self.recognizer
            .match_templates(frame, keys)
            .into_iter()
            .map(|result| {
                self.sink.emit(DiagnosticEvent::new(
                    SOURCE,
                    TrailEntry::Recognition {
                        template: result.template().to_string(),
                        confidence: result.confidence(),
                        accepted: result.is_accepted(),
                    },
                ));
                (result.template().clone(), result)
            })
            .collect()
    }

    fn confirm(&mut self, state: StateId, confidence: f32) {
        self.last_known = Some(state.clone());
        self.belief = StateBelief::confirmed(state, confidence);
        self.confirmed_at = Some(Instant::now());
    }
}

/// Aggregate confidence of `state`: the weakest accepted signature, when the
/// state's policy is satisfied.
fn score(state: &StateDef, results: &HashMap<TemplateKey, MatchResult>) -> Option<f32> {
    let accepted: Vec<f32> = state
        .signatures
        .iter()
        .filter_map(|key| results.get(key))
        .filter(|r| r.is_accepted())
        .map(MatchResult::confidence)
        .collect();
    if !state.policy.is_satisfied(accepted.len(), state.signatures.len()) {
        return None;
    }
    accepted.into_iter().reduce(f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamepilot_hal::{BadgePattern, badge_screen};
    use gamepilot_kernel::{SignaturePolicy, StateGraphBuilder};
    use gamepilot_middleware::MemorySink;
    use gamepilot_perception::{Template, TemplateRegistry};
    use gamepilot_types::{ActionRecipe, MatchMethod, Region};

    const BADGE: Region = Region {
        x: 20,
        y: 12,
        width: 24,
        height: 24,
    };
    const CROP: Region = Region {
        x: 22,
        y: 14,
        width: 20,
        height: 20,
    };

    fn screen(pattern: BadgePattern) -> Frame {
        badge_screen(80, 56, BADGE, pattern, [230, 200, 90])
    }

    fn template(name: &str, pattern: BadgePattern) -> Template {
        Template::from_frame_region(
            TemplateKey::new("ui", name),
            &screen(pattern),
            CROP,
            MatchMethod::Exact,
            0.9,
        )
        .unwrap()
    }

    /// home → shop → vault → home, plus home → menu; menu is a child of
    /// home and shares home's badge plus its own.
    fn estimator(hop_radius: usize) -> StateEstimator {
        let mut reg = TemplateRegistry::new();
        reg.register(template("home", BadgePattern::VerticalStripes)).unwrap();
        reg.register(template("shop", BadgePattern::HorizontalStripes)).unwrap();
        reg.register(template("vault", BadgePattern::Checker)).unwrap();
        reg.register(template("menu", BadgePattern::Diagonal)).unwrap();
        let graph = StateGraphBuilder::new("home")
            .state(StateDef::new("home").with_signature(TemplateKey::new("ui", "home")))
            .state(StateDef::new("shop").with_signature(TemplateKey::new("ui", "shop")))
            .state(StateDef::new("vault").with_signature(TemplateKey::new("ui", "vault")))
            .state(
                StateDef::new("menu")
                    .with_parent("home")
                    .with_signature(TemplateKey::new("ui", "home"))
                    .with_signature(TemplateKey::new("ui", "menu"))
                    .with_policy(SignaturePolicy::Quorum { min_accepted: 1 }),
            )
            .transition("home", "shop", ActionRecipe::tap("shop", 0, 0))
            .transition("shop", "vault", ActionRecipe::tap("vault", 0, 0))
            .transition("vault", "home", ActionRecipe::tap("home", 0, 0))
            .transition("home", "menu", ActionRecipe::tap("menu", 0, 0))
            .build(&reg)
            .unwrap();
        StateEstimator::new(
            Arc::new(graph),
            Recognizer::new(Arc::new(reg)),
            EstimatorConfig {
                unknown_threshold: 0.6,
                hop_radius,
            },
        )
    }

    #[test]
    fn starts_unknown() {
        let est = estimator(2);
        assert!(!est.belief().is_known());
        assert!(!est.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn hint_confirms_matching_state() {
        let mut est = estimator(2);
        let belief = est.estimate(&screen(BadgePattern::HorizontalStripes), Some(&"shop".into()));
        assert!(belief.is(&"shop".into()));
        assert!(belief.confidence > 0.9);
    }

    #[test]
    fn wrong_hint_falls_back_to_scan() {
        let mut est = estimator(2);
        let belief = est.estimate(&screen(BadgePattern::Checker), Some(&"shop".into()));
        assert!(belief.is(&"vault".into()));
    }

    #[test]
    fn unrecognized_screen_is_unknown() {
        let mut est = estimator(2);
        let blank = Frame::from_fn(80, 56, |_, _| [24, 26, 32]);
        let belief = est.full_scan(&blank);
        assert!(!belief.is_known());
        assert_eq!(belief.confidence, 0.0);
    }

    #[test]
    fn ties_prefer_deeper_state() {
        let mut est = estimator(2);
        // Home's badge alone satisfies both home and menu (quorum of one) with
        // identical confidence; menu is deeper.
        let belief = est.full_scan(&screen(BadgePattern::VerticalStripes));
        assert!(belief.is(&"menu".into()));
    }

    #[test]
    fn scan_stays_within_hop_radius_of_last_known() {
        let sink = MemorySink::new();
        let mut est = estimator(0).with_sink(Arc::new(sink.clone()));
        est.estimate(&screen(BadgePattern::VerticalStripes), Some(&"home".into()));
        let blank = Frame::from_fn(80, 56, |_, _| [24, 26, 32]);
        assert!(!est.full_scan(&blank).is_known());

        // shop is one hop from home, outside a radius of 0; the unknown
        // belief in between does not widen the scan.
        let before = sink.events().len();
        let belief = est.full_scan(&screen(BadgePattern::HorizontalStripes));
        assert!(!belief.is_known());
        let scanned: Vec<String> = sink.events()[before..]
            .iter()
            .filter_map(|e| match &e.payload {
                TrailEntry::Recognition { template, .. } => Some(template.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(scanned, vec!["ui/home".to_string()]);
    }

    #[test]
    fn scan_reaches_states_inside_hop_radius() {
        let mut est = estimator(1);
        est.estimate(&screen(BadgePattern::VerticalStripes), Some(&"home".into()));
        // vault is two hops from home.
        assert!(!est.full_scan(&screen(BadgePattern::Checker)).is_known());
        let belief = est.full_scan(&screen(BadgePattern::HorizontalStripes));
        assert!(belief.is(&"shop".into()));
    }

    #[test]
    fn hint_confirms_state_outside_hop_radius() {
        let mut est = estimator(0);
        est.estimate(&screen(BadgePattern::VerticalStripes), Some(&"home".into()));
        let belief = est.estimate(&screen(BadgePattern::Checker), Some(&"vault".into()));
        assert!(belief.is(&"vault".into()));
    }

    #[test]
    fn estimation_is_deterministic() {
        let mut a = estimator(2);
        let mut b = estimator(2);
        let frame = screen(BadgePattern::Diagonal);
        assert_eq!(a.full_scan(&frame).state, b.full_scan(&frame).state);
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_expires() {
        let mut est = estimator(2);
        est.estimate(&screen(BadgePattern::Checker), Some(&"vault".into()));
        assert!(est.is_fresh(Duration::from_millis(500)));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!est.is_fresh(Duration::from_millis(500)));
    }

    #[test]
    fn failed_hint_publishes_ambiguity() {
        let sink = MemorySink::new();
        let mut est = estimator(2).with_sink(Arc::new(sink.clone()));
        est.estimate(&screen(BadgePattern::Checker), Some(&"shop".into()));
        assert!(sink.events().iter().any(|e| matches!(
            &e.payload,
            TrailEntry::Anomaly {
                kind: AnomalyKind::RecognitionAmbiguous,
                expected: Some(s),
                ..
            } if s.as_str() == "shop"
        )));
    }

    #[test]
    fn publishes_observations() {
        let sink = MemorySink::new();
        let mut est = estimator(2).with_sink(Arc::new(sink.clone()));
        est.full_scan(&screen(BadgePattern::Checker));
        let events = sink.events();
        assert!(events.iter().any(|e| matches!(e.payload, TrailEntry::Recognition { .. })));
        assert!(matches!(
            events.last().map(|e| &e.payload),
            Some(TrailEntry::Observed { .. })
        ));
    }
}
