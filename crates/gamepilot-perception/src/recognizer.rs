//! Parallel evaluation of a candidate template set against one frame.

use std::sync::Arc;
use std::time::Instant;

use gamepilot_types::{Frame, MatchResult, Region, TemplateKey};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::registry::TemplateRegistry;

/// Frame budget for one recognition pass.
const BUDGET_MS: u128 = 50;

/// Stateless recognition front-end over a shared registry.
#[derive(Debug, Clone)]
pub struct Recognizer {
    registry: Arc<TemplateRegistry>,
}

impl Recognizer {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Evaluate `keys` against `frame`, best confidence first.
    ///
    /// Equal confidences keep registration order.  Duplicate keys are
    /// evaluated once; unknown keys are skipped with a warning.  Rejected
    /// results are returned too.
    pub fn match_templates(&self, frame: &Frame, keys: &[TemplateKey]) -> Vec<MatchResult> {
        let started = Instant::now();

        let mut selected: Vec<usize> = Vec::with_capacity(keys.len());
        for key in keys {
            match self.registry.index_of(key) {
                Some(index) => selected.push(index),
                None => warn!(template = %key, "unknown template key skipped"),
            }
        }
        selected.sort_unstable();
        selected.dedup();

        let templates: Vec<_> = self.registry.iter().collect();
        let mut results: Vec<(usize, MatchResult)> = selected
            .par_iter()
            .map(|&index| (index, templates[index].evaluate(frame)))
            .collect();
        results.sort_by(|(ia, a), (ib, b)| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then(ia.cmp(ib))
        });

        let elapsed = started.elapsed().as_millis();
        for (_, result) in &results {
            debug!(
                template = %result.template(),
                confidence = result.confidence(),
                accepted = result.is_accepted(),
                "template evaluated"
            );
        }
        if elapsed > BUDGET_MS {
            warn!(elapsed_ms = elapsed as u64, templates = results.len(), "recognition over frame budget");
        }

        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Evaluate every registered template.
    pub fn match_all(&self, frame: &Frame) -> Vec<MatchResult> {
        let keys: Vec<TemplateKey> = self.registry.keys().cloned().collect();
        self.match_templates(frame, &keys)
    }

    /// The accepted result for `key`, if any.
    pub fn find(&self, frame: &Frame, key: &TemplateKey) -> Option<MatchResult> {
        self.match_templates(frame, std::slice::from_ref(key))
            .into_iter()
            .find(MatchResult::is_accepted)
    }

    /// Up to `max` accepted placements of `key`, best first.
    ///
    /// The search area is covered by overlapping windows evaluated in
    /// parallel.  A hit overlapping a better one by more than half the
    /// template area is the same instance and is dropped; equal confidences
    /// are ordered top-to-bottom, then left-to-right.
    pub fn find_all(&self, frame: &Frame, key: &TemplateKey, max: usize) -> Vec<MatchResult> {
        let Some(template) = self.registry.get(key) else {
            warn!(template = %key, "unknown template key skipped");
            return Vec::new();
        };
        let mut hits: Vec<MatchResult> = template
            .scan_windows(frame)
            .par_iter()
            .map(|window| template.evaluate_within(frame, *window))
            .filter(|hit| hit.is_accepted() && hit.region().is_some())
            .collect();
        hits.sort_by(|a, b| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then_with(|| origin(a).cmp(&origin(b)))
        });

        let (width, height) = template.size();
        let same_instance = width * height / 2;
        let mut kept: Vec<MatchResult> = Vec::new();
        for hit in hits {
            if kept.len() >= max {
                break;
            }
            if kept.iter().all(|k| overlap(k.region(), hit.region()) <= same_instance) {
                kept.push(hit);
            }
        }
        debug!(template = %key, found = kept.len(), "instances located");
        kept
    }
}

fn origin(hit: &MatchResult) -> Option<(u32, u32)> {
    hit.region().map(|r| (r.y, r.x))
}

/// Shared pixel area of two regions.
fn overlap(a: Option<Region>, b: Option<Region>) -> u32 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0;
    };
    let w = (a.x + a.width).min(b.x + b.width).saturating_sub(a.x.max(b.x));
    let h = (a.y + a.height).min(b.y + b.height).saturating_sub(a.y.max(b.y));
    w * h
}
