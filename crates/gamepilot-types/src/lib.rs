use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────────────────────────────────────

/// Identifier of an abstract application screen or mode (e.g. `"home"`,
/// `"shop"`).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Registry key of a template: `category/name`, mirroring the on-disk layout
/// of the template store (`home/shop_button.png` → `home` / `shop_button`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplateKey {
    pub category: String,
    pub name: String,
}

impl TemplateKey {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Parse the `category/name` form.  Nested categories keep everything
    /// before the last `/` as the category.
    pub fn parse(raw: &str) -> Result<Self, PilotError> {
        match raw.rsplit_once('/') {
            Some((category, name)) if !category.is_empty() && !name.is_empty() => {
                Ok(Self::new(category, name))
            }
            _ => Err(PilotError::Template {
                key: raw.to_string(),
                details: "expected `category/name`".to_string(),
            }),
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

impl TryFrom<String> for TemplateKey {
    type Error = PilotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TemplateKey> for String {
    fn from(key: TemplateKey) -> Self {
        key.to_string()
    }
}

impl JsonSchema for TemplateKey {
    fn schema_name() -> String {
        "TemplateKey".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Frames and regions
// ────────────────────────────────────────────────────────────────────────────

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point, the natural tap target for a matched element.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Clip this region to a `width` × `height` canvas.  Returns `None` when
    /// nothing of the region remains.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<Region> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then(|| Region::new(self.x, self.y, w, h))
    }
}

/// An immutable RGB24 screen image.
///
/// The pixel buffer sits behind an [`Arc`], so cloning a frame is cheap and
/// many template evaluations can read the same buffer in parallel.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    captured_at: DateTime<Utc>,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Wrap a packed RGB24 buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Capture`] when a dimension is zero or the buffer
    /// length is not `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PilotError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(PilotError::Capture(format!(
                "invalid {width}x{height} frame: {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            captured_at: Utc::now(),
            pixels: pixels.into(),
        })
    }

    /// Build a frame by evaluating `paint` at every pixel.  Handy for
    /// synthetic screens in simulations and tests.
    ///
    /// Unlike [`Frame::from_rgb`] this cannot fail: a zero dimension is
    /// raised to one pixel, so the result is always a valid frame.
    pub fn from_fn(width: u32, height: u32, mut paint: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&paint(x, y));
            }
        }
        Self {
            width,
            height,
            captured_at: Utc::now(),
            pixels: pixels.into(),
        }
    }

    /// Return a copy of this frame stamped with the current time.
    pub fn restamped(&self) -> Self {
        Self {
            captured_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at `(x, y)`.  Panics when out of bounds, like slice
    /// indexing.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    pub fn bounds(&self) -> Region {
        Region::new(0, 0, self.width, self.height)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recognition
// ────────────────────────────────────────────────────────────────────────────

/// Matching strategy declared per template, with its parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchMethod {
    /// Zero-mean normalized cross-correlation over the template area.
    #[default]
    Exact,
    /// Keypoint/descriptor matching, tolerant to small scale or rotation
    /// drift.
    Feature {
        #[serde(default = "default_max_keypoints")]
        max_keypoints: usize,
        /// Lowe ratio: best distance must be below `ratio * second best`.
        #[serde(default = "default_ratio")]
        ratio: f32,
        /// Allowed displacement disagreement, as a fraction of the template
        /// diagonal.
        #[serde(default = "default_inlier_tolerance")]
        inlier_tolerance: f32,
    },
    /// Quantized colour histogram similarity for low-texture elements.
    Color {
        #[serde(default = "default_bins")]
        bins: u8,
        /// Sliding-window step in pixels; `0` means a quarter of the
        /// template's smaller side.
        #[serde(default)]
        stride: u32,
    },
}

fn default_max_keypoints() -> usize {
    64
}
fn default_ratio() -> f32 {
    0.8
}
fn default_inlier_tolerance() -> f32 {
    0.1
}
fn default_bins() -> u8 {
    8
}

impl MatchMethod {
    pub fn feature() -> Self {
        MatchMethod::Feature {
            max_keypoints: default_max_keypoints(),
            ratio: default_ratio(),
            inlier_tolerance: default_inlier_tolerance(),
        }
    }

    pub fn color() -> Self {
        MatchMethod::Color {
            bins: default_bins(),
            stride: 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Feature { .. } => "feature",
            MatchMethod::Color { .. } => "color",
        }
    }
}

/// Outcome of evaluating one template against one frame.
///
/// `accepted` is derived from the confidence and the template threshold at
/// construction, so an accepted result is never below its threshold and a
/// rejected one never reaches it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    template: TemplateKey,
    confidence: f32,
    threshold: f32,
    accepted: bool,
    region: Option<Region>,
}

impl MatchResult {
    /// Build a result, clamping `confidence` into `[0, 1]` (NaN becomes 0).
    pub fn new(
        template: TemplateKey,
        confidence: f32,
        threshold: f32,
        region: Option<Region>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            template,
            confidence,
            threshold,
            accepted: confidence >= threshold,
            region,
        }
    }

    /// A fail-closed result: confidence 0, no region.
    pub fn miss(template: TemplateKey, threshold: f32) -> Self {
        Self::new(template, 0.0, threshold, None)
    }

    pub fn template(&self) -> &TemplateKey {
        &self.template
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Input recipes
// ────────────────────────────────────────────────────────────────────────────

/// One primitive input operation, in screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InputOp {
    Tap {
        x: u32,
        y: u32,
    },
    /// Tap the centre of wherever `key` is found on a fresh frame.  Resolved
    /// to a [`InputOp::Tap`] before the recipe reaches the input device.
    TapTemplate {
        key: TemplateKey,
    },
    Swipe {
        from_x: u32,
        from_y: u32,
        to_x: u32,
        to_y: u32,
        #[serde(default = "default_gesture_ms")]
        duration_ms: u64,
    },
    Hold {
        x: u32,
        y: u32,
        #[serde(default = "default_gesture_ms")]
        duration_ms: u64,
    },
    Wait {
        ms: u64,
    },
}

fn default_gesture_ms() -> u64 {
    250
}

/// A named, ordered sequence of input operations bound to a transition or a
/// recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionRecipe {
    pub name: String,
    #[serde(default)]
    pub ops: Vec<InputOp>,
    /// How long the game usually takes to react once the recipe is
    /// dispatched.
    #[serde(default = "default_expected_duration_ms")]
    pub expected_duration_ms: u64,
}

fn default_expected_duration_ms() -> u64 {
    500
}

impl ActionRecipe {
    pub fn new(name: impl Into<String>, ops: Vec<InputOp>) -> Self {
        Self {
            name: name.into(),
            ops,
            expected_duration_ms: default_expected_duration_ms(),
        }
    }

    /// Single-tap recipe.
    pub fn tap(name: impl Into<String>, x: u32, y: u32) -> Self {
        Self::new(name, vec![InputOp::Tap { x, y }])
    }

    /// Single tap on a template located at execution time.
    pub fn tap_template(name: impl Into<String>, key: TemplateKey) -> Self {
        Self::new(name, vec![InputOp::TapTemplate { key }])
    }

    /// Templates this recipe locates before tapping.
    pub fn target_templates(&self) -> impl Iterator<Item = &TemplateKey> {
        self.ops.iter().filter_map(|op| match op {
            InputOp::TapTemplate { key } => Some(key),
            _ => None,
        })
    }

    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn expected_duration(&self) -> Duration {
        Duration::from_millis(self.expected_duration_ms)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Belief
// ────────────────────────────────────────────────────────────────────────────

/// The engine's current best guess of the application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBelief {
    /// `None` means the screen matched no modelled state.
    pub state: Option<StateId>,
    pub confidence: f32,
    /// When the belief was last confirmed by an observation.
    pub confirmed_at: DateTime<Utc>,
}

impl StateBelief {
    pub fn unknown() -> Self {
        Self {
            state: None,
            confidence: 0.0,
            confirmed_at: Utc::now(),
        }
    }

    pub fn confirmed(state: StateId, confidence: f32) -> Self {
        Self {
            state: Some(state),
            confidence,
            confirmed_at: Utc::now(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.state.is_some()
    }

    pub fn is(&self, state: &StateId) -> bool {
        self.state.as_ref() == Some(state)
    }

    /// Label used in logs and errors: the state id or `"unknown"`.
    pub fn label(&self) -> String {
        self.state
            .as_ref()
            .map_or_else(|| "unknown".to_string(), StateId::to_string)
    }
}

impl fmt::Display for StateBelief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label(), self.confidence)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Anomalies, recovery, diagnostics
// ────────────────────────────────────────────────────────────────────────────

/// Internal anomaly classes.  These are absorbed by navigation and recovery
/// and never returned to callers directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// No signature of the hinted state cleared its threshold.
    RecognitionAmbiguous,
    /// No modelled state could be confirmed.
    StateUnknown,
    /// The post-transition state did not appear in time.
    TransitionTimeout,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyKind::RecognitionAmbiguous => "recognition_ambiguous",
            AnomalyKind::StateUnknown => "state_unknown",
            AnomalyKind::TransitionTimeout => "transition_timeout",
        };
        f.write_str(s)
    }
}

/// Escalation level of the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    Reassess,
    Dismiss,
    ReturnToAnchor,
    Abort,
}

impl RecoveryTier {
    /// 1-based tier number.
    pub fn level(self) -> u8 {
        match self {
            RecoveryTier::Reassess => 1,
            RecoveryTier::Dismiss => 2,
            RecoveryTier::ReturnToAnchor => 3,
            RecoveryTier::Abort => 4,
        }
    }
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryTier::Reassess => "reassess",
            RecoveryTier::Dismiss => "dismiss",
            RecoveryTier::ReturnToAnchor => "return_to_anchor",
            RecoveryTier::Abort => "abort",
        };
        write!(f, "tier{}:{s}", self.level())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierOutcome {
    Resolved,
    Failed,
    TimedOut,
    Aborted,
}

/// One step of the story behind a navigation outcome.
///
/// Serialized internally tagged as `{"entry": "anomaly", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum TrailEntry {
    Observed {
        hint: Option<StateId>,
        state: Option<StateId>,
        confidence: f32,
    },
    Planned {
        from: StateId,
        to: StateId,
        /// `"from -> to"` label of each transition in order.
        transitions: Vec<String>,
        cost: u32,
        replan: bool,
    },
    TransitionAttempted {
        from: StateId,
        to: StateId,
        recipe: String,
        attempt: u32,
    },
    Arrived {
        state: StateId,
        confidence: f32,
        elapsed_ms: u64,
    },
    Anomaly {
        kind: AnomalyKind,
        expected: Option<StateId>,
        observed: Option<StateId>,
        elapsed_ms: u64,
    },
    Recovery {
        cause: AnomalyKind,
        tier: RecoveryTier,
        outcome: TierOutcome,
        state: Option<StateId>,
        confidence: f32,
    },
    Recognition {
        template: String,
        confidence: f32,
        accepted: bool,
    },
}

/// Ordered diagnostic history attached to every navigation outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTrail(Vec<TrailEntry>);

impl DiagnosticTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TrailEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[TrailEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recovery tier attempts in the order they happened.
    pub fn recovery_attempts(&self) -> Vec<(RecoveryTier, TierOutcome)> {
        self.0
            .iter()
            .filter_map(|e| match e {
                TrailEntry::Recovery { tier, outcome, .. } => Some((*tier, *outcome)),
                _ => None,
            })
            .collect()
    }

    /// Number of transition recipes that were dispatched.
    pub fn actions_executed(&self) -> usize {
        self.0
            .iter()
            .filter(|e| matches!(e, TrailEntry::TransitionAttempted { .. }))
            .count()
    }
}

/// Envelope published on the diagnostics bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"gamepilot-runtime::navigator"`
    pub source: String,
    pub payload: TrailEntry,
}

impl DiagnosticEvent {
    pub fn new(source: impl Into<String>, payload: TrailEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Successful navigation result.
#[derive(Debug, Clone)]
pub struct NavigationReport {
    pub goal: StateId,
    pub final_belief: StateBelief,
    pub trail: DiagnosticTrail,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Infrastructure errors raised by collaborators and loaders.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PilotError {
    #[error("Capture Error: {0}")]
    Capture(String),

    #[error("Input Error: {0}")]
    Input(String),

    #[error("Template Error on {key}: {details}")]
    Template { key: String, details: String },

    #[error("State Model Error: {0}")]
    Model(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

/// Terminal outcomes of a navigation request other than success.
#[derive(Error, Debug, Clone)]
pub enum NavError {
    #[error("goal '{to}' is unreachable from {from}")]
    Unreachable { from: String, to: StateId },

    #[error("navigation failed: {reason}")]
    NavigationFailed {
        reason: String,
        trail: DiagnosticTrail,
    },

    #[error("navigation cancelled")]
    Cancelled { trail: DiagnosticTrail },
}

impl NavError {
    /// Diagnostic trail attached to the outcome, if any.
    pub fn trail(&self) -> Option<&DiagnosticTrail> {
        match self {
            NavError::Unreachable { .. } => None,
            NavError::NavigationFailed { trail, .. } | NavError::Cancelled { trail } => Some(trail),
        }
    }
}
