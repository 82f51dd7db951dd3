//! [`Session`] – the collaborators of one control loop.
//!
//! Bundles the estimator with the capture and input backends and the
//! diagnostics sink, so navigation and recovery share a single
//! observe/act/record surface.
//!
//! Template-targeted taps in a recipe are located on one fresh frame just
//! before the recipe is dispatched and replaced by plain taps at the centre
//! of the match.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use gamepilot_hal::{InputDevice, ScreenCapture};
use gamepilot_middleware::{DiagnosticsSink, NullSink};
use gamepilot_types::{
    ActionRecipe, DiagnosticEvent, DiagnosticTrail, InputOp, PilotError, StateBelief, StateId,
    TrailEntry,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::estimator::StateEstimator;

const SOURCE: &str = "gamepilot-runtime::navigator";

pub struct Session {
    estimator: StateEstimator,
    capture: Box<dyn ScreenCapture>,
    input: Box<dyn InputDevice>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl Session {
    pub fn new(
        estimator: StateEstimator,
        capture: Box<dyn ScreenCapture>,
        input: Box<dyn InputDevice>,
    ) -> Self {
        Self {
            estimator,
            capture,
            input,
            sink: Arc::new(NullSink),
        }
    }

    /// Route trail entries and estimator observations to `sink`.
    pub fn with_sink(self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            estimator: self.estimator.with_sink(Arc::clone(&sink)),
            sink,
            ..self
        }
    }

    pub fn belief(&self) -> &StateBelief {
        self.estimator.belief()
    }

    pub fn estimator(&self) -> &StateEstimator {
        &self.estimator
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.estimator.is_fresh(window)
    }

    /// Capture a frame and update the belief from it.
    ///
    /// # Errors
    ///
    /// The capture error; the belief is left untouched.
    pub fn observe(&mut self, hint: Option<&StateId>) -> Result<StateBelief, PilotError> {
        let frame = self.capture.current_frame()?;
        Ok(self.estimator.estimate(&frame, hint).clone())
    }

    /// Dispatch `recipe` to the input backend.  Never interrupted.
    ///
    /// # Errors
    ///
    /// - [`PilotError::Template`] – a tap target is not on screen; nothing
    ///   was dispatched.
    /// - [`PilotError::Capture`] – the frame for locating tap targets could
    ///   not be taken; nothing was dispatched.
    /// - [`PilotError::Input`] – the backend failed.
    pub fn execute(&mut self, recipe: &ActionRecipe) -> Result<(), PilotError> {
        let recipe = self.resolve_targets(recipe)?;
        debug!(recipe = %recipe.name, device = self.input.id(), "executing recipe");
        self.input.execute(&recipe)
    }

    fn resolve_targets<'r>(
        &mut self,
        recipe: &'r ActionRecipe,
    ) -> Result<Cow<'r, ActionRecipe>, PilotError> {
        if recipe.target_templates().next().is_none() {
            return Ok(Cow::Borrowed(recipe));
        }
        let frame = self.capture.current_frame()?;
        let recognizer = self.estimator.recognizer();
        let mut resolved = recipe.clone();
        for op in &mut resolved.ops {
            let InputOp::TapTemplate { key } = op else {
                continue;
            };
            let Some(region) = recognizer.find(&frame, key).and_then(|hit| hit.region()) else {
                return Err(PilotError::Template {
                    key: key.to_string(),
                    details: format!("tap target of '{}' is not on screen", recipe.name),
                });
            };
            let (x, y) = region.center();
            debug!(template = %key, x, y, "tap target located");
            *op = InputOp::Tap { x, y };
        }
        Ok(Cow::Owned(resolved))
    }

    /// Append `entry` to `trail` and publish it.
    pub fn record(&self, trail: &mut DiagnosticTrail, entry: TrailEntry) {
        self.sink.emit(DiagnosticEvent::new(SOURCE, entry.clone()));
        trail.push(entry);
    }
}

/// Sleep for `duration` unless `cancel` fires first.  Returns `true` when
/// cancelled.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use gamepilot_hal::{BadgePattern, badge_screen};
    use gamepilot_kernel::{StateDef, StateGraphBuilder};
    use gamepilot_perception::{Recognizer, Template, TemplateRegistry};
    use gamepilot_types::{Frame, MatchMethod, Region, TemplateKey};

    use crate::estimator::EstimatorConfig;

    const BADGE: Region = Region {
        x: 20,
        y: 12,
        width: 24,
        height: 24,
    };

    fn home() -> Frame {
        badge_screen(80, 56, BADGE, BadgePattern::VerticalStripes, [90, 180, 240])
    }

    struct FixedScreen(Frame);

    impl ScreenCapture for FixedScreen {
        fn source(&self) -> &str {
            "fixed"
        }

        fn current_frame(&mut self) -> Result<Frame, PilotError> {
            Ok(self.0.clone())
        }
    }

    /// Records every recipe it receives.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ActionRecipe>>>);

    impl InputDevice for Recorder {
        fn id(&self) -> &str {
            "recorder"
        }

        fn execute(&mut self, recipe: &ActionRecipe) -> Result<(), PilotError> {
            self.0.lock().unwrap().push(recipe.clone());
            Ok(())
        }
    }

    fn session(screen: Frame, input: Recorder) -> Session {
        let key = TemplateKey::new("home", "badge");
        let mut reg = TemplateRegistry::new();
        reg.register(
            Template::from_frame_region(key.clone(), &home(), BADGE, MatchMethod::Exact, 0.9)
                .unwrap(),
        )
        .unwrap();
        let graph = StateGraphBuilder::new("home")
            .state(StateDef::new("home").with_signature(key))
            .build(&reg)
            .unwrap();
        let estimator = StateEstimator::new(
            Arc::new(graph),
            Recognizer::new(Arc::new(reg)),
            EstimatorConfig::default(),
        );
        Session::new(estimator, Box::new(FixedScreen(screen)), Box::new(input))
    }

    #[test]
    fn tap_template_lands_on_match_centre() {
        let input = Recorder::default();
        let mut session = session(home(), input.clone());
        let recipe = ActionRecipe::new(
            "openBadge",
            vec![
                InputOp::Wait { ms: 10 },
                InputOp::TapTemplate {
                    key: TemplateKey::new("home", "badge"),
                },
            ],
        );

        session.execute(&recipe).unwrap();

        let sent = input.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, "openBadge");
        assert_eq!(
            sent[0].ops,
            vec![InputOp::Wait { ms: 10 }, InputOp::Tap { x: 32, y: 24 }]
        );
    }

    #[test]
    fn missing_tap_target_dispatches_nothing() {
        let input = Recorder::default();
        let blank = Frame::from_fn(80, 56, |_, _| [24, 26, 32]);
        let mut session = session(blank, input.clone());

        let err = session
            .execute(&ActionRecipe::tap_template("openBadge", TemplateKey::new("home", "badge")))
            .unwrap_err();

        assert!(matches!(err, PilotError::Template { ref key, .. } if key == "home/badge"));
        assert!(input.0.lock().unwrap().is_empty());
    }

    #[test]
    fn positional_recipe_is_passed_through() {
        let input = Recorder::default();
        let mut session = session(Frame::from_fn(4, 4, |_, _| [0, 0, 0]), input.clone());
        session.execute(&ActionRecipe::tap("tapShopIcon", 5, 6)).unwrap();
        assert_eq!(input.0.lock().unwrap()[0], ActionRecipe::tap("tapShopIcon", 5, 6));
    }
}
