//! In-process simulated game client for CI testing without an emulator.
//!
//! [`SimClient`] holds a table of screens (one [`Frame`] per state) and a
//! table of recipe-driven screen changes.  It implements both
//! [`ScreenCapture`] and [`InputDevice`], so the full navigation stack runs
//! headless.  Clones share the same simulated world, which lets a test keep
//! one handle for assertions while the navigator owns the others.
//!
//! # Behaviour
//!
//! | Event | Effect |
//! |---|---|
//! | recipe with a matching route | switch screen, optionally after N captures and/or under an overlay |
//! | recipe registered as a dismissal | clear the overlay |
//! | unknown recipe | nothing (like tapping an inert area) |
//! | capture | overlay if present, else the current screen |
//!
//! # Example
//!
//! ```rust
//! use gamepilot_hal::sim::SimClient;
//! use gamepilot_hal::{InputDevice, ScreenCapture};
//! use gamepilot_types::{ActionRecipe, Frame};
//!
//! let home = Frame::from_fn(8, 8, |_, _| [10, 10, 10]);
//! let shop = Frame::from_fn(8, 8, |_, _| [200, 0, 0]);
//! let client = SimClient::builder()
//!     .screen("home", home)
//!     .screen("shop", shop)
//!     .start_at("home")
//!     .route("home", "tapShopIcon", "shop")
//!     .build()
//!     .unwrap();
//!
//! let mut input = client.clone();
//! input.execute(&ActionRecipe::tap("tapShopIcon", 1, 1)).unwrap();
//! assert_eq!(client.current_state().unwrap().as_str(), "shop");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use gamepilot_types::{ActionRecipe, Frame, PilotError, Region, StateId};
use tracing::debug;

use crate::capture::ScreenCapture;
use crate::input::InputDevice;

// ────────────────────────────────────────────────────────────────────────────
// Effects
// ────────────────────────────────────────────────────────────────────────────

/// What a recipe does to the simulated world.
#[derive(Debug, Clone)]
pub struct SimEffect {
    /// Screen to show once the effect lands.
    pub target: StateId,
    /// Number of captures that still show the old screen first.
    pub delay_captures: u32,
    /// Overlay (popup) shown on top of the target screen.
    pub overlay: Option<Frame>,
}

impl SimEffect {
    pub fn goto(target: impl Into<StateId>) -> Self {
        Self {
            target: target.into(),
            delay_captures: 0,
            overlay: None,
        }
    }

    pub fn after_captures(mut self, captures: u32) -> Self {
        self.delay_captures = captures;
        self
    }

    pub fn with_overlay(mut self, overlay: Frame) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Synthetic screens
// ────────────────────────────────────────────────────────────────────────────

/// Texture painted inside a synthetic badge.  Each pattern correlates poorly
/// with the others, so one badge per screen is enough to tell screens apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgePattern {
    VerticalStripes,
    HorizontalStripes,
    Checker,
    Diagonal,
}

impl BadgePattern {
    fn lit(self, x: u32, y: u32) -> bool {
        match self {
            BadgePattern::VerticalStripes => x % 4 < 2,
            BadgePattern::HorizontalStripes => y % 4 < 2,
            BadgePattern::Checker => (x / 3 + y / 3) % 2 == 0,
            BadgePattern::Diagonal => ((x + 2 * y) / 3) % 3 == 0,
        }
    }
}

/// A flat dark screen with one `pattern` badge in `tint` covering `badge`.
pub fn badge_screen(
    width: u32,
    height: u32,
    badge: Region,
    pattern: BadgePattern,
    tint: [u8; 3],
) -> Frame {
    Frame::from_fn(width, height, |x, y| {
        let inside = x >= badge.x
            && x < badge.x + badge.width
            && y >= badge.y
            && y < badge.y + badge.height;
        if !inside {
            [24, 26, 32]
        } else if pattern.lit(x - badge.x, y - badge.y) {
            tint
        } else {
            [tint[0] / 4, tint[1] / 4, tint[2] / 4]
        }
    })
}

// ────────────────────────────────────────────────────────────────────────────
// World
// ────────────────────────────────────────────────────────────────────────────

struct SimWorld {
    screens: HashMap<StateId, Frame>,
    current: StateId,
    overlay: Option<Frame>,
    pending: Option<(SimEffect, u32)>,
    /// `(from, recipe)` routes; `from == None` applies from any screen.
    routes: HashMap<(Option<StateId>, String), SimEffect>,
    dismissals: Vec<String>,
    executed: Vec<String>,
    captures: u64,
    capture_failure: bool,
}

impl SimWorld {
    fn apply(&mut self, effect: SimEffect) {
        self.current = effect.target;
        self.overlay = effect.overlay;
    }

    fn advance_pending(&mut self) {
        if let Some((effect, remaining)) = self.pending.take() {
            if remaining == 0 {
                self.apply(effect);
            } else {
                self.pending = Some((effect, remaining - 1));
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimClient
// ────────────────────────────────────────────────────────────────────────────

/// Handle to a simulated game client.  Cheap to clone; all clones share one
/// world.
#[derive(Clone)]
pub struct SimClient {
    world: Arc<Mutex<SimWorld>>,
}

impl SimClient {
    pub fn builder() -> SimClientBuilder {
        SimClientBuilder::default()
    }

    fn world(&self) -> Result<MutexGuard<'_, SimWorld>, PilotError> {
        self.world
            .lock()
            .map_err(|_| PilotError::Capture("simulated world lock poisoned".to_string()))
    }

    /// The screen currently shown underneath any overlay.
    pub fn current_state(&self) -> Result<StateId, PilotError> {
        Ok(self.world()?.current.clone())
    }

    pub fn has_overlay(&self) -> bool {
        self.world().map(|w| w.overlay.is_some()).unwrap_or(false)
    }

    /// Names of every recipe executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.world().map(|w| w.executed.clone()).unwrap_or_default()
    }

    pub fn capture_count(&self) -> u64 {
        self.world().map(|w| w.captures).unwrap_or(0)
    }

    /// Show `overlay` on top of the current screen until dismissed.
    pub fn push_overlay(&self, overlay: Frame) -> Result<(), PilotError> {
        self.world()?.overlay = Some(overlay);
        Ok(())
    }

    /// Make subsequent captures fail (or succeed again).
    pub fn set_capture_failure(&self, failing: bool) -> Result<(), PilotError> {
        self.world()?.capture_failure = failing;
        Ok(())
    }

    /// Jump straight to `state`, dropping any overlay or pending effect.
    pub fn teleport(&self, state: impl Into<StateId>) -> Result<(), PilotError> {
        let mut world = self.world()?;
        world.current = state.into();
        world.overlay = None;
        world.pending = None;
        Ok(())
    }
}

impl ScreenCapture for SimClient {
    fn source(&self) -> &str {
        "sim"
    }

    fn current_frame(&mut self) -> Result<Frame, PilotError> {
        let mut world = self.world()?;
        world.captures += 1;
        if world.capture_failure {
            return Err(PilotError::Capture("simulated capture failure".to_string()));
        }
        world.advance_pending();
        let frame = match &world.overlay {
            Some(overlay) => overlay,
            None => world.screens.get(&world.current).ok_or_else(|| {
                PilotError::Capture(format!("no screen registered for '{}'", world.current))
            })?,
        };
        Ok(frame.restamped())
    }
}

impl InputDevice for SimClient {
    fn id(&self) -> &str {
        "sim"
    }

    fn execute(&mut self, recipe: &ActionRecipe) -> Result<(), PilotError> {
        let mut world = self
            .world
            .lock()
            .map_err(|_| PilotError::Input("simulated world lock poisoned".to_string()))?;
        world.executed.push(recipe.name.clone());

        if world.overlay.is_some() && world.dismissals.contains(&recipe.name) {
            debug!(recipe = %recipe.name, "sim: overlay dismissed");
            world.overlay = None;
            return Ok(());
        }

        let from = world.current.clone();
        let effect = world
            .routes
            .get(&(Some(from.clone()), recipe.name.clone()))
            .or_else(|| world.routes.get(&(None, recipe.name.clone())))
            .cloned();

        match effect {
            Some(effect) if effect.delay_captures == 0 => {
                debug!(recipe = %recipe.name, %from, to = %effect.target, "sim: screen change");
                world.apply(effect);
            }
            Some(effect) => {
                let delay = effect.delay_captures;
                world.pending = Some((effect, delay));
            }
            None => debug!(recipe = %recipe.name, %from, "sim: recipe had no effect"),
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimClient`].
#[derive(Default)]
pub struct SimClientBuilder {
    screens: HashMap<StateId, Frame>,
    start: Option<StateId>,
    routes: HashMap<(Option<StateId>, String), SimEffect>,
    dismissals: Vec<String>,
}

impl SimClientBuilder {
    /// Register the frame shown while the game is in `state`.
    pub fn screen(mut self, state: impl Into<StateId>, frame: Frame) -> Self {
        self.screens.insert(state.into(), frame);
        self
    }

    pub fn start_at(mut self, state: impl Into<StateId>) -> Self {
        self.start = Some(state.into());
        self
    }

    /// Executing `recipe` while on `from` switches to `to` immediately.
    pub fn route(
        self,
        from: impl Into<StateId>,
        recipe: impl Into<String>,
        to: impl Into<StateId>,
    ) -> Self {
        self.route_effect(from, recipe, SimEffect::goto(to))
    }

    /// Executing `recipe` while on `from` applies `effect`.
    pub fn route_effect(
        mut self,
        from: impl Into<StateId>,
        recipe: impl Into<String>,
        effect: SimEffect,
    ) -> Self {
        self.routes
            .insert((Some(from.into()), recipe.into()), effect);
        self
    }

    /// Executing `recipe` from any screen applies `effect`.
    pub fn global_route(mut self, recipe: impl Into<String>, effect: SimEffect) -> Self {
        self.routes.insert((None, recipe.into()), effect);
        self
    }

    /// `recipe` closes whatever overlay is showing.
    pub fn dismiss_with(mut self, recipe: impl Into<String>) -> Self {
        self.dismissals.push(recipe.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`PilotError::Config`] when no start screen was given or a
    /// route targets a screen without a frame.
    pub fn build(self) -> Result<SimClient, PilotError> {
        let start = self
            .start
            .ok_or_else(|| PilotError::Config("sim client needs a start screen".to_string()))?;
        if !self.screens.contains_key(&start) {
            return Err(PilotError::Config(format!("no screen for start state '{start}'")));
        }
        if let Some(effect) = self
            .routes
            .values()
            .find(|e| !self.screens.contains_key(&e.target))
        {
            return Err(PilotError::Config(format!(
                "route targets '{}' which has no screen",
                effect.target
            )));
        }
        Ok(SimClient {
            world: Arc::new(Mutex::new(SimWorld {
                screens: self.screens,
                current: start,
                overlay: None,
                pending: None,
                routes: self.routes,
                dismissals: self.dismissals,
                executed: Vec::new(),
                captures: 0,
                capture_failure: false,
            })),
        })
    }
}
