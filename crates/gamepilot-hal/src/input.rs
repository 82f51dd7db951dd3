//! Generic `InputDevice` trait for anything that can deliver taps, swipes
//! and holds to the game client.
//!
//! The rest of the system only ever talks to the trait, so an emulator
//! bridge, an OS-level pointer driver or a simulation can be swapped without
//! touching recognition or navigation logic.

use gamepilot_types::{ActionRecipe, PilotError};

/// An input backend that executes [`ActionRecipe`]s.
///
/// `execute` returns once the whole recipe has been dispatched; the timing of
/// individual gestures is the backend's concern.  A recipe is never
/// interrupted half-way by the control loop.
///
/// Template-targeted taps are resolved to coordinates before a recipe gets
/// here, so backends only see positional operations.
pub trait InputDevice: Send + Sync {
    /// Stable identifier for this backend, e.g. `"adb_touch"`.
    fn id(&self) -> &str;

    /// Dispatch every operation of `recipe` in order.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Input`] if the recipe could not be delivered.
    fn execute(&mut self, recipe: &ActionRecipe) -> Result<(), PilotError>;
}
