//! `gamepilot-hal` – Collaborator seams
//!
//! The boundary between the control loop and the outside world.  The loop
//! only talks to these traits, so capture and input backends can be swapped
//! without touching recognition or navigation logic.
//!
//! # Modules
//!
//! - [`capture`] – [`ScreenCapture`]: supplies the current frame on demand.
//! - [`input`] – [`InputDevice`]: executes an
//!   [`ActionRecipe`][gamepilot_types::ActionRecipe] of taps, swipes and
//!   holds.
//! - [`sim`] – [`SimClient`][sim::SimClient]: an in-process simulated game
//!   client implementing both traits for headless tests and demos.

pub mod capture;
pub mod input;
pub mod sim;

pub use capture::ScreenCapture;
pub use input::InputDevice;
pub use sim::{BadgePattern, SimClient, SimEffect, badge_screen};
