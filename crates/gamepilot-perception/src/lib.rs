//! `gamepilot-perception` – Recognition Engine.
//!
//! Turns a raw screen frame into confidence-scored observations of known UI
//! elements.  Pure functions of the frame and the template registry: no
//! state is kept between calls.
//!
//! # Modules
//!
//! - [`template`] – [`Template`]: one reference image, its
//!   [`MatchMethod`][gamepilot_types::MatchMethod], threshold and optional
//!   search region.
//! - [`registry`] – [`TemplateRegistry`]: keyed, ordered template store,
//!   loadable from a `category/name.png` directory tree.
//! - [`recognizer`] – [`Recognizer`]: evaluates a set of templates in
//!   parallel and ranks the results.
//! - [`ncc`], [`features`], [`histogram`] – the three matchers.
//! - [`luma`] – grayscale planes and integral images shared by the matchers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gamepilot_perception::{Recognizer, Template, TemplateRegistry};
//! use gamepilot_types::{Frame, MatchMethod, Region, TemplateKey};
//!
//! let screen = Frame::from_fn(32, 32, |x, y| {
//!     if (8..16).contains(&x) && (8..16).contains(&y) {
//!         if (x + y) % 2 == 0 { [255, 255, 255] } else { [0, 0, 0] }
//!     } else {
//!         [40, 40, 40]
//!     }
//! });
//! let key = TemplateKey::new("home", "badge");
//! let badge = Template::from_frame_region(
//!     key.clone(),
//!     &screen,
//!     Region::new(6, 6, 12, 12),
//!     MatchMethod::Exact,
//!     0.9,
//! )
//! .unwrap();
//!
//! let mut registry = TemplateRegistry::new();
//! registry.register(badge).unwrap();
//! let recognizer = Recognizer::new(Arc::new(registry));
//!
//! let hit = recognizer.find(&screen, &key).unwrap();
//! assert_eq!(hit.region(), Some(Region::new(6, 6, 12, 12)));
//! ```

pub mod features;
pub mod histogram;
pub mod luma;
pub mod ncc;
pub mod recognizer;
pub mod registry;
pub mod template;

pub use recognizer::Recognizer;
pub use registry::TemplateRegistry;
pub use template::Template;
