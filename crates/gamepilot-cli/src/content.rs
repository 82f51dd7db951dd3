//! Content files – the declarative game model.
//!
//! A content file names the template images, the states they identify, the
//! transitions between states and the recovery recipes.  Paths are relative
//! to the content file.
//!
//! ```toml
//! root = "home"
//! templates_dir = "templates"        # templates/<category>/<name>.png
//!
//! [defaults]
//! threshold = 0.85
//!
//! [[template]]
//! category = "shop"
//! name = "title"
//! path = "art/shop_title.png"
//! method = { kind = "feature" }
//! region = { x = 0, y = 0, width = 1080, height = 300 }
//!
//! [[state]]
//! id = "shop"
//! signatures = ["shop/title"]
//!
//! [[transition]]
//! from = "home"
//! to = "shop"
//! recipe = { name = "tapShopIcon", ops = [{ op = "tap", x = 540, y = 1700 }] }
//!
//! [recovery]
//! dismiss = [{ name = "closePopup", ops = [{ op = "tap", x = 1000, y = 180 }] }]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gamepilot_kernel::{SignaturePolicy, StateDef, StateGraph, StateGraphBuilder};
use gamepilot_perception::{Template, TemplateRegistry};
use gamepilot_runtime::RecoveryConfig;
use gamepilot_types::{ActionRecipe, MatchMethod, PilotError, Region, TemplateKey};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// File format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContentFile {
    /// Root state of the hierarchy; also the anchor unless `anchor` is set.
    pub root: String,
    /// Safe state recovery returns to.
    #[serde(default)]
    pub anchor: Option<String>,
    /// Directory of `<category>/<name>.<ext>` images loaded with the
    /// defaults.  Explicit `[[template]]` entries win on key clashes.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default)]
    pub defaults: TemplateDefaults,
    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateSpec>,
    #[serde(default, rename = "state")]
    pub states: Vec<StateSpec>,
    #[serde(default, rename = "transition")]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub recovery: RecoverySpec,
}

/// Method and threshold for templates that do not set their own.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TemplateDefaults {
    #[serde(default)]
    pub method: MatchMethod,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for TemplateDefaults {
    fn default() -> Self {
        Self {
            method: MatchMethod::default(),
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f32 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TemplateSpec {
    pub category: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub method: Option<MatchMethod>,
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Restrict matching to this part of the frame.
    #[serde(default)]
    pub region: Option<Region>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// `category/name` template keys.
    pub signatures: Vec<String>,
    #[serde(default)]
    pub policy: SignaturePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    pub recipe: ActionRecipe,
    #[serde(default = "default_cost")]
    pub cost: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cost() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecoverySpec {
    /// Tried in order to close popups and overlays.
    #[serde(default)]
    pub dismiss: Vec<ActionRecipe>,
    /// Chain that brings the client back to the anchor.
    #[serde(default)]
    pub anchor_return: Vec<ActionRecipe>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loaded content
// ─────────────────────────────────────────────────────────────────────────────

/// A validated model ready to drive a navigator.
#[derive(Debug)]
pub struct Content {
    pub registry: Arc<TemplateRegistry>,
    pub graph: Arc<StateGraph>,
    /// Recipes only; timing comes from the user config.
    pub recovery: RecoveryConfig,
}

/// Read, parse and validate the content file at `path`.
pub fn load(path: &Path) -> Result<Content, PilotError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| PilotError::Config(format!("cannot read {}: {e}", path.display())))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse(&raw)?.build(base)
}

pub fn parse(raw: &str) -> Result<ContentFile, PilotError> {
    toml::from_str(raw).map_err(|e| PilotError::Config(format!("invalid content file: {e}")))
}

/// JSON Schema of [`ContentFile`], pretty-printed.
pub fn schema() -> Result<String, PilotError> {
    let schema = schemars::schema_for!(ContentFile);
    serde_json::to_string_pretty(&schema)
        .map_err(|e| PilotError::Config(format!("cannot render schema: {e}")))
}

impl ContentFile {
    /// Load templates relative to `base` and build the state graph.
    pub fn build(self, base: &Path) -> Result<Content, PilotError> {
        let mut registry = TemplateRegistry::new();
        for spec in &self.templates {
            let key = TemplateKey::new(&spec.category, &spec.name);
            let method = spec.method.clone().unwrap_or_else(|| self.defaults.method.clone());
            let threshold = spec.threshold.unwrap_or(self.defaults.threshold);
            let mut template = Template::load(key, base.join(&spec.path), method, threshold)?;
            if let Some(region) = spec.region {
                template = template.with_search_region(region);
            }
            registry.register(template)?;
        }
        if let Some(dir) = &self.templates_dir {
            let loaded =
                registry.load_dir(base.join(dir), &self.defaults.method, self.defaults.threshold)?;
            info!(dir = %dir.display(), loaded, "templates loaded from directory");
        }

        let mut builder = StateGraphBuilder::new(self.root.as_str());
        if let Some(anchor) = &self.anchor {
            builder = builder.anchor(anchor.as_str());
        }
        for spec in self.states {
            let mut state = StateDef::new(spec.id).with_policy(spec.policy);
            if let Some(parent) = spec.parent {
                state = state.with_parent(parent);
            }
            for raw in &spec.signatures {
                state = state.with_signature(TemplateKey::parse(raw)?);
            }
            builder = builder.state(state);
        }
        for t in self.transitions {
            builder = builder.weighted_transition(
                t.from,
                t.to,
                t.recipe,
                t.cost,
                Duration::from_millis(t.timeout_ms),
            );
        }
        let graph = builder.build(&registry)?;

        let recovery = self.recovery.dismiss.iter().chain(&self.recovery.anchor_return);
        for recipe in recovery {
            if let Some(missing) = recipe.target_templates().find(|k| !registry.contains(k)) {
                return Err(PilotError::Model(format!(
                    "recovery recipe '{}' taps unknown template '{missing}'",
                    recipe.name
                )));
            }
        }

        Ok(Content {
            registry: Arc::new(registry),
            graph: Arc::new(graph),
            recovery: RecoveryConfig {
                dismiss: self.recovery.dismiss,
                anchor_return: self.recovery.anchor_return,
                ..RecoveryConfig::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn stripes(path: &Path, vertical: bool) {
        let img = RgbImage::from_fn(24, 24, |x, y| {
            let v = if vertical { x } else { y };
            if v % 4 < 2 { Rgb([230, 200, 90]) } else { Rgb([57, 50, 22]) }
        });
        img.save(path).expect("save png");
    }

    /// `<dir>/art/home.png` and `<dir>/templates/shop/title.png`.
    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::create_dir_all(dir.path().join("art")).expect("mkdir");
        fs::create_dir_all(dir.path().join("templates/shop")).expect("mkdir");
        stripes(&dir.path().join("art/home.png"), true);
        stripes(&dir.path().join("templates/shop/title.png"), false);
        dir
    }

    const CONTENT: &str = r#"
root = "home"
templates_dir = "templates"

[defaults]
threshold = 0.9

[[template]]
category = "home"
name = "badge"
path = "art/home.png"
region = { x = 0, y = 0, width = 64, height = 64 }

[[state]]
id = "home"
signatures = ["home/badge"]

[[state]]
id = "shop"
signatures = ["shop/title"]

[[transition]]
from = "home"
to = "shop"
recipe = { name = "tapShopIcon", ops = [{ op = "tap", x = 10, y = 10 }] }
cost = 2

[[transition]]
from = "shop"
to = "home"
recipe = { name = "tapReturnHome", ops = [{ op = "tap", x = 5, y = 5 }] }
timeout_ms = 2000

[recovery]
dismiss = [{ name = "closePopup", ops = [{ op = "tap", x = 60, y = 4 }] }]
"#;

    #[test]
    fn builds_registry_graph_and_recovery() {
        let dir = fixture();
        let content = parse(CONTENT).expect("parse").build(dir.path()).expect("build");

        assert_eq!(content.registry.len(), 2);
        let badge = content
            .registry
            .get(&TemplateKey::new("home", "badge"))
            .expect("badge");
        assert_eq!(badge.threshold(), 0.9);
        assert!(badge.search_region().is_some());

        assert_eq!(content.graph.state_count(), 2);
        assert_eq!(content.graph.anchor().as_str(), "home");
        let costs: Vec<u32> = content.graph.transitions().iter().map(|t| t.cost).collect();
        assert_eq!(costs, vec![2, 1]);
        assert_eq!(content.graph.transitions()[1].timeout, Duration::from_secs(2));
        assert_eq!(content.recovery.dismiss[0].name, "closePopup");
        assert!(content.recovery.anchor_return.is_empty());
    }

    #[test]
    fn load_resolves_paths_against_content_file() {
        let dir = fixture();
        let path = dir.path().join("game.toml");
        fs::write(&path, CONTENT).expect("write");
        let content = load(&path).expect("load");
        assert!(content.graph.contains(&"shop".into()));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = parse("root = \"home\"\nroots = 1\n").unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[test]
    fn signature_without_template_fails_validation() {
        let dir = fixture();
        let raw = CONTENT.replace("[\"shop/title\"]", "[\"shop/missing\"]");
        let result = parse(&raw).expect("parse").build(dir.path());
        assert!(matches!(result, Err(PilotError::Model(_))));
    }

    #[test]
    fn recovery_tap_targets_must_be_registered() {
        let dir = fixture();
        let located = r#"dismiss = [{ name = "closePopup", ops = [{ op = "tap_template", key = "home/badge" }] }]"#;
        let raw = CONTENT.replace(
            r#"dismiss = [{ name = "closePopup", ops = [{ op = "tap", x = 60, y = 4 }] }]"#,
            located,
        );
        let content = parse(&raw).expect("parse").build(dir.path()).expect("build");
        assert_eq!(content.recovery.dismiss[0].target_templates().count(), 1);

        let raw = raw.replace("home/badge\" }]", "home/close\" }]");
        let err = parse(&raw).expect("parse").build(dir.path()).unwrap_err();
        assert!(matches!(&err, PilotError::Model(m) if m.contains("home/close")), "{err}");
    }

    #[test]
    fn missing_image_is_template_error() {
        let dir = fixture();
        let raw = CONTENT.replace("art/home.png", "art/nowhere.png");
        let result = parse(&raw).expect("parse").build(dir.path());
        assert!(matches!(result, Err(PilotError::Template { .. })));
    }

    #[test]
    fn schema_describes_content_sections() {
        let schema = schema().expect("schema");
        for field in ["root", "template", "state", "transition", "recovery"] {
            assert!(schema.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }
}
