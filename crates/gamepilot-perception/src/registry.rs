//! Keyed store of loaded templates.
//!
//! Registration order is significant: it breaks confidence ties in
//! [`Recognizer`](crate::Recognizer) output, so two runs over the same
//! content rank equal matches identically.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use gamepilot_types::{MatchMethod, PilotError, TemplateKey};
use tracing::{debug, warn};

use crate::template::Template;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Arc<Template>>,
    index: HashMap<TemplateKey, usize>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template.  Keys are unique.
    pub fn register(&mut self, template: Template) -> Result<(), PilotError> {
        let key = template.key().clone();
        if self.index.contains_key(&key) {
            return Err(PilotError::Template {
                key: key.to_string(),
                details: "already registered".to_string(),
            });
        }
        debug!(template = %key, method = template.method().label(), "template registered");
        self.index.insert(key, self.templates.len());
        self.templates.push(Arc::new(template));
        Ok(())
    }

    pub fn get(&self, key: &TemplateKey) -> Option<&Arc<Template>> {
        self.index.get(key).map(|&i| &self.templates[i])
    }

    pub fn contains(&self, key: &TemplateKey) -> bool {
        self.index.contains_key(key)
    }

    /// Registration position of `key`.
    pub fn index_of(&self, key: &TemplateKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.templates.iter().map(|t| t.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Template>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every image under `root`, one sub-directory per category
    /// (`root/home/shop_button.png` → `home/shop_button`).  Nested
    /// directories produce nested categories.  Images directly under `root`
    /// have no category and are skipped.  Returns the number loaded.
    pub fn load_dir(
        &mut self,
        root: impl AsRef<Path>,
        method: &MatchMethod,
        threshold: f32,
    ) -> Result<usize, PilotError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(PilotError::Config(format!(
                "template directory {} does not exist",
                root.display()
            )));
        }
        let mut loaded = 0;
        self.load_category(root, None, method, threshold, &mut loaded)?;
        Ok(loaded)
    }

    fn load_category(
        &mut self,
        dir: &Path,
        category: Option<&str>,
        method: &MatchMethod,
        threshold: f32,
        loaded: &mut usize,
    ) -> Result<(), PilotError> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .map_err(|e| PilotError::Config(format!("cannot read {}: {e}", dir.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for path in entries {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.is_dir() {
                let nested = match category {
                    Some(parent) => format!("{parent}/{stem}"),
                    None => stem.to_string(),
                };
                self.load_category(&path, Some(&nested), method, threshold, loaded)?;
                continue;
            }
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !is_image {
                continue;
            }
            let Some(category) = category else {
                warn!(path = %path.display(), "image outside any category directory skipped");
                continue;
            };
            let key = TemplateKey::new(category, stem);
            if self.contains(&key) {
                // Explicitly declared templates take precedence.
                continue;
            }
            self.register(Template::load(key, &path, method.clone(), threshold)?)?;
            *loaded += 1;
        }
        Ok(())
    }
}
