//! A reference image of one UI element plus how to look for it.
//!
//! Matcher-specific data (centered luma, keypoints, histograms) is computed
//! once when the template is built, so evaluating it against a frame does no
//! template-side work.

use std::path::Path;

use gamepilot_types::{Frame, MatchMethod, MatchResult, PilotError, Region, TemplateKey};
use image::RgbImage;
use tracing::trace;

use crate::features::{FeatureModel, match_features};
use crate::histogram::{ColorModel, match_color};
use crate::luma::LumaPlane;
use crate::ncc::{ExactModel, match_exact};

#[derive(Debug, Clone)]
enum TemplateModel {
    Exact(ExactModel),
    Feature(FeatureModel),
    Color(ColorModel),
}

/// Immutable template, shared across threads behind an `Arc` by the
/// registry.
#[derive(Debug, Clone)]
pub struct Template {
    key: TemplateKey,
    method: MatchMethod,
    threshold: f32,
    search_region: Option<Region>,
    width: u32,
    height: u32,
    model: TemplateModel,
}

impl Template {
    /// Build a template from a packed RGB24 buffer.
    ///
    /// # Errors
    ///
    /// [`PilotError::Template`] when the threshold is outside `[0, 1]`, a
    /// dimension is zero, or the buffer size does not match.
    pub fn from_rgb(
        key: TemplateKey,
        width: u32,
        height: u32,
        rgb: &[u8],
        method: MatchMethod,
        threshold: f32,
    ) -> Result<Self, PilotError> {
        let invalid = |details: String| PilotError::Template {
            key: key.to_string(),
            details,
        };
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(format!("threshold {threshold} outside [0, 1]")));
        }
        if width == 0 || height == 0 {
            return Err(invalid(format!("empty image {width}x{height}")));
        }
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(invalid(format!(
                "{} bytes of pixel data, expected {expected}",
                rgb.len()
            )));
        }

        let model = match &method {
            MatchMethod::Exact => {
                TemplateModel::Exact(ExactModel::new(LumaPlane::from_rgb(
                    width as usize,
                    height as usize,
                    rgb,
                )))
            }
            MatchMethod::Feature {
                max_keypoints,
                ratio,
                inlier_tolerance,
            } => {
                let plane = LumaPlane::from_rgb(width as usize, height as usize, rgb);
                let model = FeatureModel::new(&plane, *max_keypoints, *ratio, *inlier_tolerance);
                if model.keypoint_count() == 0 {
                    tracing::warn!(template = %key, "feature template has no keypoints and will never match");
                }
                TemplateModel::Feature(model)
            }
            MatchMethod::Color { bins, stride } => {
                TemplateModel::Color(ColorModel::new(width, height, rgb, *bins, *stride))
            }
        };

        Ok(Self {
            key,
            method,
            threshold,
            search_region: None,
            width,
            height,
            model,
        })
    }

    /// Cut a template out of `region` of an existing frame.
    pub fn from_frame_region(
        key: TemplateKey,
        frame: &Frame,
        region: Region,
        method: MatchMethod,
        threshold: f32,
    ) -> Result<Self, PilotError> {
        let Some(region) = region
            .clipped_to(frame.width(), frame.height())
            .filter(|r| *r == region)
        else {
            return Err(PilotError::Template {
                key: key.to_string(),
                details: format!("region {region:?} is outside the frame"),
            });
        };
        let mut rgb = Vec::with_capacity(region.width as usize * region.height as usize * 3);
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                rgb.extend_from_slice(&frame.rgb(x, y));
            }
        }
        Self::from_rgb(key, region.width, region.height, &rgb, method, threshold)
    }

    pub fn from_image(
        key: TemplateKey,
        image: &RgbImage,
        method: MatchMethod,
        threshold: f32,
    ) -> Result<Self, PilotError> {
        Self::from_rgb(key, image.width(), image.height(), image.as_raw(), method, threshold)
    }

    /// Decode an image file (any format the `image` crate reads).
    pub fn load(
        key: TemplateKey,
        path: impl AsRef<Path>,
        method: MatchMethod,
        threshold: f32,
    ) -> Result<Self, PilotError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| PilotError::Template {
            key: key.to_string(),
            details: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_image(key, &image.to_rgb8(), method, threshold)
    }

    /// Restrict the search to `region` of the frame.
    pub fn with_search_region(mut self, region: Region) -> Self {
        self.search_region = Some(region);
        self
    }

    pub fn key(&self) -> &TemplateKey {
        &self.key
    }

    pub fn method(&self) -> &MatchMethod {
        &self.method
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn search_region(&self) -> Option<Region> {
        self.search_region
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Evaluate against one frame.  Never fails: a template that cannot be
    /// evaluated (empty clipped region, template larger than the search area)
    /// yields a zero-confidence rejected result.
    pub fn evaluate(&self, frame: &Frame) -> MatchResult {
        self.evaluate_within(frame, self.search_region.unwrap_or_else(|| frame.bounds()))
    }

    /// Overlapping windows, twice the template size and one template apart,
    /// that together contain every placement inside the search area.  Empty
    /// when the template cannot fit.
    pub fn scan_windows(&self, frame: &Frame) -> Vec<Region> {
        let area = self
            .search_region
            .unwrap_or_else(|| frame.bounds())
            .clipped_to(frame.width(), frame.height());
        let Some(area) = area.filter(|a| self.width <= a.width && self.height <= a.height) else {
            return Vec::new();
        };
        let mut windows = Vec::new();
        for dy in (0..=area.height - self.height).step_by(self.height as usize) {
            for dx in (0..=area.width - self.width).step_by(self.width as usize) {
                windows.push(Region::new(
                    area.x + dx,
                    area.y + dy,
                    (2 * self.width).min(area.width - dx),
                    (2 * self.height).min(area.height - dy),
                ));
            }
        }
        windows
    }

    /// [`Template::evaluate`] over `area` instead of the search region.
    pub fn evaluate_within(&self, frame: &Frame, area: Region) -> MatchResult {
        let Some(area) = area.clipped_to(frame.width(), frame.height()) else {
            trace!(template = %self.key, "search region outside frame");
            return MatchResult::miss(self.key.clone(), self.threshold);
        };
        if self.width > area.width || self.height > area.height {
            trace!(template = %self.key, "template larger than search area");
            return MatchResult::miss(self.key.clone(), self.threshold);
        }

        let located = match &self.model {
            TemplateModel::Exact(model) => {
                let plane = LumaPlane::from_frame_region(frame, area);
                match_exact(model, &plane).map(|(score, x, y)| {
                    (score, Some(self.region_at(area, x, y)))
                })
            }
            TemplateModel::Feature(model) => {
                let plane = LumaPlane::from_frame_region(frame, area);
                let (score, origin) = match_features(model, &plane);
                Some((score, origin.map(|(x, y)| self.region_at(area, x, y))))
            }
            TemplateModel::Color(model) => {
                match_color(model, frame, area).map(|(score, region)| (score, Some(region)))
            }
        };

        match located {
            Some((confidence, region)) => {
                MatchResult::new(self.key.clone(), confidence, self.threshold, region)
            }
            None => MatchResult::miss(self.key.clone(), self.threshold),
        }
    }

    fn region_at(&self, area: Region, x: usize, y: usize) -> Region {
        Region::new(area.x + x as u32, area.y + y as u32, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TemplateKey {
        TemplateKey::new("home", "badge")
    }

    /// Dark screen with a bright checkered badge at (30, 20).
    fn screen() -> Frame {
        Frame::from_fn(80, 60, |x, y| {
            if (30..42).contains(&x) && (20..32).contains(&y) {
                if (x / 3 + y / 3) % 2 == 0 { [250, 250, 250] } else { [200, 40, 40] }
            } else {
                [20, 20, 30]
            }
        })
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = Template::from_rgb(key(), 1, 1, &[0, 0, 0], MatchMethod::Exact, 1.5).unwrap_err();
        assert!(matches!(err, PilotError::Template { .. }));
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        assert!(Template::from_rgb(key(), 2, 2, &[0; 5], MatchMethod::Exact, 0.5).is_err());
    }

    #[test]
    fn exact_template_locates_itself() {
        let frame = screen();
        let tpl = Template::from_frame_region(
            key(),
            &frame,
            Region::new(28, 18, 16, 16),
            MatchMethod::Exact,
            0.9,
        )
        .unwrap();
        let result = tpl.evaluate(&frame);
        assert!(result.is_accepted());
        assert!(result.confidence() > 0.99);
        assert_eq!(result.region(), Some(Region::new(28, 18, 16, 16)));
    }

    #[test]
    fn search_region_excluding_element_rejects() {
        let frame = screen();
        let tpl = Template::from_frame_region(
            key(),
            &frame,
            Region::new(28, 18, 16, 16),
            MatchMethod::Exact,
            0.9,
        )
        .unwrap()
        .with_search_region(Region::new(0, 40, 80, 20));
        assert!(!tpl.evaluate(&frame).is_accepted());
    }

    #[test]
    fn template_larger_than_frame_is_a_miss() {
        let frame = Frame::from_fn(8, 8, |_, _| [0, 0, 0]);
        let tpl = Template::from_rgb(key(), 10, 10, &[0; 300], MatchMethod::Exact, 0.1).unwrap();
        let result = tpl.evaluate(&frame);
        assert_eq!(result.confidence(), 0.0);
        assert!(!result.is_accepted());
        assert!(result.region().is_none());
    }

    #[test]
    fn search_region_outside_frame_is_a_miss() {
        let tpl = Template::from_rgb(key(), 2, 2, &[9; 12], MatchMethod::Exact, 0.0)
            .unwrap()
            .with_search_region(Region::new(500, 500, 10, 10));
        let result = tpl.evaluate(&screen());
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn colour_template_finds_tinted_area() {
        let frame = screen();
        let tpl = Template::from_rgb(
            key(),
            4,
            4,
            &[20, 20, 30].repeat(16),
            MatchMethod::color(),
            0.9,
        )
        .unwrap();
        assert!(tpl.evaluate(&frame).is_accepted());
    }

    #[test]
    fn loads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("badge.png");
        let img = RgbImage::from_fn(6, 4, |x, _| image::Rgb([x as u8 * 40, 0, 0]));
        img.save(&path).unwrap();

        let tpl = Template::load(key(), &path, MatchMethod::Exact, 0.8).unwrap();
        assert_eq!(tpl.size(), (6, 4));
        assert_eq!(tpl.method().label(), "exact");
    }

    #[test]
    fn missing_file_is_a_template_error() {
        let err = Template::load(key(), "/nonexistent/badge.png", MatchMethod::Exact, 0.8)
            .unwrap_err();
        assert!(err.to_string().contains("home/badge"));
    }
}
