//! Colour matcher: quantized RGB histogram intersection.
//!
//! Meant for low-texture elements (solid banners, tinted overlays) where
//! correlation is unstable.  The template histogram is compared against
//! windows of the template's size slid over the search area.

use gamepilot_types::{Frame, Region};

/// Normalized `bins³` histogram of a template.
#[derive(Debug, Clone)]
pub struct ColorModel {
    width: u32,
    height: u32,
    bins: u8,
    stride: u32,
    histogram: Vec<f32>,
}

impl ColorModel {
    /// Build from a packed RGB24 buffer.  `bins` is clamped to `1..=16`;
    /// `stride == 0` selects a quarter of the smaller template side.
    pub fn new(width: u32, height: u32, rgb: &[u8], bins: u8, stride: u32) -> Self {
        let bins = bins.clamp(1, 16);
        let stride = if stride == 0 {
            (width.min(height) / 4).max(1)
        } else {
            stride
        };
        let mut histogram = vec![0.0; (bins as usize).pow(3)];
        for px in rgb.chunks_exact(3) {
            histogram[bin_of([px[0], px[1], px[2]], bins)] += 1.0;
        }
        normalize(&mut histogram);
        Self {
            width,
            height,
            bins,
            stride,
            histogram,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Best histogram intersection of `model` over windows inside `area` of
/// `frame`, with the winning window.  `None` if the template does not fit.
pub fn match_color(model: &ColorModel, frame: &Frame, area: Region) -> Option<(f32, Region)> {
    if model.width == 0 || model.height == 0 || model.width > area.width || model.height > area.height {
        return None;
    }

    let mut best: Option<(f32, Region)> = None;
    let mut window = vec![0.0f32; model.histogram.len()];
    let mut y = area.y;
    while y + model.height <= area.y + area.height {
        let mut x = area.x;
        while x + model.width <= area.x + area.width {
            window.iter_mut().for_each(|v| *v = 0.0);
            for py in y..y + model.height {
                for px in x..x + model.width {
                    window[bin_of(frame.rgb(px, py), model.bins)] += 1.0;
                }
            }
            normalize(&mut window);
            let score: f32 = window
                .iter()
                .zip(&model.histogram)
                .map(|(a, b)| a.min(*b))
                .sum();
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, Region::new(x, y, model.width, model.height)));
            }
            x += model.stride;
        }
        y += model.stride;
    }
    best
}

fn bin_of(rgb: [u8; 3], bins: u8) -> usize {
    let b = bins as usize;
    let q = |v: u8| v as usize * b / 256;
    (q(rgb[0]) * b + q(rgb[1])) * b + q(rgb[2])
}

fn normalize(hist: &mut [f32]) {
    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        hist.iter_mut().for_each(|v| *v /= total);
    }
}
