//! Exact matcher: zero-mean normalized cross-correlation.
//!
//! Equivalent to OpenCV's `TM_CCOEFF_NORMED`, with negative correlation
//! clamped to zero.  Large templates are first located on a block-averaged
//! pyramid level and then refined at full resolution around the best coarse
//! candidates, which keeps a full-screen search inside the frame budget.

use crate::luma::{Integral, LumaPlane};

/// Coarse candidates refined at full resolution.
const COARSE_CANDIDATES: usize = 4;
/// Smallest template side kept at the coarse level.
const MIN_COARSE_SIDE: usize = 12;
const MAX_PYRAMID_FACTOR: usize = 4;
/// Per-pixel standard deviation below which a patch counts as flat.
const FLAT_STD: f64 = 1.0;

/// Precomputed template statistics.
#[derive(Debug, Clone)]
pub struct ExactModel {
    plane: LumaPlane,
    mean: f64,
    centered: Vec<f64>,
    norm: f64,
}

impl ExactModel {
    pub fn new(plane: LumaPlane) -> Self {
        let (mean, _) = plane.mean_std();
        let centered: Vec<f64> = plane.data.iter().map(|&v| v as f64 - mean).collect();
        let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            plane,
            mean,
            centered,
            norm,
        }
    }

    pub fn width(&self) -> usize {
        self.plane.width
    }

    pub fn height(&self) -> usize {
        self.plane.height
    }

    fn is_flat(&self) -> bool {
        self.norm < FLAT_STD * (self.centered.len() as f64).sqrt()
    }
}

/// Best match of `model` inside `search` as `(confidence, x, y)`.
///
/// Returns `None` when the template does not fit inside the search plane.
pub fn match_exact(model: &ExactModel, search: &LumaPlane) -> Option<(f32, usize, usize)> {
    let (tw, th) = (model.width(), model.height());
    if tw == 0 || th == 0 || tw > search.width || th > search.height {
        return None;
    }

    let factor = (tw.min(th) / MIN_COARSE_SIDE).clamp(1, MAX_PYRAMID_FACTOR);
    let integral = Integral::new(search);

    let (score, x, y) = if factor == 1 {
        scan(model, search, &integral, 1)
            .into_iter()
            .next()
            .unwrap_or((0.0, 0, 0))
    } else {
        let coarse_model = ExactModel::new(model.plane.downsample(factor));
        let coarse_search = search.downsample(factor);
        let coarse_integral = Integral::new(&coarse_search);
        let candidates = scan(&coarse_model, &coarse_search, &coarse_integral, COARSE_CANDIDATES);

        let max_x = search.width - tw;
        let max_y = search.height - th;
        let mut best = (f64::NEG_INFINITY, 0, 0);
        for (_, cx, cy) in candidates {
            let x0 = (cx * factor).saturating_sub(factor);
            let y0 = (cy * factor).saturating_sub(factor);
            let x1 = (cx * factor + factor).min(max_x);
            let y1 = (cy * factor + factor).min(max_y);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let s = score_at(model, search, &integral, x, y);
                    if s > best.0 {
                        best = (s, x, y);
                    }
                }
            }
        }
        best
    };

    Some((score.max(0.0) as f32, x, y))
}

/// Exhaustive scan keeping the `keep` best positions, best first.  Earlier
/// positions (row-major) win ties.
fn scan(
    model: &ExactModel,
    search: &LumaPlane,
    integral: &Integral,
    keep: usize,
) -> Vec<(f64, usize, usize)> {
    let mut best: Vec<(f64, usize, usize)> = Vec::with_capacity(keep + 1);
    if model.width() > search.width || model.height() > search.height {
        return best;
    }
    for y in 0..=search.height - model.height() {
        for x in 0..=search.width - model.width() {
            let s = score_at(model, search, integral, x, y);
            if best.len() < keep || s > best[best.len() - 1].0 {
                let pos = best.iter().position(|b| s > b.0).unwrap_or(best.len());
                best.insert(pos, (s, x, y));
                best.truncate(keep);
            }
        }
    }
    best
}

fn score_at(model: &ExactModel, search: &LumaPlane, integral: &Integral, x: usize, y: usize) -> f64 {
    let (tw, th) = (model.width(), model.height());
    let n = (tw * th) as f64;
    let (sum, sq) = integral.window(x, y, tw, th);
    let mean_s = sum / n;
    let dev_s = (sq - sum * sum / n).max(0.0).sqrt();
    let window_flat = dev_s < FLAT_STD * n.sqrt();

    if model.is_flat() {
        if window_flat {
            return 1.0 - (mean_s - model.mean).abs() / 255.0;
        }
        // Flat template over a textured window: mean absolute difference.
        let mut mad = 0.0;
        for j in 0..th {
            let row = (y + j) * search.width + x;
            for i in 0..tw {
                mad += (search.data[row + i] as f64 - model.mean).abs();
            }
        }
        return 1.0 - mad / n / 255.0;
    }
    if window_flat {
        return 0.0;
    }

    let mut cross = 0.0;
    for j in 0..th {
        let row = (y + j) * search.width + x;
        let trow = j * tw;
        for i in 0..tw {
            cross += model.centered[trow + i] * search.data[row + i] as f64;
        }
    }
    cross / (model.norm * dev_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic textured plane.
    fn texture(w: usize, h: usize, seed: u32) -> LumaPlane {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        let data = (0..w * h)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 256) as u8
            })
            .collect();
        LumaPlane {
            width: w,
            height: h,
            data,
        }
    }

    fn crop(plane: &LumaPlane, x: usize, y: usize, w: usize, h: usize) -> LumaPlane {
        let mut data = Vec::with_capacity(w * h);
        for j in y..y + h {
            data.extend_from_slice(&plane.data[j * plane.width + x..j * plane.width + x + w]);
        }
        LumaPlane {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn finds_exact_crop_location() {
        let scene = texture(40, 30, 7);
        let model = ExactModel::new(crop(&scene, 13, 9, 8, 6));
        let (score, x, y) = match_exact(&model, &scene).unwrap();
        assert!(score > 0.999, "score {score}");
        assert_eq!((x, y), (13, 9));
    }

    #[test]
    fn pyramid_search_finds_large_template() {
        let scene = texture(160, 120, 3);
        let model = ExactModel::new(crop(&scene, 61, 37, 40, 32));
        let (score, x, y) = match_exact(&model, &scene).unwrap();
        assert!(score > 0.999, "score {score}");
        assert_eq!((x, y), (61, 37));
    }

    #[test]
    fn template_larger_than_search_fails_closed() {
        let scene = texture(10, 10, 1);
        let model = ExactModel::new(texture(11, 4, 2));
        assert!(match_exact(&model, &scene).is_none());
    }

    #[test]
    fn unrelated_texture_scores_low() {
        let scene = texture(30, 30, 11);
        let model = ExactModel::new(texture(8, 8, 99));
        let (score, _, _) = match_exact(&model, &scene).unwrap();
        assert!(score < 0.7, "score {score}");
    }

    #[test]
    fn flat_template_matches_flat_area_of_same_brightness() {
        let mut scene = texture(20, 20, 5);
        for y in 4..10 {
            for x in 4..10 {
                scene.data[y * 20 + x] = 120;
            }
        }
        let model = ExactModel::new(LumaPlane {
            width: 4,
            height: 4,
            data: vec![120; 16],
        });
        let (score, x, y) = match_exact(&model, &scene).unwrap();
        assert!(score > 0.99);
        assert!((4..=6).contains(&x) && (4..=6).contains(&y));
    }

    #[test]
    fn repeated_matching_is_deterministic() {
        let scene = texture(50, 40, 21);
        let model = ExactModel::new(crop(&scene, 5, 5, 16, 16));
        let a = match_exact(&model, &scene);
        let b = match_exact(&model, &scene);
        assert_eq!(a, b);
    }
}
