//! Feature matcher: FAST corners, binary BRIEF descriptors, translation
//! voting.
//!
//! Tolerates small scale or rotation drift of a UI element that exact
//! correlation would reject.  Confidence is the fraction of template
//! keypoints that found a geometrically consistent partner in the frame.

use std::sync::OnceLock;

use crate::luma::LumaPlane;

/// FAST intensity threshold.
const FAST_THRESHOLD: i32 = 20;
/// Contiguous circle pixels required for a corner.
const FAST_ARC: usize = 9;
const PATCH_RADIUS: i32 = 7;
/// Keypoints closer than this to the border get no descriptor.
const BORDER: usize = PATCH_RADIUS as usize + 1;
const MAX_FRAME_KEYPOINTS: usize = 2000;
/// Descriptor distance above which no match is considered.
const MAX_HAMMING: u32 = 40;
const MIN_INLIERS: usize = 3;

const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keypoint {
    pub x: usize,
    pub y: usize,
    pub score: u32,
}

type Descriptor = [u64; 2];

/// Keypoints and descriptors of a template, extracted once at load.
#[derive(Debug, Clone)]
pub struct FeatureModel {
    width: usize,
    height: usize,
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
    ratio: f32,
    inlier_tolerance: f32,
}

impl FeatureModel {
    pub fn new(plane: &LumaPlane, max_keypoints: usize, ratio: f32, inlier_tolerance: f32) -> Self {
        let keypoints = detect(plane, max_keypoints);
        let blurred = plane.box_blur();
        let descriptors = keypoints.iter().map(|k| describe(&blurred, k)).collect();
        Self {
            width: plane.width,
            height: plane.height,
            keypoints,
            descriptors,
            ratio,
            inlier_tolerance,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn keypoint_count(&self) -> usize {
        self.keypoints.len()
    }
}

/// Locate `model` inside `search`.  Returns the confidence and, when enough
/// inliers agree, the top-left corner of the located template.
pub fn match_features(model: &FeatureModel, search: &LumaPlane) -> (f32, Option<(usize, usize)>) {
    if model.keypoints.is_empty()
        || model.width > search.width
        || model.height > search.height
    {
        return (0.0, None);
    }

    let frame_keypoints = detect(search, MAX_FRAME_KEYPOINTS);
    if frame_keypoints.is_empty() {
        return (0.0, None);
    }
    let blurred = search.box_blur();
    let frame_descriptors: Vec<Descriptor> =
        frame_keypoints.iter().map(|k| describe(&blurred, k)).collect();

    // Offsets (frame - template) proposed by each surviving correspondence.
    let mut offsets: Vec<(i64, i64)> = Vec::new();
    for (tk, td) in model.keypoints.iter().zip(&model.descriptors) {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (i, fd) in frame_descriptors.iter().enumerate() {
            let d = hamming(td, fd);
            if d < best.0 {
                second = best.0;
                best = (d, i);
            } else if d < second {
                second = d;
            }
        }
        if best.0 > MAX_HAMMING {
            continue;
        }
        if second != u32::MAX && best.0 as f32 >= model.ratio * second as f32 {
            continue;
        }
        let fk = frame_keypoints[best.1];
        offsets.push((fk.x as i64 - tk.x as i64, fk.y as i64 - tk.y as i64));
    }

    let diagonal = ((model.width * model.width + model.height * model.height) as f32).sqrt();
    let tolerance = (model.inlier_tolerance * diagonal).max(2.0) as i64;

    let mut winner: Option<(usize, (i64, i64))> = None;
    for &candidate in &offsets {
        let votes = offsets
            .iter()
            .filter(|o| (o.0 - candidate.0).abs() <= tolerance && (o.1 - candidate.1).abs() <= tolerance)
            .count();
        if winner.is_none_or(|(best, _)| votes > best) {
            winner = Some((votes, candidate));
        }
    }

    let Some((inliers, anchor)) = winner else {
        return (0.0, None);
    };
    let required = MIN_INLIERS.min(model.keypoints.len());
    if inliers < required {
        return (0.0, None);
    }

    // Most common exact offset among the inliers.
    let inlier_offsets: Vec<(i64, i64)> = offsets
        .iter()
        .copied()
        .filter(|o| (o.0 - anchor.0).abs() <= tolerance && (o.1 - anchor.1).abs() <= tolerance)
        .collect();
    let mut anchor = anchor;
    let mut anchor_count = 0;
    for o in &inlier_offsets {
        let count = inlier_offsets.iter().filter(|p| *p == o).count();
        if count > anchor_count {
            anchor = *o;
            anchor_count = count;
        }
    }

    let confidence = inliers as f32 / model.keypoints.len() as f32;
    let max_x = (search.width - model.width) as i64;
    let max_y = (search.height - model.height) as i64;
    let origin = (
        anchor.0.clamp(0, max_x) as usize,
        anchor.1.clamp(0, max_y) as usize,
    );
    (confidence, Some(origin))
}

/// FAST-9 corners with 3×3 non-maximum suppression, strongest first.
/// Ties are broken by position (row-major) so detection is deterministic.
pub fn detect(plane: &LumaPlane, limit: usize) -> Vec<Keypoint> {
    if plane.width <= 2 * BORDER || plane.height <= 2 * BORDER {
        return Vec::new();
    }
    let mut scores = vec![0u32; plane.width * plane.height];
    for y in BORDER..plane.height - BORDER {
        for x in BORDER..plane.width - BORDER {
            scores[y * plane.width + x] = corner_score(plane, x, y);
        }
    }

    let mut keypoints = Vec::new();
    for y in BORDER..plane.height - BORDER {
        for x in BORDER..plane.width - BORDER {
            let score = scores[y * plane.width + x];
            if score == 0 {
                continue;
            }
            let mut dominated = false;
            'nms: for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if (nx, ny) == (x, y) {
                        continue;
                    }
                    let other = scores[ny * plane.width + nx];
                    if other > score || (other == score && (ny, nx) < (y, x)) {
                        dominated = true;
                        break 'nms;
                    }
                }
            }
            if !dominated {
                keypoints.push(Keypoint { x, y, score });
            }
        }
    }

    keypoints.sort_by(|a, b| b.score.cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));
    keypoints.truncate(limit);
    keypoints
}

/// Zero when `(x, y)` is not a corner, otherwise the summed contrast of the
/// winning arc.
fn corner_score(plane: &LumaPlane, x: usize, y: usize) -> u32 {
    let center = plane.get(x, y) as i32;
    let mut diffs = [0i32; 16];
    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let px = (x as i32 + dx) as usize;
        let py = (y as i32 + dy) as usize;
        diffs[i] = plane.get(px, py) as i32 - center;
    }

    let mut best = 0u32;
    for sign in [1i32, -1] {
        let mut run = 0usize;
        let mut longest = 0usize;
        for i in 0..32 {
            if diffs[i % 16] * sign > FAST_THRESHOLD {
                run += 1;
                longest = longest.max(run.min(16));
            } else {
                run = 0;
            }
        }
        if longest >= FAST_ARC {
            let contrast: i32 = diffs
                .iter()
                .map(|d| d * sign - FAST_THRESHOLD)
                .filter(|v| *v > 0)
                .sum();
            best = best.max(contrast as u32);
        }
    }
    best
}

/// Fixed sampling pattern: 128 point pairs inside the descriptor patch,
/// drawn from a seeded LCG so descriptors are stable across runs.
fn brief_pairs() -> &'static [(i32, i32, i32, i32); 128] {
    static PAIRS: OnceLock<[(i32, i32, i32, i32); 128]> = OnceLock::new();
    PAIRS.get_or_init(|| {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let span = (2 * PATCH_RADIUS + 1) as u64;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % span) as i32 - PATCH_RADIUS
        };
        let mut pairs = [(0, 0, 0, 0); 128];
        for pair in pairs.iter_mut() {
            *pair = (next(), next(), next(), next());
        }
        pairs
    })
}

fn describe(blurred: &LumaPlane, k: &Keypoint) -> Descriptor {
    let mut bits = [0u64; 2];
    for (i, (ax, ay, bx, by)) in brief_pairs().iter().enumerate() {
        let a = blurred.get((k.x as i32 + ax) as usize, (k.y as i32 + ay) as usize);
        let b = blurred.get((k.x as i32 + bx) as usize, (k.y as i32 + by) as usize);
        if a < b {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    bits
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    (a[0] ^ b[0]).count_ones() + (a[1] ^ b[1]).count_ones()
}
