//! Grayscale planes and summed-area tables.
//!
//! Every matcher except the colour one works on luminance.  [`LumaPlane`] is
//! a packed 8-bit plane; [`Integral`] gives O(1) window sums and sums of
//! squares, which the correlation matcher uses for window means and
//! variances.

use gamepilot_types::{Frame, Region};

/// ITU-R BT.601 luma of an RGB triple.
pub fn luma(rgb: [u8; 3]) -> u8 {
    ((299 * rgb[0] as u32 + 587 * rgb[1] as u32 + 114 * rgb[2] as u32) / 1000) as u8
}

/// Packed 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaPlane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl LumaPlane {
    /// Convert a packed RGB24 buffer.
    pub fn from_rgb(width: usize, height: usize, rgb: &[u8]) -> Self {
        let data = rgb
            .chunks_exact(3)
            .take(width * height)
            .map(|px| luma([px[0], px[1], px[2]]))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert the part of `frame` covered by `region`.  The region must lie
    /// inside the frame.
    pub fn from_frame_region(frame: &Frame, region: Region) -> Self {
        let mut data = Vec::with_capacity(region.width as usize * region.height as usize);
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                data.push(luma(frame.rgb(x, y)));
            }
        }
        Self {
            width: region.width as usize,
            height: region.height as usize,
            data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Block-average downsample by `factor`.  Trailing rows and columns that
    /// do not fill a whole block are dropped.
    pub fn downsample(&self, factor: usize) -> Self {
        if factor <= 1 {
            return self.clone();
        }
        let width = self.width / factor;
        let height = self.height / factor;
        let area = (factor * factor) as u32;
        let mut data = Vec::with_capacity(width * height);
        for by in 0..height {
            for bx in 0..width {
                let mut acc = 0u32;
                for y in by * factor..(by + 1) * factor {
                    let row = y * self.width;
                    for x in bx * factor..(bx + 1) * factor {
                        acc += self.data[row + x] as u32;
                    }
                }
                data.push((acc / area) as u8);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// 3×3 box blur with clamped borders.  Used to stabilise descriptor
    /// intensity comparisons against pixel noise.
    pub fn box_blur(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0u32;
                for dy in [-1i64, 0, 1] {
                    for dx in [-1i64, 0, 1] {
                        let sx = (x as i64 + dx).clamp(0, self.width as i64 - 1) as usize;
                        let sy = (y as i64 + dy).clamp(0, self.height as i64 - 1) as usize;
                        acc += self.get(sx, sy) as u32;
                    }
                }
                data.push((acc / 9) as u8);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Mean and (population) standard deviation of the whole plane.
    pub fn mean_std(&self) -> (f64, f64) {
        let n = self.data.len().max(1) as f64;
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        let sq: f64 = self.data.iter().map(|&v| (v as f64) * (v as f64)).sum();
        let mean = sum / n;
        let var = (sq / n - mean * mean).max(0.0);
        (mean, var.sqrt())
    }
}

/// Summed-area tables of values and squared values.
pub struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    pub fn new(plane: &LumaPlane) -> Self {
        let stride = plane.width + 1;
        let mut sum = vec![0.0; stride * (plane.height + 1)];
        let mut sq = vec![0.0; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..plane.width {
                let v = plane.get(x, y) as f64;
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    /// `(Σv, Σv²)` over the `w`×`h` window whose top-left corner is `(x, y)`.
    #[inline]
    pub fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let a = y * s + x;
        let b = y * s + x + w;
        let c = (y + h) * s + x;
        let d = (y + h) * s + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq[d] - self.sq[b] - self.sq[c] + self.sq[a],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: usize, h: usize) -> LumaPlane {
        LumaPlane {
            width: w,
            height: h,
            data: (0..w * h).map(|i| (i % 251) as u8).collect(),
        }
    }

    #[test]
    fn luma_weights() {
        assert_eq!(luma([255, 255, 255]), 255);
        assert_eq!(luma([0, 0, 0]), 0);
        assert!(luma([0, 255, 0]) > luma([255, 0, 0]));
        assert!(luma([255, 0, 0]) > luma([0, 0, 255]));
    }

    #[test]
    fn integral_window_matches_direct_sum() {
        let plane = ramp(9, 7);
        let integral = Integral::new(&plane);
        let (sum, sq) = integral.window(2, 3, 4, 3);
        let mut expect_sum = 0.0;
        let mut expect_sq = 0.0;
        for y in 3..6 {
            for x in 2..6 {
                let v = plane.get(x, y) as f64;
                expect_sum += v;
                expect_sq += v * v;
            }
        }
        assert!((sum - expect_sum).abs() < 1e-6);
        assert!((sq - expect_sq).abs() < 1e-6);
    }

    #[test]
    fn downsample_averages_blocks() {
        let plane = LumaPlane {
            width: 4,
            height: 2,
            data: vec![0, 2, 10, 10, 4, 6, 10, 10],
        };
        let small = plane.downsample(2);
        assert_eq!((small.width, small.height), (2, 1));
        assert_eq!(small.data, vec![3, 10]);
    }

    #[test]
    fn frame_region_conversion() {
        let frame = Frame::from_fn(4, 4, |x, y| if x >= 2 && y >= 2 { [255; 3] } else { [0; 3] });
        let plane = LumaPlane::from_frame_region(&frame, Region::new(1, 1, 2, 2));
        assert_eq!(plane.data, vec![0, 0, 0, 255]);
    }

    #[test]
    fn flat_plane_has_zero_std() {
        let plane = LumaPlane {
            width: 3,
            height: 3,
            data: vec![42; 9],
        };
        let (mean, std) = plane.mean_std();
        assert!((mean - 42.0).abs() < 1e-9);
        assert!(std.abs() < 1e-9);
    }
}
