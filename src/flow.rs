//! Sparse optical flow: Shi-Tomasi corner selection and pyramidal
//! Lucas-Kanade point tracking.

use nalgebra as na;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

use crate::frame::Frame;

pub trait OpticalFlow {
    /// Picks up to `max_corners` trackable points whose column lies inside
    /// one of the `[start, end)` strips.
    fn good_features(&self, frame: &Frame, strips: &[(usize, usize)]) -> Vec<na::Point2<f32>>;

    /// Follows `points` from `prev` into `curr`; `None` marks a point that
    /// could not be tracked.
    fn track(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[na::Point2<f32>],
    ) -> Vec<Option<na::Point2<f32>>>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FlowParams {
    pub max_corners: usize,
    /// Corners weaker than `quality_level * strongest` are dropped.
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: usize,
    pub win_size: usize,
    pub max_level: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    /// Per-pixel minimal eigenvalue of the window's gradient matrix below
    /// which a point counts as lost.
    pub min_eig_threshold: f32,
    /// Largest mean squared intensity difference between the source window
    /// and its tracked position accepted as a match.
    pub max_residual: f32,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 3.0,
            block_size: 7,
            win_size: 15,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            min_eig_threshold: 1e-4,
            max_residual: 400.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LucasKanade {
    pub params: FlowParams,
}

#[inline]
fn min_eigenvalue(gxx: f32, gxy: f32, gyy: f32) -> f32 {
    let half_trace = (gxx + gyy) * 0.5;
    let diff = (gxx - gyy) * 0.5;

    half_trace - (diff * diff + gxy * gxy).sqrt()
}

impl LucasKanade {
    pub fn new(params: FlowParams) -> Self {
        Self { params }
    }

    fn pyramid(&self, frame: &Frame) -> Vec<Frame> {
        let mut levels = vec![frame.clone()];

        for _ in 0..self.params.max_level {
            let next = match levels.last() {
                Some(last) if last.width() >= 8 && last.height() >= 8 => last.downsample(),
                _ => break,
            };
            levels.push(next);
        }

        levels
    }

    fn track_point(
        &self,
        prev: &[Frame],
        curr: &[Frame],
        point: &na::Point2<f32>,
    ) -> Option<na::Point2<f32>> {
        let half = (self.params.win_size / 2) as i32;
        let area = ((2 * half + 1) * (2 * half + 1)) as f32;
        let levels = prev.len().min(curr.len());
        let mut guess = na::Vector2::zeros();

        // level-0 window must lie in the image, before and after
        let (w, h) = prev[0].dims();
        let margin = half as f32;
        let inside = |p: &na::Point2<f32>| {
            p.x.is_finite()
                && p.y.is_finite()
                && p.x >= margin
                && p.y >= margin
                && p.x + margin <= w as f32 - 1.0
                && p.y + margin <= h as f32 - 1.0
        };

        if !inside(point) {
            return None;
        }

        for level in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let p = point.coords * scale;
            let (prev_img, curr_img) = (&prev[level], &curr[level]);

            let mut patch = Vec::with_capacity(area as usize);
            let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);

            for wy in -half..=half {
                for wx in -half..=half {
                    let x = p.x + wx as f32;
                    let y = p.y + wy as f32;
                    let ix = (prev_img.sample(x + 1.0, y) - prev_img.sample(x - 1.0, y)) * 0.5;
                    let iy = (prev_img.sample(x, y + 1.0) - prev_img.sample(x, y - 1.0)) * 0.5;

                    gxx += ix * ix;
                    gxy += ix * iy;
                    gyy += iy * iy;
                    patch.push((x, y, ix, iy, prev_img.sample(x, y)));
                }
            }

            if min_eigenvalue(gxx, gxy, gyy) / area < self.params.min_eig_threshold {
                return None;
            }

            let det = gxx * gyy - gxy * gxy;
            let mut v = na::Vector2::<f32>::zeros();

            for _ in 0..self.params.max_iterations {
                let (mut bx, mut by) = (0.0f32, 0.0f32);

                for &(x, y, ix, iy, value) in &patch {
                    let diff = value - curr_img.sample(x + guess.x + v.x, y + guess.y + v.y);
                    bx += diff * ix;
                    by += diff * iy;
                }

                let eta = na::Vector2::new(gyy * bx - gxy * by, gxx * by - gxy * bx) / det;
                v += eta;

                if eta.norm() < self.params.epsilon {
                    break;
                }
            }

            if level == 0 {
                let residual: f32 = patch
                    .iter()
                    .map(|&(x, y, _, _, value)| {
                        let d = value - curr_img.sample(x + guess.x + v.x, y + guess.y + v.y);
                        d * d
                    })
                    .sum();

                let mse = residual / area;
                if mse.is_nan() || mse > self.params.max_residual {
                    return None;
                }
            }

            guess = if level > 0 { (guess + v) * 2.0 } else { guess + v };
        }

        let out = point + guess;

        Some(out).filter(|p| inside(p))
    }
}

impl OpticalFlow for LucasKanade {
    fn good_features(&self, frame: &Frame, strips: &[(usize, usize)]) -> Vec<na::Point2<f32>> {
        let (w, h) = frame.dims();
        let r = (self.params.block_size.max(3) / 2) as i32;
        let border = r + 1;

        if w as i32 <= 2 * border || h as i32 <= 2 * border {
            return Vec::new();
        }

        let columns: Vec<usize> = (border as usize..w - border as usize)
            .filter(|&x| strips.iter().any(|&(lo, hi)| x >= lo && x < hi))
            .collect();

        if columns.is_empty() {
            return Vec::new();
        }

        // Sobel gradients on the columns the strips need
        let lo = columns[0] as i32 - r;
        let hi = columns[columns.len() - 1] as i32 + r;
        let mut gx = Array2::<f32>::zeros((h, w));
        let mut gy = Array2::<f32>::zeros((h, w));

        for y in 1..h as i32 - 1 {
            for x in lo.max(1)..=hi.min(w as i32 - 2) {
                let p = |dx: i32, dy: i32| frame.get(x + dx, y + dy);

                gx[[y as usize, x as usize]] = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1))
                    - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
                gy[[y as usize, x as usize]] = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1))
                    - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            }
        }

        let mut response = Array2::<f32>::zeros((h, w));
        let mut strongest = 0.0f32;

        for y in border as usize..h - border as usize {
            for &x in &columns {
                let (mut sxx, mut sxy, mut syy) = (0.0f32, 0.0f32, 0.0f32);

                for yy in y as i32 - r..=y as i32 + r {
                    for xx in x as i32 - r..=x as i32 + r {
                        let dx = gx[[yy as usize, xx as usize]];
                        let dy = gy[[yy as usize, xx as usize]];
                        sxx += dx * dx;
                        sxy += dx * dy;
                        syy += dy * dy;
                    }
                }

                let lambda = min_eigenvalue(sxx, sxy, syy);
                response[[y, x]] = lambda;
                strongest = strongest.max(lambda);
            }
        }

        if strongest <= 0.0 {
            return Vec::new();
        }

        let threshold = strongest * self.params.quality_level;
        let mut candidates = Vec::new();

        for y in border as usize..h - border as usize {
            for &x in &columns {
                let v = response[[y, x]];
                if v < threshold || v <= 0.0 {
                    continue;
                }

                // 3x3 local maximum
                let is_peak = (-1i32..=1).all(|dy| {
                    (-1i32..=1).all(|dx| {
                        response[[(y as i32 + dy) as usize, (x as i32 + dx) as usize]] <= v
                    })
                });

                if is_peak {
                    candidates.push((v, x, y));
                }
            }
        }

        // strongest first, ties in raster order
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
                .then(a.1.cmp(&b.1))
        });

        let min_dist_sq = self.params.min_distance * self.params.min_distance;
        let mut corners: Vec<na::Point2<f32>> = Vec::new();

        for (_, x, y) in candidates {
            if corners.len() >= self.params.max_corners {
                break;
            }

            let p = na::Point2::new(x as f32, y as f32);
            if corners.iter().all(|c| (c - p).norm_squared() >= min_dist_sq) {
                corners.push(p);
            }
        }

        corners
    }

    fn track(
        &self,
        prev: &Frame,
        curr: &Frame,
        points: &[na::Point2<f32>],
    ) -> Vec<Option<na::Point2<f32>>> {
        if points.is_empty() {
            return Vec::new();
        }

        let prev_pyr = self.pyramid(prev);
        let curr_pyr = self.pyramid(curr);

        points
            .iter()
            .map(|p| self.track_point(&prev_pyr, &curr_pyr, p))
            .collect()
    }
}
