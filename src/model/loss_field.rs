//! Per-pixel cost image built around an edge profile.
//!
//! Every pixel starts at `548²`. Each profile point (shifted right by the
//! margin) opens a quadratic ramp `(k·10/range)²` towards the right limit
//! `maxX + rightOffset` and a steeper one over `leftGradientWidth` pixels to
//! its left. Rows without a profile point are cleared to zero between
//! `minX - leftOffset` and the right limit, so a model crossing a gap in the
//! profile is not penalized there.
//!
//! Complexity: O(W·H + N·W) for N profile points.
use crate::image::{ImageF32, ImageView};
use crate::profile::{PixelPoint, Profile};
use nalgebra::Vector2;

/// Loss of pixels the model must not visit.
pub const HIGH_LOSS: f32 = 548.0;
/// Loss at the far end of a ramp.
pub const LOW_LOSS: f32 = 10.0;
/// Saturation used when rendering the field for inspection.
const DEBUG_SATURATION: f32 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LossFieldParams {
    /// Shift applied to every profile x before the ramps are laid out
    pub margin: i32,
    pub right_offset: i32,
    pub left_offset: i32,
    pub left_gradient_width: i32,
}

#[derive(Clone, Debug)]
pub struct LossField {
    field: ImageF32,
}

impl LossField {
    pub fn build(profile: &Profile, width: usize, height: usize, params: &LossFieldParams) -> Self {
        let hi = HIGH_LOSS * HIGH_LOSS;
        let mut field = ImageF32::from_fn(width, height, |_, _| hi);
        let (w, h) = (width as i32, height as i32);

        let (min_x, max_x) = profile.x_range().unwrap_or((0, 0));
        let right_x = (max_x + params.right_offset).min(w - 1);
        let left_x = (min_x - params.left_offset).max(0);

        let mut covered = vec![false; height];
        for p in profile.points.iter().rev() {
            if p.y < 0 || p.y >= h {
                continue;
            }
            covered[p.y as usize] = true;
            let x = p.x + params.margin;
            let row = p.y as usize;

            let range = right_x - x;
            if range > 0 {
                let step = LOW_LOSS / range as f32;
                for j in 0..range {
                    let xx = x + j;
                    if (0..w).contains(&xx) {
                        let v = step * (j + 1) as f32;
                        field.set(xx as usize, row, v * v);
                    }
                }
            }

            let range = params.left_gradient_width;
            if range > 0 {
                let step = LOW_LOSS / range as f32;
                for k in 0..range {
                    let xx = x - k;
                    if (0..w).contains(&xx) {
                        let v = step * (k + 1) as f32;
                        field.set(xx as usize, row, v * v);
                    }
                }
            }
        }

        for (y, &is_covered) in covered.iter().enumerate() {
            if !is_covered {
                for x in left_x.max(0)..right_x.max(0) {
                    field.set(x as usize, y, 0.0);
                }
            }
        }
        Self { field }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.field.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.field.height()
    }

    /// Cost at `(x, y)`, `None` outside the image.
    #[inline]
    pub fn value(&self, x: i32, y: i32) -> Option<f32> {
        self.field.try_get(x as i64, y as i64)
    }

    pub fn image(&self) -> &ImageF32 {
        &self.field
    }

    /// Field clamped at 120 and scaled to [0, 1].
    pub fn debug_image(&self) -> ImageF32 {
        self.field.map(|v| v.min(DEBUG_SATURATION) / DEBUG_SATURATION)
    }
}

/// Result of rasterizing a model polyline over a loss field.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Trace {
    /// Weighted cost summed over all segments
    pub weighted_loss: f64,
    /// Pixels inside the image
    pub covered: usize,
    /// Pixels at or left of the profile on their row
    pub intersections: usize,
}

/// Walk every segment of `points` (pixel coordinates) with a DDA that steps
/// one pixel along the major axis, from each vertex towards the next one.
///
/// Segment `skip` still counts its pixels as covered but contributes neither
/// cost nor intersections. `left_boundary[y]` is the profile x on row `y`.
pub fn rasterize(
    field: &LossField,
    left_boundary: &[i32],
    points: &[Vector2<f64>],
    weight: impl Fn(usize) -> f64,
    skip: Option<usize>,
    mut visit: impl FnMut(PixelPoint),
) -> Trace {
    let mut trace = Trace::default();
    for (n, seg) in points.windows(2).enumerate() {
        let (a, b) = (seg[0], seg[1]);
        let d = b - a;
        let steps = d.x.abs().max(d.y.abs()) as i64;
        if steps <= 0 || !d.x.is_finite() || !d.y.is_finite() {
            continue;
        }
        let inc = d / steps as f64;
        let scored = skip != Some(n);
        let mut segment_loss = 0.0f64;
        for k in 0..steps {
            let p = a + inc * k as f64;
            let (x, y) = (p.x.floor() as i32, p.y.floor() as i32);
            let Some(cost) = field.value(x, y) else {
                continue;
            };
            trace.covered += 1;
            visit(PixelPoint::new(x, y));
            if scored {
                segment_loss += cost as f64;
                if left_boundary.get(y as usize).is_some_and(|&lb| lb >= x) {
                    trace.intersections += 1;
                }
            }
        }
        trace.weighted_loss += segment_loss * weight(n);
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LossFieldParams {
        LossFieldParams {
            margin: 0,
            right_offset: 10,
            left_offset: 5,
            left_gradient_width: 4,
        }
    }

    fn vertical_profile(x: i32, rows: std::ops::Range<i32>) -> Profile {
        let mut profile = Profile::new();
        for y in rows {
            profile.push(x, y);
        }
        profile
    }

    #[test]
    fn ramps_follow_the_profile() {
        let profile = vertical_profile(20, 0..10);
        let field = LossField::build(&profile, 50, 12, &params());
        // left ramp overrides the first right-ramp pixel
        assert!((field.value(20, 3).unwrap() - 6.25).abs() < 1e-4);
        assert!((field.value(17, 3).unwrap() - 100.0).abs() < 1e-3);
        assert!((field.value(21, 3).unwrap() - 4.0).abs() < 1e-4);
        assert!((field.value(29, 3).unwrap() - 100.0).abs() < 1e-3);
        assert_eq!(field.value(30, 3).unwrap(), HIGH_LOSS * HIGH_LOSS);
        assert_eq!(field.value(10, 3).unwrap(), HIGH_LOSS * HIGH_LOSS);
    }

    #[test]
    fn rows_without_profile_are_cleared_between_limits() {
        let profile = vertical_profile(20, 0..10);
        let field = LossField::build(&profile, 50, 12, &params());
        assert_eq!(field.value(15, 11).unwrap(), 0.0);
        assert_eq!(field.value(29, 11).unwrap(), 0.0);
        assert_eq!(field.value(14, 11).unwrap(), HIGH_LOSS * HIGH_LOSS);
        assert_eq!(field.value(30, 11).unwrap(), HIGH_LOSS * HIGH_LOSS);
        assert!(field.value(50, 0).is_none());
        let dbg = field.debug_image();
        assert_eq!(dbg.get(0, 0), 1.0);
    }

    #[test]
    fn rasterize_walks_towards_the_next_vertex() {
        let profile = vertical_profile(20, 0..12);
        let field = LossField::build(&profile, 50, 12, &params());
        let boundary = vec![20; 12];
        let mut seen = Vec::new();
        let left = [Vector2::new(25.0, 5.0), Vector2::new(21.0, 5.0)];
        let trace = rasterize(&field, &boundary, &left, |_| 1.0, None, |p| seen.push(p));
        assert_eq!(trace.covered, 4);
        assert_eq!(seen.first(), Some(&PixelPoint::new(25, 5)));
        assert_eq!(seen.last(), Some(&PixelPoint::new(22, 5)));
        assert_eq!(trace.intersections, 0);

        let crossing = [Vector2::new(22.0, 2.0), Vector2::new(18.0, 2.0)];
        let trace = rasterize(&field, &boundary, &crossing, |_| 2.0, None, |_| {});
        assert_eq!(trace.covered, 4);
        assert_eq!(trace.intersections, 2);
    }

    #[test]
    fn skipped_segment_counts_pixels_only() {
        let profile = vertical_profile(20, 0..12);
        let field = LossField::build(&profile, 50, 12, &params());
        let boundary = vec![20; 12];
        let pts = [Vector2::new(25.0, 1.0), Vector2::new(25.0, 6.0), Vector2::new(10.0, 6.0)];
        let all = rasterize(&field, &boundary, &pts, |_| 1.0, None, |_| {});
        let skipped = rasterize(&field, &boundary, &pts, |_| 1.0, Some(1), |_| {});
        assert_eq!(all.covered, skipped.covered);
        assert_eq!(all.covered, 20);
        assert!(skipped.weighted_loss < all.weighted_loss);
        assert_eq!(skipped.intersections, 0);
        assert!(all.intersections > 0);
    }
}
