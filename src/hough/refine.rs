//! Pixel refinement of chart intersections on the DoG image.
//!
//! Each intersection is correlated with a 21×21 kernel holding the two lines
//! that cross there, inside a 30×30 region around it; the strongest response
//! within ±5 px becomes the new intersection. The lines are then rebuilt
//! from the refined points.
use super::Line;
use crate::error::ReturnCode;
use crate::image::{ImageF32, ImageView};
use crate::preprocess::filters::filter;
use crate::preprocess::Roi;
use crate::profile::PixelPoint;
use log::{debug, warn};

const KERNEL: usize = 21;
const ROI: usize = 30;
const SEARCH: i32 = 5;

/// Normalized cross of the line `y = m1·x` and the line `x = m2·y`.
fn cross_kernel(m1: f64, m2: f64) -> Vec<f32> {
    let c = (KERNEL / 2) as i32;
    let mut k = vec![0.0f32; KERNEL * KERNEL];
    let inside = |v: i32| (0..KERNEL as i32).contains(&v);
    for i in 0..KERNEL as i32 {
        if m1.is_finite() {
            let y = (m1 * (i - c) as f64 + 0.5).floor() as i32 + c;
            if inside(y) {
                k[i as usize + y as usize * KERNEL] = 1.0;
            }
        }
        if m2.is_finite() {
            let x = (m2 * (i - c) as f64 + 0.5).floor() as i32 + c;
            if inside(x) {
                k[x as usize + i as usize * KERNEL] = 1.0;
            }
        }
    }
    let count = k.iter().filter(|&&v| v > 0.0).count();
    if count > 0 {
        let inv = 1.0 / count as f32;
        k.iter_mut().for_each(|v| *v *= inv);
    }
    k
}

/// Indices `(first family, second family)` of the lines crossing at point
/// `p` of `n_points` (see [`super::intersection_points`]).
fn crossing_lines(p: usize, n_points: usize, n_lines: usize) -> (usize, usize) {
    let half_lines = n_lines / 2;
    let (stop_h, start_v, stop_v) = (half_lines - 1, half_lines, n_lines - 1);
    let half_points = n_points / 2;
    if p == n_points - 1 {
        let c = stop_h / 2;
        (c, start_v + c)
    } else if p < half_points {
        (if p % 2 == 1 { stop_h } else { 0 }, p / 2 + start_v)
    } else {
        let i = p - half_points;
        (i / 2, if i % 2 == 1 { stop_v } else { start_v })
    }
}

/// Move every intersection to the best cross response on `dog`.
///
/// A point off the image or too close to its top-left border fails with
/// `CalibrationFailedLineDetection`.
pub fn refine_intersections(dog: &ImageF32, lines: &[Line], points: &mut [PixelPoint]) -> Result<(), ReturnCode> {
    let (w, h) = (dog.width() as i32, dog.height() as i32);
    let n_points = points.len();
    if lines.len() < 2 || n_points == 0 {
        return Err(ReturnCode::CalibrationFailedLineDetection);
    }
    for p in 0..n_points {
        let pt = points[p];
        if pt.x < 0 || pt.x > w || pt.y < 0 || pt.y > h {
            warn!("refine: intersection {p} {pt:?} off the image");
            return Err(ReturnCode::CalibrationFailedLineDetection);
        }
        let (hi, vi) = crossing_lines(p, n_points, lines.len());
        let kernel = cross_kernel(lines[hi].slope_y(), lines[vi].slope_x());

        let half = (ROI / 2) as i32;
        let (x0, y0) = (pt.x - half, pt.y - half);
        if x0 < 0 || y0 < 0 {
            warn!("refine: region of intersection {p} {pt:?} leaves the image");
            return Err(ReturnCode::CalibrationFailedLineDetection);
        }
        let roi = Roi {
            x0: x0 as usize,
            y0: y0 as usize,
            width: ROI,
            height: ROI,
        };
        let response = filter(dog, &kernel, KERNEL, KERNEL, Some(roi));

        let mut best = (0.0f32, pt);
        for dy in -SEARCH..=SEARCH {
            for dx in -SEARCH..=SEARCH {
                let (x, y) = (pt.x + dx, pt.y + dy);
                if let Some(v) = response.try_get(x as i64, y as i64) {
                    if v > best.0 {
                        best = (v, PixelPoint::new(x, y));
                    }
                }
            }
        }
        if best.1 != pt {
            debug!("refine: {p} {pt:?} -> {:?}", best.1);
        }
        points[p] = best.1;
    }
    Ok(())
}

/// Rebuild the lines through the refined intersections.
///
/// First-family line `l` passes through points `2l + nLines` and the next;
/// second-family line `l` through points `2(l - nLines/2)` and the next.
/// Endpoints are clipped to the image frame `[0, width] x [0, height]`.
pub fn lines_from_intersections(lines: &mut [Line], points: &[PixelPoint], width: usize, height: usize) {
    let n = lines.len();
    let half = n / 2;
    if points.len() < 2 * n {
        return;
    }
    let (w, h) = (width as f64, height as f64);
    let px = |v: f64| (v + 0.5).floor() as i32;

    for l in 0..half {
        let (a, b) = (points[2 * l + n], points[2 * l + n + 1]);
        if a.x == b.x {
            continue;
        }
        let m = (b.y - a.y) as f64 / (b.x - a.x) as f64;
        let q = a.y as f64 - m * a.x as f64;
        let (mut x1, mut y1) = (0.0, q);
        if y1 > h {
            y1 = h;
            x1 = (y1 - q) / m;
        }
        let (mut x2, mut y2) = (w, w * m + q);
        if y2 < 0.0 {
            y2 = 0.0;
            x2 = -q / m;
        }
        lines[l] = Line::new(px(x1), px(y1), px(x2), px(y2));
    }

    for l in half..n {
        let (a, b) = (points[2 * (l - half)], points[2 * (l - half) + 1]);
        if a.y == b.y {
            continue;
        }
        let m = (b.x - a.x) as f64 / (b.y - a.y) as f64;
        let q = a.x as f64 - m * a.y as f64;
        let (mut x1, mut y1) = (h * m + q, h);
        if x1 < 0.0 {
            x1 = 0.0;
            y1 = -q / m;
        }
        let (mut x2, mut y2) = (q, 0.0);
        if x2 > w {
            x2 = w;
            y2 = (x2 - q) / m;
        }
        lines[l] = Line::new(px(x1), px(y1), px(x2), px(y2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_of_axis_aligned_lines_is_a_plus() {
        let k = cross_kernel(0.0, 0.0);
        let on: Vec<usize> = (0..k.len()).filter(|&i| k[i] > 0.0).collect();
        assert_eq!(on.len(), 41);
        assert!(on.iter().all(|&i| i / KERNEL == 10 || i % KERNEL == 10));
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn crossing_lines_of_a_fourteen_line_chart() {
        // 29 points, lines 0..7 first family, 7..14 second
        assert_eq!(crossing_lines(0, 29, 14), (0, 7));
        assert_eq!(crossing_lines(1, 29, 14), (6, 7));
        assert_eq!(crossing_lines(13, 29, 14), (6, 13));
        assert_eq!(crossing_lines(14, 29, 14), (0, 7));
        assert_eq!(crossing_lines(15, 29, 14), (0, 13));
        assert_eq!(crossing_lines(27, 29, 14), (6, 13));
        assert_eq!(crossing_lines(28, 29, 14), (3, 10));
    }

    #[test]
    fn point_near_the_border_fails() {
        let dog = ImageF32::new_gray(100, 100);
        let lines = [Line::new(1, 5, 98, 5), Line::new(5, 1, 5, 98)];
        let mut points = [PixelPoint::new(5, 5), PixelPoint::new(5, 5), PixelPoint::new(5, 5)];
        assert_eq!(
            refine_intersections(&dog, &lines, &mut points),
            Err(ReturnCode::CalibrationFailedLineDetection)
        );
        let mut off = [PixelPoint::new(-1, 50)];
        assert!(refine_intersections(&dog, &lines, &mut off).is_err());
    }
}
