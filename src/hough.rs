//! Hough line detector for the calibration chart.
//!
//! Pipeline
//! - Voting: every foreground pixel (> 0.5) votes once per theta bin
//!   (15°..195°, 0.2° steps) at `rho = (x-cx)cos θ + (y-cy)sin θ`, quantized in
//!   0.2 px steps with a uniform `[0, 1)` px jitter against banding. Votes are
//!   rescaled to [0, 1].
//! - Peaks: adaptive per line family, see [`peaks`].
//! - Lines: each peak in normal form is extended across the image; the first
//!   family (near-horizontal) is sorted by y descending, the second by x
//!   ascending.
//! - Intersections: fixed traversal order relied upon by the grid
//!   calibration, `2·nLines + 1` points.
//! - Optional refinement of every intersection on the DoG image, see
//!   [`refine`].
//!
//! Complexity: voting is O(P·T) for P foreground pixels and T theta bins.
pub mod peaks;
pub mod refine;

pub use peaks::adaptive_peaks;
pub use refine::{lines_from_intersections, refine_intersections};

use crate::config::Settings;
use crate::error::ReturnCode;
use crate::image::{ImageF32, ImageU8, ImageView, ImageViewMut};
use crate::preprocess::filters::{adaptive_binarize, difference_of_gaussian, get_channel, normalize, to_f32};
use crate::profile::PixelPoint;
use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const THETA_START_DEG: f64 = 15.0;
pub const THETA_STEP_DEG: f64 = 0.2;
pub const N_THETA: usize = 900;
pub const RHO_STEP: f64 = 0.2;

/// Image line through two endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line {
    pub p1: PixelPoint,
    pub p2: PixelPoint,
}

impl Line {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            p1: PixelPoint::new(x1, y1),
            p2: PixelPoint::new(x2, y2),
        }
    }

    /// `dy/dx` (line as `y = m·x + q`).
    #[inline]
    pub fn slope_y(&self) -> f64 {
        (self.p2.y - self.p1.y) as f64 / (self.p2.x - self.p1.x) as f64
    }

    /// `dx/dy` (line as `x = m·y + q`).
    #[inline]
    pub fn slope_x(&self) -> f64 {
        (self.p2.x - self.p1.x) as f64 / (self.p2.y - self.p1.y) as f64
    }

    fn homogeneous(&self) -> Vector3<f64> {
        let a = Vector3::new(self.p1.x as f64, self.p1.y as f64, 1.0);
        let b = Vector3::new(self.p2.x as f64, self.p2.y as f64, 1.0);
        a.cross(&b)
    }

    /// Crossing with `other`, floored to the pixel grid; `None` when parallel.
    pub fn intersection(&self, other: &Line) -> Option<PixelPoint> {
        let p = self.homogeneous().cross(&other.homogeneous());
        if p.z.abs() < 1e-9 {
            return None;
        }
        Some(PixelPoint::new((p.x / p.z).floor() as i32, (p.y / p.z).floor() as i32))
    }
}

/// Rho/theta accumulator of one source image.
#[derive(Clone, Debug)]
pub struct Hough {
    cos: Vec<f64>,
    sin: Vec<f64>,
    accumulator: ImageF32,
    src_width: usize,
    src_height: usize,
    rng: StdRng,
}

impl Hough {
    pub fn new(seed: Option<u64>) -> Self {
        let (sin, cos) = (0..N_THETA).map(|t| theta_deg(t).to_radians().sin_cos()).unzip();
        Self {
            cos,
            sin,
            accumulator: ImageF32::new_gray(0, 0),
            src_width: 0,
            src_height: 0,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    /// Accumulator, theta bins along x and rho bins along y.
    #[inline]
    pub fn accumulator(&self) -> &ImageF32 {
        &self.accumulator
    }

    #[inline]
    pub fn accumulator_mut(&mut self) -> &mut ImageF32 {
        &mut self.accumulator
    }

    /// Vote every pixel of `binary` above 0.5 and rescale the votes to [0, 1].
    pub fn transform(&mut self, binary: &ImageF32) -> &ImageF32 {
        let (w, h) = (binary.width(), binary.height());
        self.src_width = w;
        self.src_height = h;
        let n_rho = rho_bins(w, h);
        let half = (n_rho / 2) as i64;
        let (cx, cy) = ((w / 2) as f64, (h / 2) as f64);

        let mut acc = ImageF32::new_gray(N_THETA, n_rho);
        let mut votes = 0usize;
        for y in 0..h {
            let row = binary.row(y);
            for (x, &v) in row.iter().enumerate() {
                if v <= 0.5 {
                    continue;
                }
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                // the last bin never receives votes
                for t in 0..N_THETA - 1 {
                    let rho = dx * self.cos[t] + dy * self.sin[t];
                    let jitter: f64 = self.rng.gen();
                    let idx = ((rho + jitter) / RHO_STEP) as i64;
                    if idx == 0 {
                        continue;
                    }
                    let idx = idx + half;
                    if (0..n_rho as i64).contains(&idx) {
                        acc.row_mut(idx as usize)[t] += 1.0;
                        votes += 1;
                    }
                }
            }
        }
        normalize(&mut acc);
        debug!("hough: {votes} votes over {N_THETA}x{n_rho} bins");
        self.accumulator = acc;
        &self.accumulator
    }

    /// Extend each `(theta bin, rho bin)` peak into a line across the image.
    ///
    /// The first half of `peaks` must be the near-horizontal family.
    pub fn lines(&self, peaks: &[(i32, i32)]) -> Vec<Line> {
        let (w, h) = (self.src_width as i32, self.src_height as i32);
        let height_px = (self.accumulator.height() as f64 * RHO_STEP + 0.5) as i32;
        let (hw, hh) = ((w / 2) as f64, (h / 2) as f64);
        let horizontal_bins = ((45.0 - THETA_START_DEG) / THETA_STEP_DEG) as i32
            ..=((135.0 - THETA_START_DEG) / THETA_STEP_DEG) as i32;
        let px = |v: f64| (v + 0.5).floor() as i32;

        let mut lines: Vec<Line> = peaks
            .iter()
            .map(|&(cx, cy)| {
                let rho = ((cy as f64 * RHO_STEP + 0.5) as i32 - height_px / 2) as f64;
                let (s, c) = theta_deg(cx.max(0) as usize).to_radians().sin_cos();
                let y_at = |x: i32| px((rho - (x as f64 - hw) * c) / s + hh);
                let x_at = |y: i32| px((rho - (y as f64 - hh) * s) / c + hw);
                if horizontal_bins.contains(&cx) {
                    let (mut x1, mut y1) = (1, y_at(1));
                    if y1 >= h {
                        y1 = h - 2;
                        x1 = x_at(y1);
                    }
                    let (mut x2, mut y2) = (w - 2, y_at(w - 2));
                    if y2 <= 0 {
                        y2 = 1;
                        x2 = x_at(y2);
                    }
                    Line::new(x1, y1, x2, y2)
                } else {
                    Line::new(x_at(1), 1, x_at(h - 2), h - 2)
                }
            })
            .collect();

        let half = lines.len() / 2;
        lines[..half].sort_by(|a, b| b.p1.y.cmp(&a.p1.y));
        lines[half..].sort_by_key(|l| l.p1.x);
        lines
    }
}

#[inline]
fn theta_deg(bin: usize) -> f64 {
    THETA_START_DEG + THETA_STEP_DEG * bin as f64
}

/// Rho bins covering `±√2·max(w, h) / 2`.
fn rho_bins(width: usize, height: usize) -> usize {
    let diag = (std::f64::consts::SQRT_2 * width.max(height) as f64) as usize;
    (diag as f64 / RHO_STEP).round() as usize
}

/// Chart intersections in calibration order:
/// 1. every line of the second family with the first and the last line of
///    the first family,
/// 2. every line of the first family with the first and the last line of
///    the second family,
/// 3. the centre: central line of the second family with the central line
///    of the first.
pub fn intersection_points(lines: &[Line]) -> Option<Vec<PixelPoint>> {
    let half = lines.len() / 2;
    if half == 0 || lines.len() != half * 2 {
        return None;
    }
    let (first, second) = lines.split_at(half);
    let mut points = Vec::with_capacity(lines.len() * 2 + 1);
    for l in second {
        points.push(l.intersection(&first[0])?);
        points.push(l.intersection(&first[half - 1])?);
    }
    for l in first {
        points.push(l.intersection(&second[0])?);
        points.push(l.intersection(&second[half - 1])?);
    }
    let c = (half - 1) / 2;
    points.push(second[c].intersection(&first[c])?);
    Some(points)
}

/// Result of the chart detection.
#[derive(Clone, Debug)]
pub struct GridDetection {
    pub lines: Vec<Line>,
    pub intersections: Vec<PixelPoint>,
    /// Binarized DoG the votes were cast from
    pub binary: ImageF32,
    pub accumulator: ImageF32,
    /// DoG threshold accepted by the adaptive binarization
    pub dog_threshold: f32,
}

/// Index of the first point off a `width × height` image (edges included).
fn first_off_image(points: &[PixelPoint], width: usize, height: usize) -> Option<usize> {
    let (w, h) = (width as i32, height as i32);
    points.iter().position(|p| p.x < 0 || p.x > w || p.y < 0 || p.y > h)
}

/// Detect the chart lines and their intersections.
///
/// - DoG binarization failure -> `CalibrationFailedGrid`,
/// - missing peaks, parallel lines or intersections off the image ->
///   `CalibrationFailedLineDetection`.
pub fn detect_grid(image: &ImageU8, settings: &Settings) -> Result<GridDetection, ReturnCode> {
    let chart = &settings.scheimpflug_transformation_chart;
    let channel = get_channel(image, settings.image.selected_channel);
    let mut gray = to_f32(&channel);
    normalize(&mut gray);

    let mut dog = difference_of_gaussian(&gray, chart.dog_sigma1, chart.dog_sigma2);
    normalize(&mut dog);
    let dog_normalized = dog.clone();
    let Some(dog_threshold) = adaptive_binarize(&mut dog, chart.dog_threshold) else {
        warn!("detect grid: DoG binarization failed");
        return Err(ReturnCode::CalibrationFailedGrid);
    };

    let mut hough = Hough::new(chart.seed);
    hough.transform(&dog);
    let Some(peaks) = adaptive_peaks(hough.accumulator_mut(), chart.hough_threshold, chart.hough_peaks) else {
        warn!("detect grid: {} lines not found", chart.hough_peaks);
        return Err(ReturnCode::CalibrationFailedLineDetection);
    };
    let mut lines = hough.lines(&peaks);
    let Some(mut intersections) = intersection_points(&lines) else {
        warn!("detect grid: degenerate line set");
        return Err(ReturnCode::CalibrationFailedLineDetection);
    };
    if let Some(p) = first_off_image(&intersections, image.width(), image.height()) {
        warn!("detect grid: intersection {p} {:?} off the image", intersections[p]);
        return Err(ReturnCode::CalibrationFailedLineDetection);
    }

    if chart.refine {
        refine_intersections(&dog_normalized, &lines, &mut intersections)?;
        lines_from_intersections(&mut lines, &intersections, image.width(), image.height());
    }
    info!(
        "detect grid: {} lines, {} intersections (DoG threshold {dog_threshold:.2})",
        lines.len(),
        intersections.len()
    );
    Ok(GridDetection {
        lines,
        intersections,
        binary: dog,
        accumulator: hough.accumulator,
        dog_threshold,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Binary chart of `n` horizontal and `n` vertical lines, `spacing` px
    /// apart and centred on the image.
    pub(crate) fn chart_image(n: usize, spacing: usize) -> (ImageF32, Vec<i32>) {
        let size = 560usize;
        let first = size / 2 - spacing * (n / 2);
        let pos: Vec<i32> = (0..n).map(|k| (first + k * spacing) as i32).collect();
        let mut img = ImageF32::new_gray(size, size);
        for &p in &pos {
            for v in 40..520 {
                img.set(v, p as usize, 1.0);
                img.set(p as usize, v, 1.0);
            }
        }
        (img, pos)
    }

    fn detect(n: usize, spacing: usize) -> (Vec<Line>, Vec<PixelPoint>, Vec<i32>, ImageF32) {
        let (img, pos) = chart_image(n, spacing);
        let mut hough = Hough::new(Some(17));
        hough.transform(&img);
        let peaks = adaptive_peaks(hough.accumulator_mut(), 0.5, 2 * n).unwrap();
        let lines = hough.lines(&peaks);
        let points = intersection_points(&lines).unwrap();
        (lines, points, pos, img)
    }

    #[test]
    fn line_intersection_is_exact_for_axis_aligned_lines() {
        let h = Line::new(1, 100, 558, 100);
        let v = Line::new(200, 1, 200, 558);
        assert_eq!(h.intersection(&v), Some(PixelPoint::new(200, 100)));
        assert_eq!(h.intersection(&Line::new(1, 50, 558, 50)), None);
        assert_eq!(h.slope_y(), 0.0);
        assert_eq!(v.slope_x(), 0.0);
    }

    #[test]
    fn line_and_intersection_counts() {
        for (n, spacing) in [(3, 120), (5, 80), (7, 60)] {
            let (lines, points, _, _) = detect(n, spacing);
            assert_eq!(lines.len(), 2 * n);
            assert_eq!(points.len(), 4 * n + 1);
        }
    }

    #[test]
    fn lines_follow_the_chart() {
        let (lines, points, pos, _) = detect(7, 60);
        // first family: horizontal, y descending
        for (l, &y) in lines[..7].iter().zip(pos.iter().rev()) {
            assert!((l.p1.y - y).abs() <= 3 && (l.p2.y - y).abs() <= 3, "{l:?} vs {y}");
        }
        // second family: vertical, x ascending
        for (l, &x) in lines[7..].iter().zip(&pos) {
            assert!((l.p1.x - x).abs() <= 3 && (l.p2.x - x).abs() <= 3, "{l:?} vs {x}");
        }
        let centre = points[28];
        assert!((centre.x - 280).abs() <= 3 && (centre.y - 280).abs() <= 3);
    }

    #[test]
    fn refinement_snaps_to_the_crossings() {
        let (mut lines, mut points, pos, img) = detect(7, 60);
        refine_intersections(&img, &lines, &mut points).unwrap();
        for p in &points {
            assert!(pos.contains(&p.x) && pos.contains(&p.y), "{p:?}");
        }
        assert_eq!(points[28], PixelPoint::new(280, 280));
        // vertical line 0 crosses the bottom and the top horizontal line
        assert_eq!(points[0], PixelPoint::new(pos[0], pos[6]));
        assert_eq!(points[1], PixelPoint::new(pos[0], pos[0]));

        lines_from_intersections(&mut lines, &points, 560, 560);
        assert_eq!(lines[0], Line::new(0, pos[6], 560, pos[6]));
        assert_eq!(lines[7], Line::new(pos[0], 560, pos[0], 0));
    }

    #[test]
    fn blank_image_has_no_grid() {
        let settings = Settings::default();
        let blank = ImageU8::new_gray(560, 560);
        assert_eq!(detect_grid(&blank, &settings).err(), Some(ReturnCode::CalibrationFailedGrid));

        let mut hough = Hough::new(Some(1));
        hough.transform(&ImageF32::new_gray(64, 64));
        assert!(adaptive_peaks(hough.accumulator_mut(), 0.5, 6).is_none());
    }

    #[test]
    fn intersections_off_the_image_are_found() {
        let inside = [PixelPoint::new(0, 0), PixelPoint::new(560, 560), PixelPoint::new(280, 12)];
        assert_eq!(first_off_image(&inside, 560, 560), None);
        let mut points = inside.to_vec();
        points.push(PixelPoint::new(-3, 100));
        points.push(PixelPoint::new(100, 561));
        assert_eq!(first_off_image(&points, 560, 560), Some(3));
        assert_eq!(first_off_image(&points[4..], 560, 560), Some(0));
    }
}
