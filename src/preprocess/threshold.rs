//! Row-wise profile extractor on a gradient-magnitude image.
//!
//! For every row the gradient image is scanned right-to-left for the first
//! sample above an acceptance threshold that is lowered by `threshold / 255`
//! per failed iteration. Around the hit, the low-pass image maximum inside a
//! `searchWidth` window becomes the profile point.
//!
//! A reference pass over a narrow central band (scanning left of the stylus
//! mask) fixes `referenceX`; the top and bottom halves then only accept hits
//! right of a running limit that follows the previous row, which keeps the
//! trace from jumping onto the stylus or unrelated edges.
//!
//! Complexity: O(H·W·maxIterations) worst case.
use crate::error::ReturnCode;
use crate::image::{ImageF32, ImageView};
use crate::profile::Profile;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Tunables of the profile extractor (settings section `thresholding`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThresholdParams {
    /// Initial acceptance threshold on the gradient magnitude.
    pub threshold: f32,
    pub max_iterations: i32,
    pub upper_boundary: i32,
    pub lower_boundary: i32,
    pub left_boundary: i32,
    pub right_boundary: i32,
    /// Width of the low-pass maximum search window, pixels.
    pub search_width: i32,
    /// Shift applied to a hit before the window search, pixels.
    pub search_offset: i32,
    /// Allowed leftward jump between consecutive rows, pixels.
    pub reference_width: i32,
    /// How far left of the stylus mask the reference pass scans.
    pub reference_offset_from_stylus: i32,
    /// Half height of the central reference band, rows.
    pub reference_half_height: i32,
    /// Constant added to every extracted x.
    pub profile_offset: i32,
    pub enable_stylus_mask: bool,
    #[serde(rename = "stylusMaskX1")]
    pub stylus_mask_x1: i32,
    #[serde(rename = "stylusMaskY1")]
    pub stylus_mask_y1: i32,
    #[serde(rename = "stylusMaskX2")]
    pub stylus_mask_x2: i32,
    #[serde(rename = "stylusMaskY2")]
    pub stylus_mask_y2: i32,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            max_iterations: 10,
            upper_boundary: 10,
            lower_boundary: 10,
            left_boundary: 10,
            right_boundary: 10,
            search_width: 10,
            search_offset: 2,
            reference_width: 60,
            reference_offset_from_stylus: 100,
            reference_half_height: 20,
            profile_offset: 0,
            enable_stylus_mask: false,
            stylus_mask_x1: 480,
            stylus_mask_y1: 250,
            stylus_mask_x2: 559,
            stylus_mask_y2: 310,
        }
    }
}

/// Scan row `y` of `sobel` from `from` down to `to` (inclusive) for the first
/// sample strictly above `threshold`.
fn scan_left(sobel: &[f32], from: i32, to: i32, threshold: f32) -> Option<i32> {
    if from < 0 {
        return None;
    }
    let from = from.min(sobel.len() as i32 - 1);
    let to = to.max(0);
    (to..=from).rev().find(|&w| sobel[w as usize] > threshold)
}

/// First strict maximum of `row` in `[lw, rw]`.
fn window_max(row: &[f32], lw: i32, rw: i32) -> i32 {
    let mut best = lw;
    let mut value = row[lw as usize];
    for w in lw..=rw {
        if row[w as usize] > value {
            value = row[w as usize];
            best = w;
        }
    }
    best
}

struct Scanner<'a> {
    sobel: &'a ImageF32,
    low_pass: &'a ImageF32,
    step: f32,
    width: i32,
    left_boundary: i32,
    params: &'a ThresholdParams,
}

impl Scanner<'_> {
    /// Iteratively lower the threshold until `accept(hit)` holds.
    fn find_hit(&self, y: usize, from: i32, to: i32, accept: impl Fn(i32) -> bool) -> Option<i32> {
        let row = self.sobel.row(y);
        let mut current = self.params.threshold;
        let mut hit = None;
        let mut iteration = 1;
        while iteration < self.params.max_iterations && !hit.is_some_and(&accept) {
            hit = scan_left(row, from, to, current);
            current -= self.step;
            iteration += 1;
        }
        hit.filter(|&h| accept(h))
    }

    /// Low-pass maximum near a gradient hit.
    fn locate(&self, y: usize, hit: i32) -> i32 {
        let rw = (hit + self.params.search_offset).min(self.width - 1);
        let lw = (rw - self.params.search_width).max(self.left_boundary).min(rw);
        window_max(self.low_pass.row(y), lw, rw)
    }

    /// Trace rows in order, each hit bounded by the previous one.
    fn trace(&self, rows: impl Iterator<Item = usize>, reference_x: i32, out: &mut Vec<(i32, i32)>) {
        let right_start = self.width - 1 - self.right_boundary();
        let mut limit = reference_x - self.params.reference_width;
        for y in rows {
            let bound = limit;
            let hit = self.find_hit(y, right_start, self.left_boundary, |h| h >= bound);
            if let Some(hit) = hit {
                let x = self.locate(y, hit);
                limit = x - self.params.reference_width;
                out.push((x + self.params.profile_offset, y as i32));
            }
        }
    }

    fn right_boundary(&self) -> i32 {
        self.params.right_boundary.max(1)
    }
}

/// Zero the stylus rectangle when enabled and fully inside the image.
fn apply_stylus_mask<'a>(sobel: &'a ImageF32, params: &ThresholdParams) -> Cow<'a, ImageF32> {
    if !params.enable_stylus_mask {
        return Cow::Borrowed(sobel);
    }
    let (w, h) = (sobel.width() as i32, sobel.height() as i32);
    let xs = [params.stylus_mask_x1, params.stylus_mask_x2];
    let ys = [params.stylus_mask_y1, params.stylus_mask_y2];
    if xs.iter().any(|&x| x < 0 || x >= w) || ys.iter().any(|&y| y < 0 || y >= h) {
        warn!("threshold: stylus mask outside the image, ignored");
        return Cow::Borrowed(sobel);
    }
    let mut masked = sobel.clone();
    for y in params.stylus_mask_y1..=params.stylus_mask_y2 {
        for x in params.stylus_mask_x1..=params.stylus_mask_x2 {
            masked.set(x as usize, y as usize, 0.0);
        }
    }
    Cow::Owned(masked)
}

/// Mean column of the central reference band, `None` when no row has a hit.
fn reference_column(scanner: &Scanner<'_>, height: usize) -> Option<i32> {
    let params = scanner.params;
    let half = (height / 2) as i32;
    let band = params.reference_half_height.abs();
    let start = (half - band).max(0) as usize;
    let end = ((half + band) as usize).min(height);
    let from = params.stylus_mask_x1;
    let to = (params.stylus_mask_x1 - params.reference_offset_from_stylus).max(0);

    let mut sum = 0i64;
    let mut hits = 0i64;
    for y in start..end {
        if let Some(hit) = scanner.find_hit(y, from, to, |_| true) {
            sum += scanner.locate(y, hit) as i64;
            hits += 1;
        }
    }
    (hits > 0).then(|| (sum / hits) as i32)
}

/// Extract the edge profile from a gradient image and its low-pass source.
///
/// Rows from `height/2` up to `upperBoundary` are traced first (and reversed,
/// so the profile runs top to bottom), then rows `height/2 + 1` down to
/// `height - lowerBoundary`.
pub fn threshold(sobel: &ImageF32, low_pass: &ImageF32, params: &ThresholdParams) -> Result<Profile, ReturnCode> {
    let (width, height) = (sobel.width(), sobel.height());
    if width == 0 || height == 0 || low_pass.width() != width || low_pass.height() != height {
        warn!("threshold: mismatched or empty inputs");
        return Err(ReturnCode::PreprocessFailedProfileDetection);
    }

    let upper = params.upper_boundary.max(1) as usize;
    let lower = params.lower_boundary.max(1) as usize;
    let masked = apply_stylus_mask(sobel, params);
    let scanner = Scanner {
        sobel: &masked,
        low_pass,
        step: params.threshold / 255.0,
        width: width as i32,
        left_boundary: params.left_boundary.max(1),
        params,
    };

    let reference_x = reference_column(&scanner, height).unwrap_or_else(|| {
        warn!("threshold: no edge in the reference band, referenceX falls back to 0");
        0
    });
    debug!("threshold: referenceX={reference_x}");

    let half = height / 2;
    let mut top = Vec::with_capacity(half);
    if half >= upper {
        scanner.trace((upper..=half).rev(), reference_x, &mut top);
    }
    let mut bottom = Vec::with_capacity(half);
    scanner.trace(half + 1..height.saturating_sub(lower), reference_x, &mut bottom);

    let mut profile = Profile::with_capacity(top.len() + bottom.len());
    for &(x, y) in top.iter().rev().chain(bottom.iter()) {
        profile.push(x, y);
    }
    debug!("threshold: {} profile points ({} top, {} bottom)", profile.len(), top.len(), bottom.len());

    if profile.is_empty() {
        return Err(ReturnCode::PreprocessFailedProfileDetection);
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ridge(w: usize, h: usize, col: impl Fn(usize) -> f32) -> ImageF32 {
        ImageF32::from_fn(w, h, |x, y| {
            let d = x as f32 - col(y);
            (-(d * d) / (2.0 * 1.5 * 1.5)).exp()
        })
    }

    fn params_for(w: i32) -> ThresholdParams {
        ThresholdParams {
            threshold: 0.3,
            max_iterations: 5,
            upper_boundary: 5,
            lower_boundary: 5,
            left_boundary: 2,
            right_boundary: 2,
            search_width: 10,
            search_offset: 0,
            reference_width: 30,
            reference_offset_from_stylus: 1000,
            reference_half_height: 4,
            stylus_mask_x1: w - 4,
            ..ThresholdParams::default()
        }
    }

    #[test]
    fn vertical_ridge_is_traced_on_every_row() {
        let img = ridge(80, 60, |_| 40.0);
        let sobel = crate::preprocess::filters::sobel(&img);
        let profile = threshold(&sobel, &img, &params_for(80)).unwrap();
        assert_eq!(profile.len(), 60 - 5 - 5);
        assert!(profile.iter().all(|p| p.x == 40), "{:?}", profile.points);
        let ys: Vec<i32> = profile.iter().map(|p| p.y).collect();
        assert!(ys.windows(2).all(|w| w[1] == w[0] + 1), "rows not ordered: {ys:?}");
        assert_eq!(ys[0], 5);
    }

    #[test]
    fn profile_offset_shifts_x() {
        let img = ridge(80, 40, |_| 30.0);
        let sobel = crate::preprocess::filters::sobel(&img);
        let params = ThresholdParams {
            profile_offset: 3,
            ..params_for(80)
        };
        let profile = threshold(&sobel, &img, &params).unwrap();
        assert!(profile.iter().all(|p| p.x == 33));
    }

    #[test]
    fn blank_image_reports_profile_detection() {
        let img = ImageF32::new_gray(50, 50);
        let err = threshold(&img, &img, &params_for(50)).unwrap_err();
        assert_eq!(err, ReturnCode::PreprocessFailedProfileDetection);
    }

    #[test]
    fn stylus_mask_hides_right_edge() {
        // ridge plus a bright "stylus" bar on the right in the centre rows
        let mut img = ridge(100, 60, |_| 30.0);
        for y in 20..40 {
            for x in 70..76 {
                img.set(x, y, 1.0);
            }
        }
        let sobel = crate::preprocess::filters::sobel(&img);
        let params = ThresholdParams {
            enable_stylus_mask: true,
            stylus_mask_x1: 65,
            stylus_mask_x2: 80,
            stylus_mask_y1: 18,
            stylus_mask_y2: 42,
            reference_width: 10,
            ..params_for(100)
        };
        let profile = threshold(&sobel, &img, &params).unwrap();
        assert!(profile.iter().all(|p| p.x == 30), "{:?}", profile.points);
    }
}
