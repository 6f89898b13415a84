//! Filter primitives on row-padded images.
//!
//! - Channel selection and u8 -> f32 conversion (scaled to [0, 1]).
//! - Min/max normalization, fixed and adaptive binarization.
//! - Separable box low-pass, 3x3 Sobel magnitude, Gaussian and DoG.
//! - Generic 2-D kernel filtering restricted to a ROI, median blur.
//!
//! All filters allocate a fresh output of the same geometry; pixels a filter
//! does not define (borders) are left at zero unless stated otherwise.
//! Complexity: O(W·H·k) for a kernel of k taps per pass.
use crate::image::{ImageBuffer, ImageF32, ImageU8, ImageView, ImageViewMut, Sample};
use log::{debug, warn};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Fixed DoG kernel size (taps).
pub const DOG_KERNEL_SIZE: usize = 37;
/// Step used while lowering the adaptive binarization threshold.
pub const ADAPTIVE_STEP: f32 = 0.05;
/// Lowest threshold tried by `adaptive_binarize`.
pub const ADAPTIVE_FLOOR: f32 = 0.1;
/// Accepted foreground fraction window.
pub const FOREGROUND_RANGE: (f32, f32) = (0.065, 0.200);

/// Rectangular region of interest in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

/// Return channel `index` as a single-channel image.
///
/// Single-channel input is borrowed unchanged.
pub fn get_channel<T: Sample>(image: &ImageBuffer<T>, index: usize) -> Cow<'_, ImageBuffer<T>> {
    let channels = image.channels();
    if channels == 1 {
        return Cow::Borrowed(image);
    }
    let index = index.min(channels - 1);
    let mut out = ImageBuffer::<T>::new_gray(image.width(), image.height());
    for y in 0..image.height() {
        let src = image.row(y);
        for (x, dst) in out.row_mut(y).iter_mut().enumerate() {
            *dst = src[x * channels + index];
        }
    }
    Cow::Owned(out)
}

/// u8 -> f32 scaled to [0, 1].
pub fn to_f32(image: &ImageU8) -> ImageF32 {
    image.map(|v| v as f32 / 255.0)
}

/// f32 in [0, 1] -> u8, clamped.
pub fn to_u8(image: &ImageF32) -> ImageU8 {
    image.map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Rescale all samples to [0, 1] in place; no-op if the image is flat.
pub fn normalize(image: &mut ImageF32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for v in image.samples() {
        min = min.min(v);
        max = max.max(v);
    }
    if max > min {
        let k = 1.0 / (max - min);
        image.apply(|v| (v - min) * k);
    }
}

/// `v >= threshold -> 1`, otherwise 0.
pub fn binarize(image: &mut ImageF32, threshold: f32) {
    image.apply(|v| if v >= threshold { 1.0 } else { 0.0 });
}

/// Fraction of samples `>= threshold`.
pub fn foreground_fraction(image: &ImageF32, threshold: f32) -> f32 {
    let total = image.width() * image.height();
    if total == 0 {
        return 0.0;
    }
    let white = image.samples().filter(|&v| v >= threshold).count();
    white as f32 / total as f32
}

/// Lower the threshold from `start` in steps of 0.05 down to 0.1 and binarize
/// at the first one whose foreground fraction lies in [0.065, 0.200].
///
/// Returns the accepted threshold, or `None` (image untouched) when the
/// search is exhausted.
pub fn adaptive_binarize(image: &mut ImageF32, start: f32) -> Option<f32> {
    let mut k = 0u32;
    loop {
        let threshold = start - k as f32 * ADAPTIVE_STEP;
        if threshold < ADAPTIVE_FLOOR - 1e-6 {
            break;
        }
        let fraction = foreground_fraction(image, threshold);
        debug!("adaptive_binarize: threshold={threshold:.3} foreground={fraction:.4}");
        if (FOREGROUND_RANGE.0..=FOREGROUND_RANGE.1).contains(&fraction) {
            debug!("adaptive_binarize: DoG threshold detected {threshold:.3}");
            binarize(image, threshold);
            return Some(threshold);
        }
        k += 1;
    }
    warn!("adaptive_binarize: no threshold in [{ADAPTIVE_FLOOR}, {start}] gives a valid foreground");
    None
}

/// Correlate each row with a 3-tap kernel; columns 0 and w-1 stay zero.
fn filter_rows3(image: &ImageF32, k: [f32; 3]) -> ImageF32 {
    let (w, h) = (image.width(), image.height());
    let mut out = ImageF32::new_gray(w, h);
    if w < 3 {
        return out;
    }
    for y in 0..h {
        let src = image.row(y);
        let dst = out.row_mut(y);
        for x in 1..w - 1 {
            dst[x] = src[x - 1] * k[0] + src[x] * k[1] + src[x + 1] * k[2];
        }
    }
    out
}

/// Correlate each column with a 3-tap kernel; rows 0 and h-1 stay zero.
fn filter_cols3(image: &ImageF32, k: [f32; 3]) -> ImageF32 {
    let (w, h) = (image.width(), image.height());
    let mut out = ImageF32::new_gray(w, h);
    if h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        let (prev, cur, next) = (image.row(y - 1), image.row(y), image.row(y + 1));
        let dst = out.row_mut(y);
        for x in 0..w {
            dst[x] = prev[x] * k[0] + cur[x] * k[1] + next[x] * k[2];
        }
    }
    out
}

/// Separable Sobel magnitude `sqrt((gx² + gy²) / 9)`; the outer border is 0.
pub fn sobel(image: &ImageF32) -> ImageF32 {
    const DIFF: [f32; 3] = [1.0, 0.0, -1.0];
    const SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];
    let gx = filter_cols3(&filter_rows3(image, DIFF), SMOOTH);
    let gy = filter_cols3(&filter_rows3(image, SMOOTH), DIFF);
    let mut mag = ImageF32::new_gray(image.width(), image.height());
    for y in 0..image.height() {
        let (rx, ry) = (gx.row(y), gy.row(y));
        for (x, dst) in mag.row_mut(y).iter_mut().enumerate() {
            *dst = ((rx[x] * rx[x] + ry[x] * ry[x]) / 9.0).sqrt();
        }
    }
    mag
}

/// Box filter of `radius` taps with coefficient `1/radius`, rows then columns.
///
/// Output is defined for `x in [r/2, w - r/2)` (same for y) using the window
/// `[x - r/2, x - r/2 + r - 1]`.
pub fn low_pass(image: &ImageF32, radius: usize) -> ImageF32 {
    let (w, h) = (image.width(), image.height());
    if radius == 0 {
        return image.clone();
    }
    let c = 1.0 / radius as f32;
    let half = radius / 2;

    let mut rows = ImageF32::new_gray(w, h);
    if w >= radius {
        for y in 0..h {
            let src = image.row(y);
            let dst = rows.row_mut(y);
            for x in half..w - half {
                let start = x - half;
                let end = (start + radius).min(w);
                dst[x] = src[start..end].iter().sum::<f32>() * c;
            }
        }
    }

    let mut out = ImageF32::new_gray(w, h);
    if h >= radius {
        for y in half..h - half {
            let start = y - half;
            let end = (start + radius).min(h);
            let dst = out.row_mut(y);
            for yy in start..end {
                for (d, &s) in dst.iter_mut().zip(rows.row(yy)) {
                    *d += s;
                }
            }
            dst.iter_mut().for_each(|v| *v *= c);
        }
    }
    out
}

/// Normalized 1-D Gaussian taps for `exp(-i²/(2σ²))`, `i in [-(n-1)/2, (n-1)/2]`.
pub fn gaussian_kernel(sigma: f32, size: usize) -> Vec<f32> {
    let n = (size.max(1) - 1) / 2;
    let q = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (0..=2 * n)
        .map(|i| {
            let d = i as f32 - n as f32;
            if q > 0.0 {
                (-(d * d) / q).exp()
            } else if d == 0.0 {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    if sum > 0.0 {
        taps.iter_mut().for_each(|t| *t /= sum);
    }
    taps
}

/// Convolve a line with symmetric taps, renormalizing by the taps that fall
/// inside the line at the borders.
fn convolve_line(src: &[f32], taps: &[f32], dst: &mut [f32]) {
    let n = (taps.len() - 1) / 2;
    let len = src.len() as isize;
    for (x, out) in dst.iter_mut().enumerate() {
        let mut acc = 0.0;
        let mut weight = 0.0;
        for (k, &t) in taps.iter().enumerate() {
            let xi = x as isize + k as isize - n as isize;
            if xi >= 0 && xi < len {
                acc += src[xi as usize] * t;
                weight += t;
            }
        }
        *out = if weight > 0.0 { acc / weight } else { 0.0 };
    }
}

/// Separable Gaussian blur with `size` taps.
pub fn gaussian(image: &ImageF32, sigma: f32, size: usize) -> ImageF32 {
    let (w, h) = (image.width(), image.height());
    let taps = gaussian_kernel(sigma, size);

    let mut rows = ImageF32::new_gray(w, h);
    for y in 0..h {
        convolve_line(image.row(y), &taps, rows.row_mut(y));
    }

    let mut out = ImageF32::new_gray(w, h);
    let mut column = vec![0.0f32; h];
    let mut filtered = vec![0.0f32; h];
    for x in 0..w {
        for (y, c) in column.iter_mut().enumerate() {
            *c = rows.get(x, y);
        }
        convolve_line(&column, &taps, &mut filtered);
        for (y, &v) in filtered.iter().enumerate() {
            out.set(x, y, v);
        }
    }
    out
}

/// `blur(σ1) - blur(σ2)` with a fixed 37-tap kernel.
pub fn difference_of_gaussian(image: &ImageF32, sigma1: f32, sigma2: f32) -> ImageF32 {
    let mut size = DOG_KERNEL_SIZE;
    if size % 2 == 0 {
        size += 1;
    }
    let blur1 = gaussian(image, sigma1, size);
    let blur2 = gaussian(image, sigma2, size);
    let mut dog = ImageF32::new_gray(image.width(), image.height());
    for y in 0..image.height() {
        let (a, b) = (blur1.row(y), blur2.row(y));
        for (x, d) in dog.row_mut(y).iter_mut().enumerate() {
            *d = a[x] - b[x];
        }
    }
    dog
}

/// Convolve with an `nx × ny` row-major kernel using zero padding.
///
/// When `roi` is given only pixels inside it are computed (the ROI is shifted
/// to fit inside the image); all other outputs are zero.
pub fn filter(image: &ImageF32, kernel: &[f32], nx: usize, ny: usize, roi: Option<Roi>) -> ImageF32 {
    let (w, h) = (image.width(), image.height());
    let mut out = ImageF32::new_gray(w, h);
    if kernel.len() < nx * ny || nx == 0 || ny == 0 {
        warn!("filter: kernel of {} taps does not match {nx}x{ny}", kernel.len());
        return out;
    }
    let (ox, oy) = ((nx - 1) / 2, (ny - 1) / 2);

    let (left, right, top, bottom) = match roi {
        Some(r) => {
            let rw = r.width.min(w);
            let rh = r.height.min(h);
            let left = r.x0.min(w - rw);
            let top = r.y0.min(h - rh);
            (left, left + rw, top, top + rh)
        }
        None => (0, w, 0, h),
    };

    for y in top..bottom {
        for x in left..right {
            let mut acc = 0.0;
            for ky in 0..ny {
                let yi = y as isize + ky as isize - oy as isize;
                if yi < 0 || yi >= h as isize {
                    continue;
                }
                let src = image.row(yi as usize);
                let krow = &kernel[(ny - 1 - ky) * nx..(ny - ky) * nx];
                for kx in 0..nx {
                    let xi = x as isize + kx as isize - ox as isize;
                    if xi < 0 || xi >= w as isize {
                        continue;
                    }
                    acc += src[xi as usize] * krow[nx - 1 - kx];
                }
            }
            out.set(x, y, acc);
        }
    }
    out
}

/// Median over a `(2r+1)²` window with zero padding.
pub fn median<T: Sample>(image: &ImageBuffer<T>, radius: usize) -> ImageBuffer<T> {
    let (w, h) = (image.width(), image.height());
    let mut out = ImageBuffer::<T>::new_gray(w, h);
    let side = 2 * radius + 1;
    let mut window = Vec::with_capacity(side * side);
    for y in 0..h {
        for x in 0..w {
            window.clear();
            for dy in 0..side {
                let yi = y as isize + dy as isize - radius as isize;
                for dx in 0..side {
                    let xi = x as isize + dx as isize - radius as isize;
                    let v = if yi < 0 || xi < 0 || yi >= h as isize || xi >= w as isize {
                        T::default()
                    } else {
                        image.get(xi as usize, yi as usize)
                    };
                    window.push(v);
                }
            }
            window.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            out.set(x, y, window[window.len() / 2]);
        }
    }
    out
}
