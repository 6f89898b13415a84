//! Adaptive peak search on the Hough accumulator.
//!
//! The accumulator is split into two theta bands, `[0°, 90°]` and
//! `[91°, 180°]` past the 15° origin, one per line family. For each band and
//! `n = nPeaks / 2`:
//! - scan rho from the bottom of the accumulator up, theta ascending, and
//!   record every cell `>= threshold`; each hit is replaced by the
//!   value-weighted centroid of its ±10 rho × ±5 theta neighbourhood and a
//!   ±40 × ±40 bin region around the centroid is cleared,
//! - peaks accumulate across threshold passes; with fewer than `n` peaks the
//!   threshold drops by 0.05,
//! - the signed distance `d = cy - rows/2` splits the peaks into an upper
//!   (`d < 0`) and a lower group, each owed `n/2` lines; the group of the
//!   peak nearest to the centre gets the extra line. A short group drops the
//!   threshold again,
//! - below 0.1 the family is not found.
use super::THETA_STEP_DEG;
use crate::image::{ImageF32, ImageView, ImageViewMut};
use log::{debug, info, warn};
use std::ops::RangeInclusive;

const STEP: f32 = 0.05;
const FLOOR: f32 = 0.1;
/// Centroid half-window: rho, theta bins.
const CENTROID: (i64, i64) = (10, 5);
/// Cleared half-window around a peak, bins.
const MASK: i64 = 40;

/// Centroid of the hit at `(t, r)`; clears its neighbourhood.
fn save_peak(acc: &mut ImageF32, r: usize, t: usize) -> (f32, f32) {
    let (w, h) = (acc.width() as i64, acc.height() as i64);
    let (r, t) = (r as i64, t as i64);
    let (mut cx, mut cy, mut count) = (0.0f32, 0.0f32, 0.0f32);
    for ly in -CENTROID.0..=CENTROID.0 {
        let y = r + ly;
        if y < 0 || y >= h {
            continue;
        }
        let row = acc.row(y as usize);
        for lx in -CENTROID.1..=CENTROID.1 {
            let x = t + lx;
            if x < 0 || x >= w {
                continue;
            }
            let v = row[x as usize];
            cx += x as f32 * v;
            cy += y as f32 * v;
            count += v;
        }
    }
    if count > 0.0 {
        cx /= count;
        cy /= count;
    } else {
        (cx, cy) = (t as f32, r as f32);
    }
    cx -= 0.5;
    cy -= 0.5;

    let (icx, icy) = (cx as i64, cy as i64);
    for ly in -MASK..=MASK {
        let y = icy + ly;
        if y < 0 || y >= h {
            continue;
        }
        let row = acc.row_mut(y as usize);
        for lx in -MASK..=MASK {
            let x = icx + lx;
            if (0..w).contains(&x) {
                row[x as usize] = 0.0;
            }
        }
    }
    (cx, cy)
}

/// Upper/lower quota of a family from the distances sorted by `|d|`.
fn quotas(distance: &mut [(usize, i64)], n: usize) -> (usize, usize) {
    let hp = n / 2;
    let (mut upper, mut lower) = (hp, hp);
    let pick = if distance.len() > n {
        distance[..=n].sort_by(|a, b| b.1.cmp(&a.1));
        if distance[hp].1.abs() < distance[hp + 1].1.abs() {
            distance[hp].1
        } else {
            distance[hp + 1].1
        }
    } else {
        distance.sort_by(|a, b| b.1.cmp(&a.1));
        distance[hp].1
    };
    if pick < 0 {
        upper += 1;
    } else {
        lower += 1;
    }
    (upper, lower)
}

/// Peaks `(theta bin, rho bin)` of one family.
fn family_peaks(acc: &mut ImageF32, bins: RangeInclusive<usize>, n: usize, start: f32) -> Option<Vec<(i32, i32)>> {
    let height = acc.height();
    let half = (height / 2) as i64;
    let t_last = (*bins.end()).min(acc.width().saturating_sub(1));
    let t_first = *bins.start();

    let mut peaks: Vec<(i32, i32)> = Vec::new();
    let mut distance: Vec<(usize, i64)> = Vec::new();
    let mut found: Option<(usize, usize)> = None;

    for k in 0.. {
        let threshold = start - k as f32 * STEP;
        if threshold < FLOOR - 1e-6 {
            break;
        }
        for r in (0..height).rev() {
            for t in t_first..=t_last {
                if acc.row(r)[t] >= threshold {
                    let (cx, cy) = save_peak(acc, r, t);
                    distance.push((peaks.len(), cy as i64 - half));
                    peaks.push((cx as i32, cy as i32));
                }
            }
        }
        debug!("hough peaks: threshold {threshold:.2}, {} peaks", peaks.len());
        if peaks.len() < n {
            continue;
        }

        distance.sort_by_key(|d| d.1.abs());
        let (upper, lower) = quotas(&mut distance, n);
        let n_lower = distance.iter().filter(|d| d.1 >= 0).count();
        let n_upper = distance.len() - n_lower;
        debug!("hough peaks: need {upper} up / {lower} down, have {n_upper} / {n_lower}");
        if n_lower < lower || n_upper < upper {
            continue;
        }
        let leading = distance.iter().take_while(|d| d.1 >= 0).count();
        let surplus = leading.saturating_sub(lower);
        distance.drain(..surplus.min(distance.len()));
        info!("hough peaks: threshold detected {threshold:.2}");
        found = Some((upper, lower));
        break;
    }

    let Some((upper, lower)) = found else {
        warn!("hough peaks: {n} lines not found above {FLOOR}");
        return None;
    };
    let (mut n_up, mut n_down) = (0, 0);
    let mut selected = Vec::with_capacity(n);
    for &(index, _) in &distance {
        let p = peaks[index];
        if (p.1 as i64) < half {
            if n_up < upper {
                selected.push(p);
                n_up += 1;
            }
        } else if n_down < lower {
            selected.push(p);
            n_down += 1;
        }
        if selected.len() >= n {
            break;
        }
    }
    (selected.len() == n).then_some(selected)
}

/// Adaptive search for `n_peaks` lines, half per family, starting at
/// `start`. The first half of the result is the `[0°, 90°]` band.
///
/// The accumulator is consumed: found peaks are cleared and then marked
/// with 1.0.
pub fn adaptive_peaks(acc: &mut ImageF32, start: f32, n_peaks: usize) -> Option<Vec<(i32, i32)>> {
    let n = n_peaks / 2;
    if n == 0 {
        return None;
    }
    let band = |deg: f64| (deg / THETA_STEP_DEG) as usize;
    let mut peaks = family_peaks(acc, 0..=band(90.0), n, start)?;
    peaks.extend(family_peaks(acc, band(91.0)..=band(180.0), n, start)?);
    for &(x, y) in &peaks {
        if x >= 0 && y >= 0 && (x as usize) < acc.width() && (y as usize) < acc.height() {
            acc.set(x as usize, y as usize, 1.0);
        }
    }
    Some(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_peak_goes_to_its_side() {
        // three peaks below the centre line plus one above: the one nearest
        // the centre decides who gets the odd line
        let mut d: Vec<(usize, i64)> = vec![(0, 5), (1, -8), (2, 30), (3, 60)];
        d.sort_by_key(|x| x.1.abs());
        assert_eq!(quotas(&mut d, 3), (1, 2));
        assert_eq!(d[..3], [(3, 60), (2, 30), (0, 5)]);

        let mut d: Vec<(usize, i64)> = vec![(0, -5), (1, 8), (2, -30)];
        d.sort_by_key(|x| x.1.abs());
        assert_eq!(quotas(&mut d, 3), (2, 1));
    }

    #[test]
    fn save_peak_centroid_and_mask() {
        let mut acc = ImageF32::new_gray(100, 100);
        acc.set(50, 40, 1.0);
        acc.set(50, 41, 1.0);
        let (cx, cy) = save_peak(&mut acc, 41, 50);
        assert!((cx - 49.5).abs() < 1e-6);
        assert!((cy - 40.0).abs() < 1e-6);
        assert!(acc.samples().all(|v| v == 0.0));
    }

    #[test]
    fn isolated_cells_are_found_per_family() {
        let mut acc = ImageF32::new_gray(900, 1000);
        // first band: rows 300, 500, 700
        for r in [300, 500, 700] {
            acc.set(375, r, 1.0);
        }
        // second band
        for r in [200, 501, 800] {
            acc.set(825, r, 0.6);
        }
        let peaks = adaptive_peaks(&mut acc, 0.5, 6).unwrap();
        assert_eq!(peaks.len(), 6);
        assert!(peaks[..3].iter().all(|p| p.0 == 374));
        assert!(peaks[3..].iter().all(|p| p.0 == 824));
        let mut rows: Vec<i32> = peaks[..3].iter().map(|p| p.1).collect();
        rows.sort();
        assert_eq!(rows, vec![299, 499, 699]);
    }
}
