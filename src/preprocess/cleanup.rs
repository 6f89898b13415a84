//! Profile cleanup: index-window density filter and sliding smoothers.
use crate::profile::{PixelPoint, Profile};
use serde::{Deserialize, Serialize};

/// Horizontal span beyond which a neighbour gets zero smoothing weight.
pub const SMOOTHING_SPAN_PX: f32 = 20.0;

/// Settings section `profile_cleanup`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupParams {
    /// Neighbour radius in pixels (strict).
    pub distance_threshold: f32,
    /// Index half-window of the density filter.
    pub window_size: usize,
    /// Neighbours (self included) required to keep a point.
    pub counter_threshold: usize,
    /// Half window of the smoothing pass.
    pub filtering_half_window_size: usize,
}

impl Default for CleanupParams {
    fn default() -> Self {
        Self {
            distance_threshold: 5.0,
            window_size: 3,
            counter_threshold: 4,
            filtering_half_window_size: 3,
        }
    }
}

#[inline]
fn window(n: usize, half: usize, len: usize) -> std::ops::Range<usize> {
    n.saturating_sub(half)..(n + half + 1).min(len)
}

/// Keep a point only when at least `counter` points with index in
/// `[i - window, i + window]` (itself included) lie strictly closer than
/// `distance` pixels.
pub fn remove_isolated_points(profile: &Profile, distance: f32, window_size: usize, counter: usize) -> Profile {
    let points = &profile.points;
    let limit = distance * distance;
    let kept = points
        .iter()
        .enumerate()
        .filter(|&(i, &p)| {
            let close = points[window(i, window_size, points.len())]
                .iter()
                .filter(|&&q| (p.dist2(q) as f32) < limit)
                .count();
            close >= counter
        })
        .map(|(_, &p)| p)
        .collect();
    Profile::from_points(kept)
}

/// Flat sliding average of x and y over `[i - w, i + w]`.
pub fn filter_profile_with_interpolation(profile: &Profile, half_window: usize) -> Profile {
    let points = &profile.points;
    let smoothed = (0..points.len())
        .map(|i| {
            let neighbours = &points[window(i, half_window, points.len())];
            let n = neighbours.len() as f32;
            let sx: i64 = neighbours.iter().map(|p| p.x as i64).sum();
            let sy: i64 = neighbours.iter().map(|p| p.y as i64).sum();
            PixelPoint::new((sx as f32 / n) as i32, (sy as f32 / n) as i32)
        })
        .collect();
    Profile::from_points(smoothed)
}

/// Distance-weighted sliding average that never invents rows.
///
/// Neighbours get weight `max(0, 1 - |dx| / 20)`; a smoothed point is dropped
/// when its row was not present in the input profile.
pub fn filter_profile(profile: &Profile, half_window: usize, height: usize) -> Profile {
    let points = &profile.points;
    let rows = profile.row_table(height);
    let mut out = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        let mut sum_w = 0.0f32;
        let mut sum_x = 0.0f32;
        let mut sum_y = 0.0f32;
        for q in &points[window(i, half_window, points.len())] {
            let w = (1.0 - ((p.x - q.x) as f32 / SMOOTHING_SPAN_PX).abs()).max(0.0);
            sum_w += w;
            sum_x += q.x as f32 * w;
            sum_y += q.y as f32 * w;
        }
        // self always contributes weight 1
        let x = (sum_x / sum_w) as i32;
        let y = (sum_y / sum_w) as i32;
        if y >= 0 && (y as usize) < height && rows[y as usize].is_some() {
            out.push(PixelPoint::new(x, y));
        }
    }
    Profile::from_points(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with_spikes() -> Profile {
        let mut profile = Profile::new();
        for y in 0..60 {
            profile.push(200 + y / 10, y);
            if y == 20 || y == 41 {
                profile.push(40, y);
            }
        }
        profile
    }

    #[test]
    fn isolated_spikes_are_removed() {
        let src = line_with_spikes();
        let clean = remove_isolated_points(&src, 5.0, 3, 4);
        assert_eq!(clean.len(), 60);
        assert!(clean.iter().all(|p| p.x >= 200));
    }

    #[test]
    fn remove_isolated_points_reaches_fixed_point() {
        let src = line_with_spikes();
        let once = remove_isolated_points(&src, 5.0, 3, 4);
        let twice = remove_isolated_points(&once, 5.0, 3, 4);
        let thrice = remove_isolated_points(&twice, 5.0, 3, 4);
        assert_eq!(once, twice);
        assert_eq!(twice, thrice);
    }

    #[test]
    fn interpolation_smooths_single_outlier() {
        let mut profile = Profile::new();
        for y in 0..11 {
            profile.push(if y == 5 { 107 } else { 100 }, y);
        }
        let out = filter_profile_with_interpolation(&profile, 3);
        assert_eq!(out.len(), 11);
        assert_eq!(out.points[5], PixelPoint::new(101, 5));
        assert_eq!(out.points[0], PixelPoint::new(100, 1));
    }

    #[test]
    fn weighted_filter_ignores_far_neighbours_and_keeps_rows() {
        let mut profile = Profile::new();
        for y in 10..30 {
            profile.push(if y == 20 { 300 } else { 100 }, y);
        }
        let out = filter_profile(&profile, 2, 64);
        let p20 = out.iter().find(|p| p.y == 20).unwrap();
        assert_eq!(p20.x, 300);
        assert!(out.iter().all(|p| (10..30).contains(&p.y)));
        // both points average onto row 2, which the input never had
        let mut gappy = Profile::new();
        gappy.push(50, 0);
        gappy.push(50, 4);
        assert!(filter_profile(&gappy, 1, 8).is_empty());
    }
}
