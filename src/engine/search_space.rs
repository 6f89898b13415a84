//! Bevel maxima on an edge profile.
//!
//! The profile runs top to bottom with the bevel tip pointing left (smaller
//! x). Slopes are sampled as `dx/dy` between points `offset` indices apart:
//! - upper maximum: first steep negative slope in the top half, then walked
//!   back up to where the slope flattens above `-upThresholdRef`,
//! - lower maximum: first steep positive slope from the bottom, then walked
//!   down while the slope stays above `loThresholdRef`,
//! - minimum: the leftmost point between them.
//!
//! A threshold that finds nothing is relaxed by a tenth of its start value,
//! at most six times.
use crate::config::ReferencePoints;
use crate::profile::{PixelPoint, Profile};
use log::{debug, warn};

const MAX_PASSES: usize = 6;

/// Corners and tip of the bevel on the profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchPoints {
    pub upper: PixelPoint,
    pub lower: PixelPoint,
    pub minimum: PixelPoint,
    /// Profile index of `upper`
    pub upper_index: usize,
    /// Profile index of `lower`
    pub lower_index: usize,
}

/// `dx/dy` from `a` to `b`, `None` on the same row.
#[inline]
fn slope(a: PixelPoint, b: PixelPoint) -> Option<f64> {
    let dy = (b.y - a.y) as f64;
    if dy.abs() < 1.0 {
        return None;
    }
    Some((b.x - a.x) as f64 / dy)
}

fn upper_maximum(p: &[PixelPoint], offset: usize, refs: &ReferencePoints) -> Option<usize> {
    let n = p.len();
    let half = (n + 1) / 2;
    let step = refs.up_threshold / 10.0;
    let mut threshold = refs.up_threshold;

    for _ in 0..MAX_PASSES {
        let hit = (0..half.saturating_sub(offset))
            .filter(|&i| i + offset < n)
            .find(|&i| slope(p[i], p[i + offset]).is_some_and(|dx| dx <= -threshold));
        let Some(i) = hit else {
            threshold -= step;
            debug!("search space: upper threshold relaxed to {threshold:.3}");
            continue;
        };
        let mut index = i + offset / 2;
        for j in (offset..=index.min(n - 1)).rev() {
            if slope(p[j], p[j - offset]).is_some_and(|dx| dx >= -refs.up_threshold_ref) {
                index = j - offset / 2;
                break;
            }
        }
        return Some(index.min(n - 1));
    }
    None
}

fn lower_maximum(p: &[PixelPoint], offset: usize, refs: &ReferencePoints) -> Option<usize> {
    let n = p.len();
    let half = (n + 1) / 2;
    let step = refs.lo_threshold / 10.0;
    let mut threshold = refs.lo_threshold;
    let first = half.saturating_sub(offset).max(offset);

    for _ in 0..MAX_PASSES {
        let hit = (first..n)
            .rev()
            .find(|&i| slope(p[i - offset], p[i]).is_some_and(|dx| dx >= threshold));
        let Some(i) = hit else {
            threshold -= step;
            debug!("search space: lower threshold relaxed to {threshold:.3}");
            continue;
        };
        let mut index = i - offset / 2;
        for j in index..n.saturating_sub(offset) {
            if slope(p[j + offset], p[j]).is_some_and(|dx| dx >= refs.lo_threshold_ref) {
                index = j + offset / 2;
                break;
            }
        }
        return Some(index.min(n - 1));
    }
    None
}

/// Locate the bevel corners and tip; `None` when either corner is missing.
///
/// Complexity: O(N) per pass.
pub fn search_space(profile: &Profile, refs: &ReferencePoints) -> Option<SearchPoints> {
    let p = &profile.points;
    let offset = refs.offset.max(1);
    if p.len() <= offset {
        warn!("search space: profile of {} points is too short", p.len());
        return None;
    }
    let Some(upper_index) = upper_maximum(p, offset, refs) else {
        warn!("search space: upper maximum not found");
        return None;
    };
    let Some(lower_index) = lower_maximum(p, offset, refs) else {
        warn!("search space: lower maximum not found");
        return None;
    };

    let mut minimum = p[upper_index];
    for &q in p.iter().take(lower_index).skip(upper_index) {
        if q.x < minimum.x {
            minimum = q;
        }
    }
    debug!(
        "search space: upper {:?} @ {upper_index}, lower {:?} @ {lower_index}, minimum {minimum:?}",
        p[upper_index], p[lower_index]
    );
    Some(SearchPoints {
        upper: p[upper_index],
        lower: p[lower_index],
        minimum,
        upper_index,
        lower_index,
    })
}
