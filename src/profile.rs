//! Edge profile: an ordered integer polyline in image pixels plus the marker
//! lists produced by model fitting (anchors, model points, distance points).
use serde::{Deserialize, Serialize};

/// Integer pixel position on the image plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance in pixels.
    #[inline]
    pub fn dist2(self, other: PixelPoint) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn to_f64(self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

impl From<(i32, i32)> for PixelPoint {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Edge points in extraction order (top to bottom)
    pub points: Vec<PixelPoint>,
    /// Upper and lower maxima used to seed the model search
    pub anchors: Vec<PixelPoint>,
    /// Fitted model vertices projected on the image plane
    pub model_points: Vec<PixelPoint>,
    /// End points of the D measure on the image plane
    pub distance_points: Vec<PixelPoint>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            points: Vec::with_capacity(n),
            ..Self::default()
        }
    }

    pub fn from_points(points: Vec<PixelPoint>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn push(&mut self, x: i32, y: i32) {
        self.points.push(PixelPoint::new(x, y));
    }

    #[inline]
    pub fn first(&self) -> Option<PixelPoint> {
        self.points.first().copied()
    }

    #[inline]
    pub fn last(&self) -> Option<PixelPoint> {
        self.points.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PixelPoint> {
        self.points.iter()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.anchors.clear();
        self.model_points.clear();
        self.distance_points.clear();
    }

    /// Horizontal extent `(min_x, max_x)` of the main polyline.
    pub fn x_range(&self) -> Option<(i32, i32)> {
        let min = self.points.iter().map(|p| p.x).min()?;
        let max = self.points.iter().map(|p| p.x).max()?;
        Some((min, max))
    }

    /// Per-row lookup table: `table[y]` is the x of the last point on row `y`.
    pub fn row_table(&self, height: usize) -> Vec<Option<i32>> {
        let mut table = vec![None; height];
        for p in &self.points {
            if p.y >= 0 && (p.y as usize) < height {
                table[p.y as usize] = Some(p.x);
            }
        }
        table
    }

    /// Points as `[x, y]` floating pairs.
    pub fn to_f64(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(|p| p.to_f64()).collect()
    }
}
