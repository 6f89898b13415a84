//! Custom bevel: asymmetric bevel with a front step and a flat top.
//!
//! Free parameters `[x1, y1, x5, y5, alpha, M, S, E]`:
//! - `p1`, `p5`: where the bevel leaves the upper and lower shoulders,
//! - `S`: front step, `E`: flat top length, `M`: total height.
//!
//! The remaining vertices follow from a 60° rear flank: with
//! `d = |p2 - p5|` and `beta = acos(M / d)`, the front height is
//! `D = (M - E - d·sin(beta)) / (1 + tan 60°)` and the bevel depth
//! `B = D + d·sin(beta)`. `M > d` has no solution and is infeasible.
use super::{flank, normal, to_pixel, BevelModel, ModelCore, ModelType};
use crate::profile::PixelPoint;
use nalgebra::Vector2;

pub const SHOULDER_PX: f64 = 80.0;
const REAR_FLANK_DEG: f64 = 60.0;

struct CustomGeometry {
    /// `p0..p6`
    points: Vec<Vector2<f64>>,
    mid: Vector2<f64>,
    b: f64,
    d: f64,
}

#[derive(Clone, Debug)]
pub struct CustomBevel {
    core: ModelCore,
    shoulder: f64,
    tan_rear: f64,
}

impl CustomBevel {
    pub fn new(core: ModelCore) -> Self {
        let shoulder = core.transform().pixel_to_mm(SHOULDER_PX);
        Self {
            core,
            shoulder,
            tan_rear: REAR_FLANK_DEG.to_radians().tan(),
        }
    }

    fn geometry(&self, v: &[f64]) -> Option<CustomGeometry> {
        let &[x1, y1, x5, y5, alpha, m, s, e] = v.get(..8)? else {
            return None;
        };
        if v[..8].iter().any(|c| !c.is_finite()) {
            return None;
        }
        let (p1, p5) = (Vector2::new(x1, y1), Vector2::new(x5, y5));
        let f = flank(alpha);
        let n = normal(alpha);
        let p0 = p1 - f * self.shoulder;
        let p6 = p5 + f * self.shoulder;
        let p2 = p1 + n * s;

        let d25 = (p2 - p5).norm();
        let beta = (m / d25).acos();
        if beta.is_nan() {
            return None;
        }
        let delta_h = d25 * beta.sin();
        let d = (m - e - delta_h) / (1.0 + self.tan_rear);
        let b = d + delta_h;

        let mid = p2 + f * b;
        let p3 = mid + n * b;
        let p4 = p3 + f * e;
        Some(CustomGeometry {
            points: vec![p0, p1, p2, p3, p4, p5, p6],
            mid,
            b,
            d,
        })
    }
}

impl BevelModel for CustomBevel {
    fn model_type(&self) -> ModelType {
        ModelType::CustomBevel
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn object_points(&self, v: &[f64]) -> Option<Vec<Vector2<f64>>> {
        self.geometry(v).map(|g| g.points)
    }

    fn finalize(&mut self, v: &[f64], _last: PixelPoint) -> bool {
        let Some(g) = self.geometry(v) else {
            self.core.reject(v);
            return false;
        };
        if !self.core.apply(v, g.points, None) {
            return false;
        }
        let mid_img = self.core.transform().object_to_image(g.mid, true);
        self.core.distance_points = vec![to_pixel(mid_img)];

        let (s, e) = (v[6], v[7]);
        let measures = &mut self.core.measures;
        measures.clear();
        measures.insert("A".into(), self.shoulder);
        measures.insert("C".into(), self.shoulder);
        measures.insert("D".into(), g.d);
        measures.insert("E".into(), e);
        measures.insert("F".into(), g.b + s);
        measures.insert("G".into(), e + g.b);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{core_for, vertical_profile};
    use crate::model::INFEASIBLE_COST;
    use approx::assert_abs_diff_eq;

    #[test]
    fn vertices_follow_the_rear_flank() {
        let model = CustomBevel::new(core_for(&vertical_profile(50, 100..400)));
        // |p2 - p5| = sqrt(10), so the rear offset d·sin(beta) is exactly 1
        let g = model
            .geometry(&[0.0, 0.0, 0.0, -3.0, 0.0, 3.0, 1.0, 0.5])
            .unwrap();
        let d = (3.0 - 0.5 - 1.0) / (1.0 + 60f64.to_radians().tan());
        assert_abs_diff_eq!(g.d, d, epsilon = 1e-12);
        assert_abs_diff_eq!(g.b, d + 1.0, epsilon = 1e-12);
        let p = &g.points;
        assert_eq!(p.len(), 7);
        assert_abs_diff_eq!(p[2].x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[3].x, 1.0 + g.b, epsilon = 1e-12);
        assert_abs_diff_eq!(p[3].y, -g.b, epsilon = 1e-12);
        assert_abs_diff_eq!((p[4] - p[3]).norm(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn unreachable_height_is_infeasible() {
        let model = CustomBevel::new(core_for(&vertical_profile(50, 100..400)));
        let v = [0.0, 0.0, 0.0, -3.0, 0.0, 4.0, 1.0, 0.5];
        assert!(model.object_points(&v).is_none());
        assert_eq!(model.evaluate(&v), INFEASIBLE_COST);
        assert_eq!(model.evaluate(&v[..7]), INFEASIBLE_COST);
    }
}
