//! T bevel: a rectangular groove of depth `B` and width `M`.
//!
//! Vertices `p0..p5`; the groove bottom `p3 -> p4` closes the polyline but
//! is not scored, since the profile never reaches into the groove.
use super::{flank, from_pixel, normal, project_on_line, to_pixel, BevelModel, ModelCore, ModelType};
use crate::profile::PixelPoint;
use nalgebra::Vector2;

pub const SHOULDER_PX: f64 = 80.0;
const GROOVE_SEGMENT: usize = 3;

#[derive(Clone, Debug)]
pub struct TBevel {
    core: ModelCore,
    shoulder: f64,
    shrink_m: f64,
    shrink_b: f64,
}

impl TBevel {
    /// `shrink_m` narrows the reported groove on both sides, `shrink_b`
    /// reduces the reported depth.
    pub fn new(core: ModelCore, shrink_m: f64, shrink_b: f64) -> Self {
        let shoulder = core.transform().pixel_to_mm(SHOULDER_PX);
        Self {
            core,
            shoulder,
            shrink_m,
            shrink_b,
        }
    }

    fn points(&self, v: &[f64]) -> Option<Vec<Vector2<f64>>> {
        let &[x1, y1, alpha, m, b] = v.get(..5)? else {
            return None;
        };
        if v[..5].iter().any(|c| !c.is_finite()) {
            return None;
        }
        let p1 = Vector2::new(x1, y1);
        let f = flank(alpha);
        let p0 = p1 - f * self.shoulder;
        let p2 = p1 + normal(alpha) * b;
        let p3 = p2 + f * m;
        let p4 = p1 + f * m;
        let p5 = p4 + f * self.shoulder;
        Some(vec![p0, p1, p2, p3, p4, p5])
    }
}

impl BevelModel for TBevel {
    fn model_type(&self) -> ModelType {
        ModelType::TBevel
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn object_points(&self, v: &[f64]) -> Option<Vec<Vector2<f64>>> {
        self.points(v)
    }

    fn ignored_segment(&self) -> Option<usize> {
        Some(GROOVE_SEGMENT)
    }

    fn finalize(&mut self, v: &[f64], last: PixelPoint) -> bool {
        if v.len() < 5 {
            self.core.reject(v);
            return false;
        }
        let f = flank(v[2]);
        let p1 = Vector2::new(v[0], v[1]) + f * self.shrink_m;
        let shrunk = [p1.x, p1.y, v[2], v[3] - 2.0 * self.shrink_m, v[4] - self.shrink_b];
        let Some(pts) = self.points(&shrunk) else {
            self.core.reject(v);
            return false;
        };
        if !self.core.apply(&shrunk, pts.clone(), Some(GROOVE_SEGMENT)) {
            return false;
        }

        let t = self.core.transform();
        let mid = (pts[1] + pts[4]) / 2.0;
        let mid_img = t.object_to_image(mid, true);
        let last_obj = t.image_to_object(from_pixel(last));
        let foot = project_on_line(last_obj, pts[4], pts[5]);
        let d = (foot - mid).norm();
        let foot_img = t.object_to_image(foot, true);

        self.core.distance_points = vec![to_pixel(mid_img), to_pixel(foot_img)];
        let measures = &mut self.core.measures;
        measures.clear();
        measures.insert("A".into(), self.shoulder);
        measures.insert("B".into(), shrunk[4]);
        measures.insert("C".into(), self.shoulder);
        measures.insert("D".into(), d);
        measures.insert("M".into(), shrunk[3]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mini_bevel::tests::flank_vector;
    use crate::model::tests::{core_for, vertical_profile};
    use approx::assert_abs_diff_eq;

    #[test]
    fn groove_geometry() {
        let profile = vertical_profile(50, 100..400);
        let model = TBevel::new(core_for(&profile), 0.0, 0.0);
        let pts = model.object_points(&[0.0, 0.0, 0.2, 1.5, 0.4]).unwrap();
        assert_eq!(pts.len(), 6);
        assert_abs_diff_eq!((pts[1] - pts[4]).norm(), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!((pts[2] - pts[3]).norm(), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!((pts[1] - pts[2]).norm(), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!((pts[3] - pts[4]).norm(), 0.4, epsilon = 1e-12);
        assert_eq!(model.ignored_segment(), Some(3));
    }

    #[test]
    fn finalize_applies_shrink_offsets() {
        let profile = vertical_profile(50, 100..400);
        let mut model = TBevel::new(core_for(&profile), 0.05, 0.02);
        let [x1, y1, a, m] = flank_vector(model.core(), (320.0, 200.0), (320.0, 340.0));
        let b = model.core().transform().pixel_to_mm(30.0);
        assert!(model.finalize(&[x1, y1, a, m, b], PixelPoint::new(50, 399)));
        let measures = model.measures();
        assert_abs_diff_eq!(measures["M"], m - 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(measures["B"], b - 0.02, epsilon = 1e-12);
        assert!(measures["D"].is_finite());
        assert_abs_diff_eq!(model.core().params()[3], m - 0.1, epsilon = 1e-12);
    }
}
