//! Mini bevel: a symmetric triangular bevel between two shoulders.
//!
//! ```text
//!   p0 ── p1
//!          \
//!           p2   (tip, B = tan(90° - angle)/2 · M from the flank midpoint)
//!          /
//!   p4 ── p3
//! ```
//!
//! Free parameters `[x1, y1, alpha, M]`: the upper flank point on the object
//! plane, the flank orientation and the flank height.
use super::{flank, from_pixel, normal, project_on_line, to_pixel, BevelModel, ModelCore, ModelType};
use crate::profile::PixelPoint;
use crate::transform::ScheimpflugTransform;
use nalgebra::Vector2;

/// Shoulder length in pixels.
pub const SHOULDER_PX: f64 = 120.0;

/// `tan(90° - angle) / 2`, the tip depth per unit of flank height.
#[inline]
pub fn half_tan(angle_deg: f64) -> f64 {
    (90.0 - angle_deg).to_radians().tan() / 2.0
}

#[derive(Clone, Debug)]
pub(crate) struct MiniGeometry {
    /// `p0..p4`
    pub points: Vec<Vector2<f64>>,
    pub mid: Vector2<f64>,
    pub b: f64,
}

pub(crate) fn mini_geometry(v: &[f64], shoulder: f64, tan_delta: f64) -> Option<MiniGeometry> {
    let &[x1, y1, alpha, m] = v.get(..4)? else {
        return None;
    };
    if !(x1.is_finite() && y1.is_finite() && alpha.is_finite() && m.is_finite()) {
        return None;
    }
    let p1 = Vector2::new(x1, y1);
    let f = flank(alpha);
    let p0 = p1 - f * shoulder;
    let p3 = p1 + f * m;
    let p4 = p3 + f * shoulder;
    let mid = (p1 + p3) / 2.0;
    let b = tan_delta * m;
    let p2 = mid + normal(alpha) * b;
    Some(MiniGeometry {
        points: vec![p0, p1, p2, p3, p4],
        mid,
        b,
    })
}

/// Accept the optimum and derive D, B* and the distance markers.
pub(crate) fn finalize_mini(core: &mut ModelCore, v: &[f64], geometry: MiniGeometry, last: PixelPoint) -> bool {
    let shoulder_len = (geometry.points[1] - geometry.points[0]).norm();
    if !core.apply(v, geometry.points.clone(), None) {
        return false;
    }
    let t = core.transform();
    let pts = &geometry.points;
    let mid_img = t.object_to_image(geometry.mid, true);
    let last_obj = t.image_to_object(from_pixel(last));
    let foot = project_on_line(last_obj, pts[3], pts[4]);
    let d = (foot - geometry.mid).norm();
    let foot_img = t.object_to_image(foot, true);

    let tip_img = core.image_points()[2];
    let b_star = core
        .nearest_profile_point(mid_img, tip_img)
        .map(|p| (t.image_to_object(from_pixel(p)) - geometry.mid).norm())
        .unwrap_or(0.0);

    core.distance_points = vec![to_pixel(mid_img), to_pixel(foot_img)];
    let measures = &mut core.measures;
    measures.clear();
    measures.insert("A".into(), shoulder_len);
    measures.insert("B".into(), geometry.b);
    measures.insert("C".into(), shoulder_len);
    measures.insert("D".into(), d);
    measures.insert("M".into(), v[3]);
    measures.insert("B*".into(), b_star);
    true
}

/// Frame quantities compared against a reference frame during calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TestMeasures {
    pub b: f64,
    pub m: f64,
    /// Angle between the upper flank and the tip axis, degrees
    pub angle1: f64,
    /// Angle between the tip axis and the lower flank, degrees
    pub angle2: f64,
}

/// Angle in degrees between two lines given by direction vectors.
fn line_angle(a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    let a = if a.x < 0.0 { -a } else { a };
    let b = if b.x < 0.0 { -b } else { b };
    let cross = a.x * b.y - a.y * b.x;
    cross.atan2(a.dot(&b)).abs().to_degrees()
}

impl TestMeasures {
    /// From object-plane vertices `p0..p4`.
    pub fn from_object_points(obj: &[Vector2<f64>]) -> Option<Self> {
        let [_, p1, p2, p3, ..] = obj else {
            return None;
        };
        let mid = (p1 + p3) / 2.0;
        Some(Self {
            b: (mid - p2).norm(),
            m: (p1 - p3).norm(),
            angle1: line_angle(p2 - p1, p2 - mid),
            angle2: line_angle(p2 - mid, p2 - p3),
        })
    }

    /// From image-plane vertices projected through `transform`.
    pub fn from_image_points(transform: &ScheimpflugTransform, img: &[Vector2<f64>]) -> Option<Self> {
        let obj: Vec<_> = img.iter().map(|&p| transform.image_to_object(p)).collect();
        Self::from_object_points(&obj)
    }
}

#[derive(Clone, Debug)]
pub struct MiniBevel {
    core: ModelCore,
    shoulder: f64,
    tan_delta: f64,
}

impl MiniBevel {
    /// Model with a fixed bevel `angle` in degrees.
    pub fn new(core: ModelCore, angle: f64) -> Self {
        let shoulder = core.transform().pixel_to_mm(SHOULDER_PX);
        Self {
            core,
            shoulder,
            tan_delta: half_tan(angle),
        }
    }

    #[inline]
    pub fn shoulder(&self) -> f64 {
        self.shoulder
    }

    /// Adopt known image vertices `p0..p4` (e.g. a reference frame drawn on
    /// the image) and recover `[x1, y1, alpha, M]` from them.
    pub fn set_from_img_points(&mut self, img: &[Vector2<f64>]) -> Option<TestMeasures> {
        if img.len() < 5 {
            return None;
        }
        let obj = self.core.apply_image_points(img);
        let (p1, p3) = (obj[1], obj[3]);
        let alpha = (p3.x - p1.x).atan2(p1.y - p3.y);
        let m = (p1 - p3).norm();
        self.core.params = vec![p1.x, p1.y, alpha, m];
        TestMeasures::from_object_points(&obj)
    }

    /// Frame quantities of the current state.
    pub fn test_measures(&self) -> Option<TestMeasures> {
        TestMeasures::from_object_points(self.core.object_points())
    }
}

impl BevelModel for MiniBevel {
    fn model_type(&self) -> ModelType {
        ModelType::MiniBevel
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn object_points(&self, v: &[f64]) -> Option<Vec<Vector2<f64>>> {
        mini_geometry(v, self.shoulder, self.tan_delta).map(|g| g.points)
    }

    fn finalize(&mut self, v: &[f64], last: PixelPoint) -> bool {
        match mini_geometry(v, self.shoulder, self.tan_delta) {
            Some(geometry) => finalize_mini(&mut self.core, v, geometry, last),
            None => {
                self.core.reject(v);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::tests::{core_for, vertical_profile};
    use approx::assert_abs_diff_eq;

    /// `[x1, y1, alpha, M]` of a flank running between two image points.
    pub(crate) fn flank_vector(core: &ModelCore, top: (f64, f64), bottom: (f64, f64)) -> [f64; 4] {
        let t = core.transform();
        let p1 = t.image_to_object(Vector2::new(top.0, top.1));
        let p3 = t.image_to_object(Vector2::new(bottom.0, bottom.1));
        [p1.x, p1.y, (p3.x - p1.x).atan2(p1.y - p3.y), (p1 - p3).norm()]
    }

    #[test]
    fn tip_depth_follows_the_angle() {
        let profile = vertical_profile(50, 100..400);
        let model = MiniBevel::new(core_for(&profile), 55.0);
        let v = [0.1, -0.2, 0.05, 2.0];
        let g = mini_geometry(&v, model.shoulder(), half_tan(55.0)).unwrap();
        assert_abs_diff_eq!((g.points[1] - g.points[3]).norm(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!((g.points[2] - g.mid).norm(), half_tan(55.0) * 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!((g.points[0] - g.points[1]).norm(), model.shoulder(), epsilon = 1e-12);
        assert!(mini_geometry(&[0.0, 0.0, f64::NAN, 1.0], 1.0, 0.3).is_none());
        assert!(mini_geometry(&[0.0, 0.0], 1.0, 0.3).is_none());
    }

    #[test]
    fn test_measures_recover_the_frame_angles() {
        let g = mini_geometry(&[0.0, 0.0, 0.12, 2.0], 0.5, half_tan(55.0)).unwrap();
        let tm = TestMeasures::from_object_points(&g.points).unwrap();
        assert_abs_diff_eq!(tm.m, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tm.b, g.b, epsilon = 1e-12);
        assert_abs_diff_eq!(tm.angle1, 55.0, epsilon = 1e-9);
        assert_abs_diff_eq!(tm.angle2, 55.0, epsilon = 1e-9);
    }

    #[test]
    fn image_points_round_trip() {
        let profile = vertical_profile(50, 100..400);
        let mut model = MiniBevel::new(core_for(&profile), 55.0);
        let v = flank_vector(model.core(), (320.0, 200.0), (320.0, 350.0));
        let obj = model.object_points(&v).unwrap();
        let img: Vec<_> = obj.iter().map(|&p| model.core().transform().object_to_image(p, false)).collect();
        let tm = model.set_from_img_points(&img).unwrap();
        assert_abs_diff_eq!(tm.m, v[3], epsilon = 1e-6);
        assert_abs_diff_eq!(model.core().params()[2], v[2], epsilon = 1e-6);
        assert_abs_diff_eq!(tm.angle1, 55.0, epsilon = 1e-6);
        assert!(model.set_from_img_points(&img[..3]).is_none());
    }

    #[test]
    fn finalize_fills_measures_and_markers() {
        let profile = vertical_profile(50, 100..400);
        let mut model = MiniBevel::new(core_for(&profile), 55.0);
        let v = flank_vector(model.core(), (320.0, 200.0), (320.0, 350.0));
        assert!(model.evaluate(&v) < crate::model::INFEASIBLE_COST);
        assert!(model.finalize(&v, PixelPoint::new(50, 399)));
        let m = model.measures();
        for key in ["A", "B", "C", "D", "M", "B*"] {
            assert!(m[key].is_finite(), "{key}");
        }
        assert_abs_diff_eq!(m["M"], v[3], epsilon = 1e-12);
        assert!(m["B*"] > 0.0);
        assert_eq!(model.core().distance_points().len(), 2);
        let bevel = model.bevel();
        assert_eq!(bevel.model_points.len(), 5);
        assert!(!bevel.is_empty());
    }
}
