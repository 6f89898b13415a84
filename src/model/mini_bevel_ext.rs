//! Mini bevel with a free bevel angle: `[x1, y1, alpha, M, angle]`, where
//! `angle` (degrees) is half the opening `beta` of the bevel tip.
use super::mini_bevel::{finalize_mini, half_tan, mini_geometry, SHOULDER_PX};
use super::{BevelModel, ModelCore, ModelType};
use crate::profile::PixelPoint;
use nalgebra::Vector2;

#[derive(Clone, Debug)]
pub struct MiniBevelExt {
    core: ModelCore,
    shoulder: f64,
}

impl MiniBevelExt {
    pub fn new(core: ModelCore) -> Self {
        let shoulder = core.transform().pixel_to_mm(SHOULDER_PX);
        Self { core, shoulder }
    }

    fn geometry(&self, v: &[f64]) -> Option<super::mini_bevel::MiniGeometry> {
        let angle = *v.get(4)?;
        if !angle.is_finite() {
            return None;
        }
        mini_geometry(v, self.shoulder, half_tan(angle))
    }
}

impl BevelModel for MiniBevelExt {
    fn model_type(&self) -> ModelType {
        ModelType::MiniBevelExt
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

    fn finalize(&mut self, v: &[f64], last: PixelPoint) -> bool {
        let Some(geometry) = self.geometry(v) else {
            self.core.reject(v);
            return false;
        };
        if !finalize_mini(&mut self.core, v, geometry, last) {
            return false;
        }
        self.core.measures.insert("beta".into(), 2.0 * v[4]);
        true
    }
}
