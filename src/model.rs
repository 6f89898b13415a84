//! Parametric bevel models fitted to an edge profile.
//!
//! A model turns a free-parameter vector into a polyline on the object plane
//! (mm). The polyline is projected through the Scheimpflug transform,
//! rasterized over a [`LossField`] and scored; the optimizer only ever sees
//! [`BevelModel::evaluate`]. Geometric infeasibility is reported inside the
//! cost as [`INFEASIBLE_COST`].
//!
//! Models:
//! - [`MiniBevel`]: `x1, y1, alpha, M`, fixed bevel angle.
//! - [`MiniBevelExt`]: as above with the bevel angle free.
//! - [`TBevel`]: `x1, y1, alpha, M, B`.
//! - [`CustomBevel`]: `x1, y1, x5, y5, alpha, M, S, E`.
pub mod custom_bevel;
pub mod loss_field;
pub mod mini_bevel;
pub mod mini_bevel_ext;
pub mod t_bevel;

pub use custom_bevel::CustomBevel;
pub use loss_field::{LossField, LossFieldParams};
pub use mini_bevel::{MiniBevel, TestMeasures};
pub use mini_bevel_ext::MiniBevelExt;
pub use t_bevel::TBevel;

use crate::profile::{PixelPoint, Profile};
use crate::transform::ScheimpflugTransform;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named lengths (mm) and angles (degrees) of a fitted model.
pub type Measures = BTreeMap<String, f64>;

/// Cost of a parameter vector that does not describe a bevel.
pub const INFEASIBLE_COST: f64 = 1e10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    MiniBevel,
    TBevel,
    CustomBevel,
    MiniBevelExt,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::MiniBevel,
        ModelType::TBevel,
        ModelType::CustomBevel,
        ModelType::MiniBevelExt,
    ];

    /// Slot of this model in the per-model `pso` / `search_space` settings.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            ModelType::MiniBevel => 0,
            ModelType::TBevel => 1,
            ModelType::CustomBevel => 2,
            ModelType::MiniBevelExt => 3,
        }
    }

    /// Length of the free-parameter vector.
    #[inline]
    pub fn n_params(self) -> usize {
        match self {
            ModelType::MiniBevel => 4,
            ModelType::TBevel | ModelType::MiniBevelExt => 5,
            ModelType::CustomBevel => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelType::MiniBevel => "mini_bevel",
            ModelType::TBevel => "t_bevel",
            ModelType::CustomBevel => "custom_bevel",
            ModelType::MiniBevelExt => "mini_bevel_ext",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelType {
    type Err = String;

    /// Accepts the index, `mini_bevel`, `MiniBevel`, `minibevel`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "0" | "minibevel" => Ok(ModelType::MiniBevel),
            "1" | "tbevel" => Ok(ModelType::TBevel),
            "2" | "custombevel" => Ok(ModelType::CustomBevel),
            "3" | "minibevelext" => Ok(ModelType::MiniBevelExt),
            _ => Err(format!("Unknown model type '{s}'")),
        }
    }
}

/// Score of one parameter vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    /// Intersections within the configured threshold
    pub valid: bool,
    pub covered: usize,
    pub intersections: usize,
}

impl Evaluation {
    pub const INFEASIBLE: Evaluation = Evaluation {
        loss: INFEASIBLE_COST,
        valid: false,
        covered: 0,
        intersections: 0,
    };
}

impl Default for Evaluation {
    fn default() -> Self {
        Self::INFEASIBLE
    }
}

/// Everything a model needs besides its geometry.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub width: usize,
    pub height: usize,
    pub field: LossFieldParams,
    /// Per-segment loss weights; missing entries weigh 1
    pub weights: Vec<f64>,
    pub check_intersections: bool,
    pub intersection_threshold: usize,
}

/// Construction options that change a model's geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelOptions {
    /// Nominal bevel angle, degrees
    pub angle: f64,
    pub shrink_offset_m: f64,
    pub shrink_offset_b: f64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            angle: 55.0,
            shrink_offset_m: 0.0,
            shrink_offset_b: 0.0,
        }
    }
}

/// State shared by every model: projection, loss field and the last
/// accepted parameter vector with its derived points.
#[derive(Clone, Debug)]
pub struct ModelCore {
    transform: ScheimpflugTransform,
    field: LossField,
    profile: Profile,
    left_boundary: Vec<i32>,
    weights: Vec<f64>,
    check_intersections: bool,
    intersection_threshold: usize,

    params: Vec<f64>,
    obj_points: Vec<Vector2<f64>>,
    img_points: Vec<Vector2<f64>>,
    pub(crate) distance_points: Vec<PixelPoint>,
    pub(crate) measures: Measures,
    evaluation: Evaluation,
}

impl ModelCore {
    pub fn new(transform: ScheimpflugTransform, profile: &Profile, config: CoreConfig) -> Self {
        let field = LossField::build(profile, config.width, config.height, &config.field);
        let left_boundary = profile
            .row_table(config.height)
            .into_iter()
            .map(|x| x.unwrap_or(0))
            .collect();
        Self {
            transform,
            field,
            profile: profile.clone(),
            left_boundary,
            weights: config.weights,
            check_intersections: config.check_intersections,
            intersection_threshold: config.intersection_threshold,
            params: Vec::new(),
            obj_points: Vec::new(),
            img_points: Vec::new(),
            distance_points: Vec::new(),
            measures: Measures::new(),
            evaluation: Evaluation::INFEASIBLE,
        }
    }

    #[inline]
    pub fn transform(&self) -> &ScheimpflugTransform {
        &self.transform
    }

    #[inline]
    pub fn transform_mut(&mut self) -> &mut ScheimpflugTransform {
        &mut self.transform
    }

    #[inline]
    pub fn field(&self) -> &LossField {
        &self.field
    }

    #[inline]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    #[inline]
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    #[inline]
    pub fn object_points(&self) -> &[Vector2<f64>] {
        &self.obj_points
    }

    /// Rounded image projections of [`Self::object_points`].
    #[inline]
    pub fn image_points(&self) -> &[Vector2<f64>] {
        &self.img_points
    }

    #[inline]
    pub fn distance_points(&self) -> &[PixelPoint] {
        &self.distance_points
    }

    #[inline]
    pub fn evaluation(&self) -> Evaluation {
        self.evaluation
    }

    fn weight(&self, n: usize) -> f64 {
        self.weights.get(n).copied().unwrap_or(1.0)
    }

    /// Rounded image projection of object-plane points.
    pub fn to_image(&self, obj: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
        obj.iter().map(|&p| self.transform.object_to_image(p, true)).collect()
    }

    /// Score an image-plane polyline over the loss field.
    ///
    /// `loss = Σ segmentCost·weight / covered + max(0, N - covered)
    /// + intersections` (the last term only when checking intersections),
    /// with `N` the profile length.
    pub fn score_image_points(&self, img: &[Vector2<f64>], skip: Option<usize>) -> Evaluation {
        let trace = loss_field::rasterize(&self.field, &self.left_boundary, img, |n| self.weight(n), skip, |_| {});
        if trace.covered == 0 {
            return Evaluation::INFEASIBLE;
        }
        let missing = self.profile.len().saturating_sub(trace.covered) as f64;
        let intersections = if self.check_intersections {
            trace.intersections
        } else {
            0
        };
        Evaluation {
            loss: trace.weighted_loss / trace.covered as f64 + missing + intersections as f64,
            valid: intersections <= self.intersection_threshold,
            covered: trace.covered,
            intersections,
        }
    }

    pub fn score(&self, obj: &[Vector2<f64>], skip: Option<usize>) -> Evaluation {
        self.score_image_points(&self.to_image(obj), skip)
    }

    /// Accept `v` and its object polyline as the current state.
    pub(crate) fn apply(&mut self, v: &[f64], obj: Vec<Vector2<f64>>, skip: Option<usize>) -> bool {
        self.img_points = self.to_image(&obj);
        self.evaluation = self.score_image_points(&self.img_points, skip);
        self.obj_points = obj;
        self.params = v.to_vec();
        self.evaluation.valid
    }

    /// Accept an infeasible vector: no points, infinite cost.
    pub(crate) fn reject(&mut self, v: &[f64]) {
        self.params = v.to_vec();
        self.obj_points.clear();
        self.img_points.clear();
        self.evaluation = Evaluation::INFEASIBLE;
    }

    /// Accept image-plane vertices directly (validation against a known frame).
    pub(crate) fn apply_image_points(&mut self, img: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
        let obj: Vec<_> = img.iter().map(|&p| self.transform.image_to_object(p)).collect();
        self.img_points = img.iter().map(|p| Vector2::new(p.x.round(), p.y.round())).collect();
        self.evaluation = self.score_image_points(&self.img_points, None);
        self.obj_points = obj.clone();
        obj
    }

    /// Rasterized model with its vertices and distance markers.
    pub fn bevel(&self, skip: Option<usize>) -> Profile {
        let mut pixels = Vec::new();
        loss_field::rasterize(
            &self.field,
            &self.left_boundary,
            &self.img_points,
            |n| self.weight(n),
            skip,
            |p| pixels.push(p),
        );
        let mut bevel = Profile::from_points(pixels);
        bevel.model_points = self
            .img_points
            .iter()
            .map(|p| PixelPoint::new(p.x as i32, p.y as i32))
            .collect();
        bevel.distance_points = self.distance_points.clone();
        bevel
    }

    /// Profile point nearest (perpendicular distance) to the image line
    /// through `a` and `b`; the first minimum wins.
    pub(crate) fn nearest_profile_point(&self, a: Vector2<f64>, b: Vector2<f64>) -> Option<PixelPoint> {
        let dir = b - a;
        let len = dir.norm();
        if len <= f64::EPSILON {
            return None;
        }
        let mut best: Option<(PixelPoint, f64)> = None;
        for &p in self.profile.iter() {
            let q = Vector2::new(p.x as f64, p.y as f64) - a;
            let dist = (dir.x * q.y - dir.y * q.x).abs() / len;
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((p, dist));
            }
        }
        best.map(|(p, _)| p)
    }
}

/// Foot of the perpendicular from `p` on the line through `a` and `b`.
pub(crate) fn project_on_line(p: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>) -> Vector2<f64> {
    let dir = b - a;
    let n2 = dir.norm_squared();
    if n2 <= f64::EPSILON {
        return a;
    }
    a + dir * ((p - a).dot(&dir) / n2)
}

#[inline]
pub(crate) fn to_pixel(p: Vector2<f64>) -> PixelPoint {
    PixelPoint::new(p.x.round() as i32, p.y.round() as i32)
}

#[inline]
pub(crate) fn from_pixel(p: PixelPoint) -> Vector2<f64> {
    Vector2::new(p.x as f64, p.y as f64)
}

/// Unit direction `(sin a, -cos a)` along the bevel flank.
#[inline]
pub(crate) fn flank(alpha: f64) -> Vector2<f64> {
    let (s, c) = alpha.sin_cos();
    Vector2::new(s, -c)
}

/// Unit direction `(cos a, sin a)` towards the bevel tip.
#[inline]
pub(crate) fn normal(alpha: f64) -> Vector2<f64> {
    let (s, c) = alpha.sin_cos();
    Vector2::new(c, s)
}

/// A bevel model: geometry on top of a shared [`ModelCore`].
pub trait BevelModel: Send + Sync {
    fn model_type(&self) -> ModelType;

    fn core(&self) -> &ModelCore;

    fn core_mut(&mut self) -> &mut ModelCore;

    /// Object-plane vertices for `v`, `None` if `v` is not a bevel.
    fn object_points(&self, v: &[f64]) -> Option<Vec<Vector2<f64>>>;

    /// Segment that is drawn but not scored.
    fn ignored_segment(&self) -> Option<usize> {
        None
    }

    /// Accept the optimum: set the parameters and derive measures and
    /// distance markers from `last`, the last profile point.
    fn finalize(&mut self, v: &[f64], last: PixelPoint) -> bool;

    fn n_params(&self) -> usize {
        self.model_type().n_params()
    }

    /// Optimizer cost of `v`.
    fn evaluate(&self, v: &[f64]) -> f64 {
        match self.object_points(v) {
            Some(obj) => self.core().score(&obj, self.ignored_segment()).loss,
            None => INFEASIBLE_COST,
        }
    }

    /// Store `v` as the current state; false when infeasible or when the
    /// bevel crosses the profile too often.
    fn set_free_params(&mut self, v: &[f64]) -> bool {
        let skip = self.ignored_segment();
        match self.object_points(v) {
            Some(obj) => self.core_mut().apply(v, obj, skip),
            None => {
                self.core_mut().reject(v);
                false
            }
        }
    }

    fn measures(&self) -> &Measures {
        &self.core().measures
    }

    fn evaluation(&self) -> Evaluation {
        self.core().evaluation()
    }

    /// Rasterized bevel of the current state.
    fn bevel(&self) -> Profile {
        self.core().bevel(self.ignored_segment())
    }
}

/// Build a model of the requested type.
pub fn new_model(model_type: ModelType, core: ModelCore, options: &ModelOptions) -> Box<dyn BevelModel> {
    match model_type {
        ModelType::MiniBevel => Box::new(MiniBevel::new(core, options.angle)),
        ModelType::MiniBevelExt => Box::new(MiniBevelExt::new(core)),
        ModelType::TBevel => Box::new(TBevel::new(core, options.shrink_offset_m, options.shrink_offset_b)),
        ModelType::CustomBevel => Box::new(CustomBevel::new(core)),
    }
}
