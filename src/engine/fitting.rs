//! Model initialization and the retrying model fit.
//!
//! Bounds come from the search space of the profile:
//! - `x1, y1` (and `x5, y5`): the upper (lower) corner ± `winSize` pixels
//!   mapped to the object plane,
//! - `alpha`: the corner-to-corner direction on the object plane plus
//!   `[minAlpha, maxAlpha]`,
//! - `M`: the corner distance times `[minM, maxM]` multipliers,
//! - `B` (TBevel): the deepest profile row left of the corner line times
//!   `[minB, maxB]` multipliers,
//! - `S`, `E` (CustomBevel): configured pixel ranges,
//! - bevel angle (MiniBevelExt): nominal angle ± `deltaBeta`.
use super::search_space::{search_space, SearchPoints};
use super::ProcessType;
use crate::config::Settings;
use crate::error::ReturnCode;
use crate::model::{new_model, BevelModel, CoreConfig, LossFieldParams, Measures, ModelCore, ModelOptions, ModelType};
use crate::profile::{PixelPoint, Profile};
use crate::pso::{self, PsoInput, PsoStatus};
use crate::retry::retry;
use crate::transform::ScheimpflugTransform;
use log::{debug, info, warn};
use nalgebra::Vector2;

/// A model ready for fitting.
pub struct ModelInit {
    pub model: Box<dyn BevelModel>,
    pub input: PsoInput<f64>,
    pub search: SearchPoints,
}

/// Result of a model fit.
#[derive(Clone, Debug)]
pub struct FitOutput {
    pub model_type: ModelType,
    /// Rasterized bevel with its vertices and distance markers
    pub bevel: Profile,
    pub measures: Measures,
    pub params: Vec<f64>,
    pub loss: f64,
    pub iteration: Option<usize>,
    /// Stylus orientation the fit was made with, degrees
    pub r: f64,
    pub h: f64,
    /// `LensFittingSuccessful` or the soft `LensFittingFailedPsoBoundaryReached`
    pub code: ReturnCode,
    /// Swarm runs used
    pub attempts: usize,
}

#[inline]
fn at(p: PixelPoint, dx: f64, dy: f64) -> Vector2<f64> {
    Vector2::new(p.x as f64 + dx, p.y as f64 + dy)
}

/// Deepest horizontal distance (pixels) of the profile left of the line
/// through the two corners.
fn depth_estimate(profile: &Profile, upper: PixelPoint, lower: PixelPoint) -> f64 {
    let dy = (lower.y - upper.y) as f64;
    if dy.abs() < 1.0 {
        return 0.0;
    }
    let slope = (lower.x - upper.x) as f64 / dy;
    let mut depth = 0.0f64;
    for row in upper.y..lower.y {
        let Some(p) = profile.iter().find(|p| p.y == row) else {
            continue;
        };
        let line_x = upper.x as f64 + slope * (row - upper.y) as f64;
        depth = depth.max(line_x - p.x as f64);
    }
    depth
}

/// Locate the search space on `profile`, store its corners as anchors and
/// build the model with its swarm bounds.
///
/// `frame_angle` replaces the nominal bevel angle (validation against a
/// known frame).
pub fn init_model(
    profile: &mut Profile,
    transform: &ScheimpflugTransform,
    settings: &Settings,
    model_type: ModelType,
    process: ProcessType,
    frame_angle: Option<f64>,
) -> Result<ModelInit, ReturnCode> {
    let idx = model_type.index();
    let space = &settings.search_space[idx];
    let pso = &settings.pso[idx];
    let opt = &settings.optimization;
    let stc = &settings.scheimpflug_transformation_calibration;

    let (margin, check, n_iterations, n_particles) = match process {
        ProcessType::LensFitting => (opt.loss_field_margin, opt.check_intersections, pso.n_iterations, pso.n_particles),
        ProcessType::Calibration => (
            opt.loss_field_margin_calibration,
            opt.check_intersections_calibration,
            stc.pso.n_iterations,
            stc.pso.n_particles,
        ),
        ProcessType::Validation => (
            opt.loss_field_margin_validation,
            opt.check_intersections_validation,
            pso.n_iterations,
            pso.n_particles,
        ),
    };

    let Some(sp) = search_space(profile, &space.reference_points) else {
        warn!("init model: no search space for {model_type}");
        return Err(ReturnCode::LensFittingFailedModelNotInitialized);
    };
    profile.anchors = vec![sp.upper, sp.lower];

    let core = ModelCore::new(
        transform.clone(),
        profile,
        CoreConfig {
            width: settings.image.width,
            height: settings.image.height,
            field: LossFieldParams {
                margin,
                right_offset: opt.loss_field_right_offset,
                left_offset: opt.loss_field_left_offset,
                left_gradient_width: opt.left_gradient_width,
            },
            weights: space.weight.clone(),
            check_intersections: check,
            intersection_threshold: opt.intersection_threshold,
        },
    );
    let angle = frame_angle.unwrap_or(pso.angle);
    let model = new_model(
        model_type,
        core,
        &ModelOptions {
            angle,
            shrink_offset_m: space.shrink_offset_m,
            shrink_offset_b: space.shrink_offset_b,
        },
    );

    let (wx, wy) = (space.win_size_x, space.win_size_y);
    let corner = |p: PixelPoint| {
        let a = transform.image_to_object(at(p, wx, wy));
        let b = transform.image_to_object(at(p, -wx, -wy));
        (a.inf(&b), a.sup(&b))
    };
    let (up_a, up_b) = corner(sp.upper);
    let p1 = transform.image_to_object(at(sp.upper, 0.0, 0.0));
    let p3 = transform.image_to_object(at(sp.lower, 0.0, 0.0));
    let alpha = (p3.x - p1.x).atan2(p1.y - p3.y);
    let m_px = (sp.upper.dist2(sp.lower) as f64).sqrt();
    let m_lo = transform.pixel_to_mm(m_px * space.min_m_multiplier);
    let m_hi = transform.pixel_to_mm(m_px * space.max_m_multiplier);
    let (a_lo, a_hi) = (alpha + space.min_alpha, alpha + space.max_alpha);

    let (lb, ub) = match model_type {
        ModelType::MiniBevel => (vec![up_a.x, up_a.y, a_lo, m_lo], vec![up_b.x, up_b.y, a_hi, m_hi]),
        ModelType::MiniBevelExt => (
            vec![up_a.x, up_a.y, a_lo, m_lo, angle - space.delta_beta],
            vec![up_b.x, up_b.y, a_hi, m_hi, angle + space.delta_beta],
        ),
        ModelType::TBevel => {
            let b_px = depth_estimate(profile, sp.upper, sp.lower);
            (
                vec![up_a.x, up_a.y, a_lo, m_lo, transform.pixel_to_mm(b_px * space.min_b_multiplier)],
                vec![up_b.x, up_b.y, a_hi, m_hi, transform.pixel_to_mm(b_px * space.max_b_multiplier)],
            )
        }
        ModelType::CustomBevel => {
            let (lo_a, lo_b) = corner(sp.lower);
            (
                vec![
                    up_a.x,
                    up_a.y,
                    lo_a.x,
                    lo_a.y,
                    a_lo,
                    m_lo,
                    transform.pixel_to_mm(space.min_s),
                    transform.pixel_to_mm(space.min_e),
                ],
                vec![
                    up_b.x,
                    up_b.y,
                    lo_b.x,
                    lo_b.y,
                    a_hi,
                    m_hi,
                    transform.pixel_to_mm(space.max_s),
                    transform.pixel_to_mm(space.max_e),
                ],
            )
        }
    };
    let mut input = PsoInput::new(lb, ub, pso.params_sized(n_iterations, n_particles));
    input.normalize_bounds();
    debug!("init model: {model_type} ({process:?}) lb {:?} ub {:?}", input.lb, input.ub);

    Ok(ModelInit {
        model,
        input,
        search: sp,
    })
}

/// Fit `model` with up to `max_retries` independent swarm runs; a fixed
/// swarm seed moves by one per attempt.
///
/// - A valid fit whose optimum is off the bounds returns at once with
///   `LensFittingSuccessful`.
/// - A valid fit on a bound is kept and the search retried; when no better
///   fit turns up the last one is returned with the soft
///   `LensFittingFailedPsoBoundaryReached`.
/// - Otherwise `LensFittingFailedBevelFrameIntersection` if some swarm ran,
///   `LensFittingFailedMaxRetriesReached` if none did.
pub fn optimize_model(
    model: &mut dyn BevelModel,
    input: &PsoInput<f64>,
    max_retries: usize,
) -> Result<FitOutput, ReturnCode> {
    let last = model.core().profile().last().unwrap_or_default();
    let mut boundary_fit: Option<FitOutput> = None;
    let mut swarm_ran = false;

    let fitted = retry(max_retries, |attempt| {
        let run = {
            let m: &dyn BevelModel = &*model;
            pso::optimize(&input.for_attempt(attempt), &|v: &[f64]| m.evaluate(v))
        };
        let out = match run {
            Ok(out) => out,
            Err(err) => {
                warn!("optimize model: attempt {attempt}: {err}");
                return None;
            }
        };
        swarm_ran = true;
        if !model.finalize(&out.x, last) {
            debug!(
                "optimize model: attempt {attempt} rejected ({} intersections)",
                model.evaluation().intersections
            );
            return None;
        }

        let t = model.core().transform();
        let on_bound = out.status == PsoStatus::BoundaryReached;
        let fit = FitOutput {
            model_type: model.model_type(),
            bevel: model.bevel(),
            measures: model.measures().clone(),
            params: out.x,
            loss: out.loss,
            iteration: out.iteration,
            r: t.r_deg(),
            h: t.h_deg(),
            code: if on_bound {
                ReturnCode::LensFittingFailedPsoBoundaryReached
            } else {
                ReturnCode::LensFittingSuccessful
            },
            attempts: attempt,
        };
        if !on_bound {
            return Some(fit);
        }
        debug!("optimize model: attempt {attempt} on the search-space boundary");
        boundary_fit = Some(fit);
        None
    });

    if let Some(fit) = fitted {
        info!(
            "optimize model: {} fitted at attempt {}, loss {:.4}",
            fit.model_type, fit.attempts, fit.loss
        );
        return Ok(fit);
    }
    if let Some(fit) = boundary_fit {
        warn!("optimize model: {} only fitted on the search-space boundary", fit.model_type);
        return Ok(fit);
    }
    let code = if swarm_ran {
        ReturnCode::LensFittingFailedBevelFrameIntersection
    } else {
        ReturnCode::LensFittingFailedMaxRetriesReached
    };
    warn!("optimize model: {code}");
    Err(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::search_space::tests::v_profile;
    use crate::transform::TransformParams;

    fn fixture(model_type: ModelType, process: ProcessType) -> (Profile, Result<ModelInit, ReturnCode>) {
        let mut profile = v_profile();
        let transform = ScheimpflugTransform::new(&TransformParams::default());
        let mut settings = Settings::default();
        settings.pso[model_type.index()].seed = Some(7);
        let init = init_model(&mut profile, &transform, &settings, model_type, process, None);
        (profile, init)
    }

    #[test]
    fn bounds_match_the_model_and_bracket_the_corner() {
        for model_type in ModelType::ALL {
            let (profile, init) = fixture(model_type, ProcessType::LensFitting);
            let init = init.unwrap();
            assert_eq!(init.input.dims(), model_type.n_params());
            assert!(init.input.lb.iter().zip(&init.input.ub).all(|(l, u)| l <= u));
            assert_eq!(profile.anchors, vec![init.search.upper, init.search.lower]);
            assert_eq!(init.model.model_type(), model_type);

            let t = init.model.core().transform();
            let p1 = t.image_to_object(at(init.search.upper, 0.0, 0.0));
            assert!(init.input.lb[0] <= p1.x && p1.x <= init.input.ub[0]);
            assert!(init.input.lb[1] <= p1.y && p1.y <= init.input.ub[1]);
        }
    }

    #[test]
    fn calibration_uses_the_transform_swarm_size() {
        let (_, init) = fixture(ModelType::MiniBevel, ProcessType::Calibration);
        let stc = Settings::default().scheimpflug_transformation_calibration;
        assert_eq!(init.unwrap().input.params.n_particles, stc.pso.n_particles);
    }

    #[test]
    fn straight_profile_is_not_initialized() {
        let mut profile = Profile::new();
        for y in 50..400 {
            profile.push(300, y);
        }
        let transform = ScheimpflugTransform::new(&TransformParams::default());
        let res = init_model(
            &mut profile,
            &transform,
            &Settings::default(),
            ModelType::MiniBevel,
            ProcessType::LensFitting,
            None,
        );
        assert_eq!(res.err(), Some(ReturnCode::LensFittingFailedModelNotInitialized));
        assert!(profile.anchors.is_empty());
    }

    #[test]
    fn depth_of_a_v_bevel() {
        let profile = v_profile();
        let d = depth_estimate(&profile, PixelPoint::new(300, 200), PixelPoint::new(300, 320));
        assert_eq!(d, 60.0);
        assert_eq!(depth_estimate(&profile, PixelPoint::new(300, 200), PixelPoint::new(310, 200)), 0.0);
    }

    #[test]
    fn fit_without_intersection_check_yields_measures() {
        let mut settings = Settings::default();
        settings.pso[0].seed = Some(11);
        settings.pso[0].n_particles = 60;
        settings.pso[0].n_iterations = 20;
        settings.optimization.check_intersections_validation = false;
        let mut profile = v_profile();
        let transform = ScheimpflugTransform::new(&TransformParams::default());
        let mut init = init_model(
            &mut profile,
            &transform,
            &settings,
            ModelType::MiniBevel,
            ProcessType::Validation,
            Some(45.0),
        )
        .unwrap();
        let fit = optimize_model(init.model.as_mut(), &init.input, 3).unwrap();
        assert!(fit.code.is_soft_success());
        assert!(fit.attempts >= 1 && fit.attempts <= 3);
        assert!(fit.measures.contains_key("B*"));
        assert_eq!(fit.bevel.model_points.len(), 5);
        assert!(fit.loss < crate::model::INFEASIBLE_COST);
    }
}
