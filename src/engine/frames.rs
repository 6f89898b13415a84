//! Transform calibration against reference frames of known geometry.
//!
//! The image vertices of a fitted MiniBevel stay fixed while the swarm moves
//! the ten calibrated transform parameters. Each candidate transform maps
//! the vertices back to the object plane, and the recovered frame is
//! compared with the reference:
//!
//! `cost = (M* - M)² + rad(a1 - a1*)² + rad(a2 - a2*)²`
//!
//! The relative error `sqrt(cost) / |(B*, M*)|` must stay below `epsilon`.
use super::calibration_code;
use crate::config::{Calibration, FrameReference, TransformCalibrationSettings};
use crate::error::ReturnCode;
use crate::model::{BevelModel, MiniBevel, TestMeasures, INFEASIBLE_COST};
use crate::profile::Profile;
use crate::pso::{self, PsoInput, PsoStatus, SwarmRuns};
use crate::transform::ScheimpflugTransform;
use log::{debug, info, warn};
use nalgebra::Vector2;

/// One calibration image: the fitted model and its image vertices.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub model: MiniBevel,
    pub img_points: Vec<Vector2<f64>>,
}

impl FrameSample {
    /// Sample from a fitted model's current image vertices.
    pub fn from_model(model: MiniBevel) -> Self {
        let img_points = model.core().image_points().to_vec();
        Self { model, img_points }
    }
}

#[derive(Clone, Debug)]
pub struct FrameCalibrationOutput {
    pub valid: bool,
    pub code: ReturnCode,
    pub params: Vec<f64>,
    pub loss: f64,
    /// Relative error of the best run
    pub error: f64,
    pub iteration: Option<usize>,
    /// Swarm runs started
    pub attempts: usize,
    /// Bevel redrawn with the calibrated transform (empty when invalid)
    pub bevel: Profile,
    /// Frame measured with the calibrated transform
    pub measures: Option<TestMeasures>,
}

/// Squared mismatch between a measured and a reference frame.
fn frame_cost(measured: &TestMeasures, frame: &FrameReference) -> f64 {
    let dm = frame.m - measured.m;
    let d1 = (measured.angle1 - frame.angle1).to_radians();
    let d2 = (measured.angle2 - frame.angle2).to_radians();
    dm * dm + d1 * d1 + d2 * d2
}

fn measure(base: &ScheimpflugTransform, v: &[f64], img: &[Vector2<f64>]) -> Option<TestMeasures> {
    let mut t = base.clone();
    t.init_calibrated(v);
    TestMeasures::from_image_points(&t, img)
}

#[inline]
fn relative_error(loss: f64, frame: &FrameReference) -> f64 {
    let scale = frame.b.hypot(frame.m);
    if scale <= f64::EPSILON {
        return f64::INFINITY;
    }
    loss.max(0.0).sqrt() / scale
}

/// Bevel and frame of `sample` seen through the calibrated parameters `v`.
fn redraw(sample: &FrameSample, v: &[f64]) -> (Profile, Option<TestMeasures>) {
    let mut model = sample.model.clone();
    model.core_mut().transform_mut().init_calibrated(v);
    let measures = model.set_from_img_points(&sample.img_points);
    (model.bevel(), measures)
}

/// Up to `attempts` swarm runs; `cost` scores one parameter vector.
fn run_calibration<C>(
    input: &PsoInput<f64>,
    settings: &TransformCalibrationSettings,
    frame: &FrameReference,
    cost: &C,
    attempts: usize,
) -> SwarmRuns<f64>
where
    C: Fn(&[f64]) -> f64 + Sync,
{
    pso::optimize_runs(input, cost, attempts, |attempt, out| {
        let error = relative_error(out.loss, frame);
        debug!(
            "frame calibration: attempt {attempt} loss {:.3e} error {error:.4} ({:?})",
            out.loss, out.status
        );
        let accepted = out.status == PsoStatus::Success || settings.permit_boundary_solutions;
        accepted && error <= settings.epsilon
    })
}

fn finish(
    runs: SwarmRuns<f64>,
    frame: &FrameReference,
    sample: Option<&FrameSample>,
    calibration: &mut Calibration,
) -> FrameCalibrationOutput {
    let valid = runs.accepted;
    let code = calibration_code(valid, runs.last);
    let attempts = runs.runs;
    let Some(best) = runs.best else {
        warn!("frame calibration: {code}");
        return FrameCalibrationOutput {
            valid: false,
            code,
            params: Vec::new(),
            loss: INFEASIBLE_COST,
            error: f64::INFINITY,
            iteration: None,
            attempts,
            bevel: Profile::new(),
            measures: None,
        };
    };
    let error = relative_error(best.loss, frame);
    let (bevel, measures) = match (valid, sample) {
        (true, Some(sample)) => {
            calibration.store_calibrated(&best.x);
            redraw(sample, &best.x)
        }
        _ => (Profile::new(), None),
    };
    if valid {
        info!("frame calibration: converged, relative error {error:.5}");
    } else {
        warn!("frame calibration: {code} (relative error {error:.5})");
    }
    FrameCalibrationOutput {
        valid,
        code,
        params: best.x,
        loss: best.loss,
        error,
        iteration: best.iteration,
        attempts,
        bevel,
        measures,
    }
}

/// Calibrate the transform so the sample's frame matches `frame`.
///
/// Runs the swarm once: the caller repeats the whole preprocess, fit and
/// calibrate sequence on failure. On success the parameters are stored in
/// `calibration`.
pub fn calibrate_frame(
    sample: &FrameSample,
    frame: &FrameReference,
    calibration: &mut Calibration,
    settings: &TransformCalibrationSettings,
) -> FrameCalibrationOutput {
    let Some((lb, ub)) = calibration.search_bounds() else {
        warn!("frame calibration: incomplete search space");
        return finish(SwarmRuns::default(), frame, None, calibration);
    };
    let input = PsoInput::new(lb, ub, settings.pso.params());
    let base = sample.model.core().transform().clone();
    let cost = |v: &[f64]| match measure(&base, v, &sample.img_points) {
        Some(m) => frame_cost(&m, frame),
        None => INFEASIBLE_COST,
    };
    let runs = run_calibration(&input, settings, frame, &cost, 1);
    finish(runs, frame, Some(sample), calibration)
}

/// Calibrate against several images of the same frame; the frame measured
/// in each image (through its own stylus orientation) is averaged before it
/// is compared with `frame`. The swarm is retried up to `max_retries` times.
pub fn calibrate_frames(
    samples: &[FrameSample],
    frame: &FrameReference,
    calibration: &mut Calibration,
    settings: &TransformCalibrationSettings,
) -> FrameCalibrationOutput {
    let Some(first) = samples.first() else {
        warn!("frame calibration: no samples");
        return finish(SwarmRuns::default(), frame, None, calibration);
    };
    let Some((lb, ub)) = calibration.search_bounds() else {
        warn!("frame calibration: incomplete search space");
        return finish(SwarmRuns::default(), frame, None, calibration);
    };
    let input = PsoInput::new(lb, ub, settings.pso.params());
    let n = samples.len() as f64;
    let cost = |v: &[f64]| {
        let mut mean = TestMeasures::default();
        for s in samples {
            let Some(m) = measure(s.model.core().transform(), v, &s.img_points) else {
                return INFEASIBLE_COST;
            };
            mean.b += m.b / n;
            mean.m += m.m / n;
            mean.angle1 += m.angle1 / n;
            mean.angle2 += m.angle2 / n;
        }
        frame_cost(&mean, frame)
    };
    info!("frame calibration: {} samples", samples.len());
    let runs = run_calibration(&input, settings, frame, &cost, settings.max_retries);
    finish(runs, frame, Some(first), calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mini_bevel::tests::flank_vector;
    use crate::model::tests::{core_for, vertical_profile};
    use approx::assert_abs_diff_eq;

    fn sample() -> FrameSample {
        let core = core_for(&vertical_profile(280, 60..500));
        let v = flank_vector(&core, (280.0, 200.0), (280.0, 320.0));
        let mut model = MiniBevel::new(core, 55.0);
        model.set_free_params(&v);
        FrameSample::from_model(model)
    }

    /// The frame the sample shows through the nominal transform.
    fn nominal_frame(sample: &FrameSample) -> FrameReference {
        let tm = TestMeasures::from_image_points(sample.model.core().transform(), &sample.img_points).unwrap();
        FrameReference {
            b: tm.b,
            m: tm.m,
            angle1: tm.angle1,
            angle2: tm.angle2,
        }
    }

    fn settings() -> TransformCalibrationSettings {
        let mut s = TransformCalibrationSettings::default();
        s.pso.seed = Some(3);
        s.pso.n_particles = 60;
        s.pso.n_iterations = 15;
        s.epsilon = 1.0;
        s.permit_boundary_solutions = true;
        s.max_retries = 2;
        s
    }

    #[test]
    fn cost_vanishes_on_the_reference() {
        let s = sample();
        let frame = nominal_frame(&s);
        let tm = TestMeasures::from_image_points(s.model.core().transform(), &s.img_points).unwrap();
        assert_abs_diff_eq!(frame_cost(&tm, &frame), 0.0, epsilon = 1e-18);
        let off = FrameReference { m: frame.m + 0.1, ..frame };
        assert_abs_diff_eq!(frame_cost(&tm, &off), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn loose_tolerance_converges_and_stores() {
        let s = sample();
        let frame = nominal_frame(&s);
        let mut calibration = Calibration::default();
        let out = calibrate_frame(&s, &frame, &mut calibration, &settings());
        assert!(out.valid);
        assert_eq!(out.code, ReturnCode::CalibrationSuccessful);
        assert_eq!(out.params.len(), 10);
        assert_eq!(calibration.scheimpflug_transformation.calibrated().to_vec(), out.params);
        assert!(!out.bevel.is_empty());
        assert!(out.measures.is_some());
    }

    #[test]
    fn averaged_samples_match_a_single_one() {
        let s = sample();
        let frame = nominal_frame(&s);
        let mut calibration = Calibration::default();
        let out = calibrate_frames(&[s.clone(), s], &frame, &mut calibration, &settings());
        assert!(out.valid);
        assert!(out.error <= 1.0);
    }

    #[test]
    fn missing_search_range_fails_to_start() {
        let s = sample();
        let frame = nominal_frame(&s);
        let mut calibration = Calibration::default();
        calibration.search_space_scheimpflug.remove("phi");
        let before = calibration.scheimpflug_transformation.clone();
        let out = calibrate_frame(&s, &frame, &mut calibration, &settings());
        assert!(!out.valid);
        assert_eq!(out.code, ReturnCode::CalibrationFailedPsoInit);
        assert_eq!(calibration.scheimpflug_transformation, before);
        let empty = calibrate_frames(&[], &frame, &mut calibration, &settings());
        assert_eq!(empty.code, ReturnCode::CalibrationFailedPsoInit);
    }

    #[test]
    fn single_frame_runs_one_swarm_per_call() {
        let s = sample();
        let frame = nominal_frame(&s);
        let mut strict = settings();
        strict.max_retries = 3;
        strict.epsilon = -1.0;
        let mut calibration = Calibration::default();
        let before = calibration.scheimpflug_transformation.clone();

        let out = calibrate_frame(&s, &frame, &mut calibration, &strict);
        assert!(!out.valid);
        assert_eq!(out.attempts, 1);
        assert_eq!(calibration.scheimpflug_transformation, before);

        let multi = calibrate_frames(&[s], &frame, &mut calibration, &strict);
        assert!(!multi.valid);
        assert_eq!(multi.attempts, 3);
    }
}
