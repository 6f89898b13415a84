use bevel_calib::engine::optimize_model;
use bevel_calib::error::ReturnCode;
use bevel_calib::model::{BevelModel, CoreConfig, LossFieldParams, ModelCore, ModelType};
use bevel_calib::profile::{PixelPoint, Profile};
use bevel_calib::pso::{PsoInput, PsoParams};
use bevel_calib::transform::{ScheimpflugTransform, TransformParams};
use nalgebra::Vector2;

/// Model with a scripted cost and acceptance, recording `finalize` calls.
struct Scripted {
    core: ModelCore,
    cost: fn(&[f64]) -> f64,
    accept: bool,
    finalized: usize,
    seen: Vec<Vec<f64>>,
}

impl Scripted {
    fn new(cost: fn(&[f64]) -> f64, accept: bool) -> Self {
        let mut profile = Profile::new();
        for y in 100..200 {
            profile.push(300, y);
        }
        let config = CoreConfig {
            width: 560,
            height: 560,
            field: LossFieldParams {
                margin: 0,
                right_offset: 10,
                left_offset: 10,
                left_gradient_width: 5,
            },
            weights: Vec::new(),
            check_intersections: false,
            intersection_threshold: 0,
        };
        let transform = ScheimpflugTransform::new(&TransformParams::default());
        Self {
            core: ModelCore::new(transform, &profile, config),
            cost,
            accept,
            finalized: 0,
            seen: Vec::new(),
        }
    }
}

impl BevelModel for Scripted {
    fn model_type(&self) -> ModelType {
        ModelType::MiniBevel
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn object_points(&self, _v: &[f64]) -> Option<Vec<Vector2<f64>>> {
        None
    }

    fn evaluate(&self, v: &[f64]) -> f64 {
        (self.cost)(v)
    }

    fn finalize(&mut self, v: &[f64], _last: PixelPoint) -> bool {
        self.finalized += 1;
        self.seen.push(v.to_vec());
        self.accept
    }
}

fn input() -> PsoInput<f64> {
    let params = PsoParams {
        n_iterations: 15,
        n_particles: 30,
        seed: Some(3),
        ..PsoParams::default()
    };
    PsoInput::new(vec![-1.0, -1.0], vec![1.0, 1.0], params)
}

#[test]
fn boundary_optimum_uses_every_retry() {
    let _ = env_logger::builder().is_test(true).try_init();
    // decreasing in both components: the swarm ends clamped on the upper bounds
    let mut model = Scripted::new(|v| -v[0] - v[1], true);
    let fit = optimize_model(&mut model, &input(), 4).unwrap();
    assert_eq!(fit.code, ReturnCode::LensFittingFailedPsoBoundaryReached);
    assert!(fit.code.is_soft_success());
    assert_eq!(fit.attempts, 4);
    assert_eq!(model.finalized, 4);
    assert!(fit.params.iter().any(|&x| x == 1.0), "{:?}", fit.params);
}

#[test]
fn interior_optimum_returns_at_once() {
    let mut model = Scripted::new(|v| (v[0] - 0.2).powi(2) + (v[1] + 0.3).powi(2), true);
    let fit = optimize_model(&mut model, &input(), 4).unwrap();
    assert_eq!(fit.code, ReturnCode::LensFittingSuccessful);
    assert_eq!(fit.attempts, 1);
    assert_eq!(model.finalized, 1);
    assert_eq!(fit.model_type, ModelType::MiniBevel);
}

#[test]
fn rejected_fits_report_the_frame_intersection() {
    let mut model = Scripted::new(|v| v[0] * v[0] + v[1] * v[1], false);
    let err = optimize_model(&mut model, &input(), 3).unwrap_err();
    assert_eq!(err, ReturnCode::LensFittingFailedBevelFrameIntersection);
    assert_eq!(model.finalized, 3);
}

#[test]
fn seeded_retries_explore_different_candidates() {
    let mut model = Scripted::new(|v| (v[0] - 0.1).powi(2) + (v[1] - 0.4).powi(2), false);
    let err = optimize_model(&mut model, &input(), 3).unwrap_err();
    assert_eq!(err, ReturnCode::LensFittingFailedBevelFrameIntersection);
    assert_eq!(model.seen.len(), 3);
    assert!(
        model.seen.windows(2).all(|w| w[0] != w[1]),
        "retries repeated a candidate: {:?}",
        model.seen
    );
}
