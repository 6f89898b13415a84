//! Transform calibration against the intersections of the chart grid.
//!
//! Intersections come in the detector's order (see
//! [`crate::hough`]): for `N = 2n + 1` points, the first `n` are the
//! vertical lines crossing the first and the last horizontal line, the next
//! `n` the horizontal lines crossing the first and the last vertical line,
//! and the last one is the centre. The outer square has the corners
//! `A = P0`, `B = P1`, `C = P(o+1)`, `D = P(o)` with `o = (n/2 - 1)·2`.
//!
//! Cost of a parameter vector `v`:
//! `λ·Σ(v - nominal)² + Σ_sides (|side| - 3)² + Σ_diagonals (|diag| - 3√2)²`,
//! lengths measured on the object plane in mm.
use super::calibration_code;
use crate::config::{Calibration, GridReference, TransformCalibrationSettings};
use crate::error::ReturnCode;
use crate::model::INFEASIBLE_COST;
use crate::pso::{self, PsoInput, PsoStatus};
use crate::transform::ScheimpflugTransform;
use log::{debug, info, warn};
use nalgebra::Vector2;
use serde::Serialize;

/// Side of the outer chart square, mm.
pub const GRID_SIDE_MM: f64 = 3.0;
/// Fewest intersections that still describe a square.
const MIN_POINTS: usize = 9;

#[derive(Clone, Debug)]
pub struct GridCalibrationOutput {
    pub valid: bool,
    pub code: ReturnCode,
    pub params: Vec<f64>,
    pub loss: f64,
    pub iteration: Option<usize>,
}

/// Deviation of the outer square from its nominal size, µm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GridErrors {
    /// `L1 = |AD|`, `L2 = |DC|`, `L3 = |BC|`, `L4 = |AB|`
    pub sides: [f64; 4],
    /// `D1 = |AC|`, `D2 = |BD|`
    pub diagonals: [f64; 2],
}

/// Corner indices `[A, B, C, D]` of an intersection list of length `n_points`.
fn corners(n_points: usize) -> Option<[usize; 4]> {
    if n_points < MIN_POINTS {
        return None;
    }
    let n = (n_points - 1) / 2;
    let offset = (n / 2).checked_sub(1)? * 2;
    Some([0, 1, offset + 1, offset])
}

/// `[|AD|, |DC|, |BC|, |AB|]` and `[|AC|, |BD|]` on the object plane.
fn square(obj: [Vector2<f64>; 4]) -> ([f64; 4], [f64; 2]) {
    let [a, b, c, d] = obj;
    (
        [(a - d).norm(), (d - c).norm(), (b - c).norm(), (a - b).norm()],
        [(a - c).norm(), (b - d).norm()],
    )
}

fn corner_points(t: &ScheimpflugTransform, img: &[Vector2<f64>], idx: [usize; 4]) -> [Vector2<f64>; 4] {
    idx.map(|i| t.image_to_object(img[i]))
}

/// Size errors of the outer square seen through `transform`.
pub fn grid_errors(transform: &ScheimpflugTransform, intersections: &[Vector2<f64>]) -> Option<GridErrors> {
    let idx = corners(intersections.len())?;
    let (sides, diagonals) = square(corner_points(transform, intersections, idx));
    let diag = GRID_SIDE_MM * std::f64::consts::SQRT_2;
    Some(GridErrors {
        sides: sides.map(|l| (l - GRID_SIDE_MM) * 1000.0),
        diagonals: diagonals.map(|l| (l - diag) * 1000.0),
    })
}

/// Shape cost of the square; the regularization is added by the caller.
fn shape_cost(obj: [Vector2<f64>; 4]) -> f64 {
    let diag = GRID_SIDE_MM * std::f64::consts::SQRT_2;
    let (sides, diagonals) = square(obj);
    let s: f64 = sides.iter().map(|l| (l - GRID_SIDE_MM).powi(2)).sum();
    let d: f64 = diagonals.iter().map(|l| (l - diag).powi(2)).sum();
    s + d
}

fn failed(code: ReturnCode) -> GridCalibrationOutput {
    GridCalibrationOutput {
        valid: false,
        code,
        params: Vec::new(),
        loss: INFEASIBLE_COST,
        iteration: None,
    }
}

/// Calibrate the transform from chart intersections taken at the stylus
/// orientation in `reference`.
///
/// The swarm starts from the nominal transform. A run is accepted when its
/// loss is below `epsilon_grid` and it did not stop on a bound (unless
/// boundary solutions are permitted). Accepted parameters are stored in
/// `calibration` when `save` is set.
pub fn calibrate_grid(
    intersections: &[Vector2<f64>],
    reference: &GridReference,
    calibration: &mut Calibration,
    settings: &TransformCalibrationSettings,
    save: bool,
) -> GridCalibrationOutput {
    let Some(idx) = corners(intersections.len()) else {
        warn!("grid calibration: {} intersections are too few", intersections.len());
        return failed(ReturnCode::CalibrationFailedGrid);
    };
    let Some((lb, ub)) = calibration.search_bounds() else {
        warn!("grid calibration: incomplete search space");
        return failed(ReturnCode::CalibrationFailedPsoInit);
    };

    let mut base = ScheimpflugTransform::new(&calibration.nominal_scheimpflug_transformation);
    base.set_stylus_orientation(reference.delta_n, reference.h);
    let nominal = calibration.nominal_scheimpflug_transformation.calibrated();
    let lambda = reference.lambda;
    let cost = |v: &[f64]| {
        let mut t = base.clone();
        t.init_calibrated(v);
        let shape = shape_cost(corner_points(&t, intersections, idx));
        if !shape.is_finite() {
            return INFEASIBLE_COST;
        }
        if lambda > 0.0 {
            let reg: f64 = nominal.iter().zip(v).map(|(n, x)| (n - x).powi(2)).sum();
            shape + lambda * reg
        } else {
            shape
        }
    };
    let input = PsoInput::new(lb, ub, settings.pso.params());

    let runs = pso::optimize_runs(&input, &cost, settings.max_retries, |attempt, out| {
        debug!("grid calibration: attempt {attempt} loss {:.3e} ({:?})", out.loss, out.status);
        let accepted = out.status == PsoStatus::Success || settings.permit_boundary_solutions;
        accepted && out.loss < settings.epsilon_grid
    });
    let (valid, last) = (runs.accepted, runs.last);

    let code = calibration_code(valid, last);
    let Some(best) = runs.best else {
        warn!("grid calibration: {code}");
        return failed(code);
    };
    if valid {
        info!("grid calibration: converged, loss {:.3e}", best.loss);
        if save {
            calibration.store_calibrated(&best.x);
        }
    } else {
        warn!("grid calibration: {code} (loss {:.3e})", best.loss);
    }
    GridCalibrationOutput {
        valid,
        code,
        params: best.x,
        loss: best.loss,
        iteration: best.iteration,
    }
}
