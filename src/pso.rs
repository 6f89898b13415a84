//! Particle swarm optimizer over a box-bounded search space.
//!
//! - Positions start uniform in `[lb, ub]`, velocities uniform in `±|ub - lb|`.
//! - Inertia decays linearly from `w0i` to `w0f`; one cognitive and one social
//!   random factor are drawn per iteration and shared by all particles.
//! - A component leaving the box is clamped onto it and gets a fresh random
//!   velocity.
//! - Costs of a whole swarm are evaluated in parallel with rayon; NaN costs
//!   never become personal or global bests.
//!
//! The run reports [`PsoStatus::BoundaryReached`] when any component of the
//! optimum sits exactly on a bound.
//!
//! Complexity: O(iterations · particles · (dims + cost)).
use crate::retry::retry;
use log::{debug, info, warn};
use nalgebra::RealField;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

/// Cost of one particle position.
pub trait CostFunction<T>: Sync {
    fn evaluate(&self, x: &[T]) -> T;
}

impl<T, F> CostFunction<T> for F
where
    F: Fn(&[T]) -> T + Sync,
{
    #[inline]
    fn evaluate(&self, x: &[T]) -> T {
        self(x)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PsoError {
    #[error("invalid search space: {0}")]
    InvalidBounds(&'static str),
    #[error("failed to allocate the swarm of {0} values")]
    MemoryAllocationFailure(usize),
    #[error("no particle produced a comparable cost")]
    InitializationFailure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PsoStatus {
    Success,
    BoundaryReached,
}

/// Swarm tunables.
#[derive(Clone, Debug, PartialEq)]
pub struct PsoParams<T> {
    /// Inertia at the first iteration
    pub w0i: T,
    /// Inertia at the last iteration
    pub w0f: T,
    /// Cognitive coefficient
    pub cp: T,
    /// Social coefficient
    pub cg: T,
    pub n_iterations: usize,
    pub n_particles: usize,
    /// Fixed seed for reproducible runs; `None` seeds from the OS
    pub seed: Option<u64>,
    pub debug: bool,
}

impl<T: RealField + Copy> Default for PsoParams<T> {
    fn default() -> Self {
        Self {
            w0i: nalgebra::convert(0.9),
            w0f: nalgebra::convert(0.4),
            cp: nalgebra::convert(1.5),
            cg: nalgebra::convert(1.5),
            n_iterations: 50,
            n_particles: 200,
            seed: None,
            debug: false,
        }
    }
}

/// Search space plus swarm tunables.
#[derive(Clone, Debug, PartialEq)]
pub struct PsoInput<T> {
    pub lb: Vec<T>,
    pub ub: Vec<T>,
    pub params: PsoParams<T>,
}

impl<T: RealField + Copy> PsoInput<T> {
    pub fn new(lb: Vec<T>, ub: Vec<T>, params: PsoParams<T>) -> Self {
        Self { lb, ub, params }
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.lb.len()
    }

    /// Swap inverted bound pairs so that `lb <= ub` in every dimension.
    pub fn normalize_bounds(&mut self) {
        for (l, u) in self.lb.iter_mut().zip(self.ub.iter_mut()) {
            if *l > *u {
                std::mem::swap(l, u);
            }
        }
    }

    /// Input for retry `attempt` (1-based). A fixed seed moves by one per
    /// attempt so seeded retries start from different swarms; the first
    /// attempt keeps it.
    pub fn for_attempt(&self, attempt: usize) -> Self {
        let mut input = self.clone();
        input.params.seed = self
            .params
            .seed
            .map(|s| s.wrapping_add(attempt.saturating_sub(1) as u64));
        input
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PsoOutput<T> {
    /// Best position found
    pub x: Vec<T>,
    /// Cost at `x`
    pub loss: T,
    /// Global best after initialization and after every iteration
    pub history: Vec<T>,
    pub status: PsoStatus,
    /// True once an iteration improved on the initial swarm
    pub valid_solution: bool,
    /// Iteration of the last improvement, if any
    pub iteration: Option<usize>,
    /// Size of the last improvement
    pub tolerance: T,
}

fn try_alloc<T: Clone>(len: usize, value: T) -> Result<Vec<T>, PsoError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| PsoError::MemoryAllocationFailure(len))?;
    v.resize(len, value);
    Ok(v)
}

#[inline]
fn uniform<T: RealField + Copy>(rng: &mut StdRng) -> T {
    nalgebra::convert(rng.gen::<f64>())
}

fn evaluate_swarm<T, C>(positions: &[T], dims: usize, cost: &C, out: &mut Vec<T>)
where
    T: RealField + Copy,
    C: CostFunction<T> + ?Sized,
{
    positions
        .par_chunks(dims)
        .map(|x| cost.evaluate(x))
        .collect_into_vec(out);
}

/// Index of the smallest comparable cost; later entries win ties.
fn argmin<T: RealField + Copy>(costs: &[T]) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (i, &c) in costs.iter().enumerate() {
        // NaN
        if c.partial_cmp(&c).is_none() {
            continue;
        }
        match best {
            Some((_, b)) if c > b => {}
            _ => best = Some((i, c)),
        }
    }
    best.map(|(i, _)| i)
}

/// Minimize `cost` over the box described by `input`.
pub fn optimize<T, C>(input: &PsoInput<T>, cost: &C) -> Result<PsoOutput<T>, PsoError>
where
    T: RealField + Copy,
    C: CostFunction<T> + ?Sized,
{
    let dims = input.dims();
    let p = &input.params;
    if dims == 0 {
        return Err(PsoError::InvalidBounds("empty search space"));
    }
    if input.ub.len() != dims {
        return Err(PsoError::InvalidBounds("lower and upper bounds differ in length"));
    }
    if p.n_particles == 0 {
        return Err(PsoError::InvalidBounds("no particles"));
    }
    if input
        .lb
        .iter()
        .zip(&input.ub)
        .any(|(l, u)| !l.is_finite() || !u.is_finite() || l > u)
    {
        return Err(PsoError::InvalidBounds("bounds must be finite with lb <= ub"));
    }

    let n = p.n_particles;
    let size = n
        .checked_mul(dims)
        .ok_or(PsoError::MemoryAllocationFailure(usize::MAX))?;
    let mut x = try_alloc(size, T::zero())?;
    let mut v = try_alloc(size, T::zero())?;
    let mut costs: Vec<T> = try_alloc(n, T::zero())?;
    let infinity = T::max_value().unwrap_or_else(|| nalgebra::convert(f64::MAX));
    let mut best_costs = try_alloc(n, infinity)?;

    let mut rng = match p.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let span: Vec<T> = input.lb.iter().zip(&input.ub).map(|(&l, &u)| (u - l).abs()).collect();
    let two: T = nalgebra::convert(2.0);

    for s in 0..n {
        for m in 0..dims {
            let i = s * dims + m;
            x[i] = (input.lb[m] + uniform::<T>(&mut rng) * span[m]).clamp(input.lb[m], input.ub[m]);
            v[i] = uniform::<T>(&mut rng) * span[m] * two - span[m];
        }
    }
    let mut best_x = x.clone();

    evaluate_swarm(&x, dims, cost, &mut costs);
    let first = argmin(&costs).ok_or(PsoError::InitializationFailure)?;
    let mut optimum = costs[first];
    let mut optimum_x = x[first * dims..(first + 1) * dims].to_vec();
    if p.debug {
        debug!("pso: initial optimum {optimum}");
        for m in 0..dims {
            debug!("pso: {m}: [{}, {}]", input.lb[m], input.ub[m]);
        }
    }

    let mut history = Vec::with_capacity(p.n_iterations + 1);
    history.push(optimum);
    let mut valid_solution = false;
    let mut iteration = None;
    let mut tolerance = T::zero();
    let mut previous = infinity;
    let iterations: T = nalgebra::convert(p.n_iterations.max(1) as f64);

    for it in 0..p.n_iterations {
        let k: T = nalgebra::convert(it as f64);
        let w = (p.w0f * k + p.w0i * (iterations - k)) / iterations;
        let cp_rp = p.cp * uniform::<T>(&mut rng);
        let cg_rg = p.cg * uniform::<T>(&mut rng);

        for s in 0..n {
            for m in 0..dims {
                let i = s * dims + m;
                let xi = x[i];
                let mut vi = w * v[i] + cp_rp * (best_x[i] - xi) + cg_rg * (optimum_x[m] - xi);
                let mut next = xi + vi;
                if next < input.lb[m] || next > input.ub[m] {
                    next = next.clamp(input.lb[m], input.ub[m]);
                    vi = uniform::<T>(&mut rng) * span[m] * two - span[m];
                }
                x[i] = next;
                v[i] = vi;
            }
        }

        evaluate_swarm(&x, dims, cost, &mut costs);
        for s in 0..n {
            if costs[s] < best_costs[s] {
                best_costs[s] = costs[s];
                best_x[s * dims..(s + 1) * dims].copy_from_slice(&x[s * dims..(s + 1) * dims]);
            }
        }
        if let Some(s) = argmin(&costs) {
            let min_cost = costs[s];
            if min_cost < optimum {
                optimum = min_cost;
                optimum_x.copy_from_slice(&best_x[s * dims..(s + 1) * dims]);
                valid_solution = true;
                iteration = Some(it);
                tolerance = previous - min_cost;
                previous = min_cost;
                if p.debug {
                    debug!("pso: optimum {optimum} at iteration {it}, particle {s}: {optimum_x:?}");
                }
            }
        }
        history.push(optimum);
    }

    let on_bounds: Vec<usize> = (0..dims)
        .filter(|&m| optimum_x[m] == input.lb[m] || optimum_x[m] == input.ub[m])
        .collect();
    info!("pso: optimum {optimum} valid={valid_solution}");
    let status = if on_bounds.is_empty() {
        PsoStatus::Success
    } else {
        warn!("pso: boundaries reached: {on_bounds:?}");
        PsoStatus::BoundaryReached
    };

    Ok(PsoOutput {
        x: optimum_x,
        loss: optimum,
        history,
        status,
        valid_solution,
        iteration,
        tolerance,
    })
}

/// Outcome of a bounded series of swarm runs.
#[derive(Clone, Debug, Default)]
pub struct SwarmRuns<T> {
    /// Accepted run, or the lowest-loss one when none was accepted
    pub best: Option<PsoOutput<T>>,
    /// Status of the last completed run
    pub last: Option<PsoStatus>,
    pub accepted: bool,
    /// Runs started
    pub runs: usize,
}

/// Run the swarm up to `attempts` times, each with [`PsoInput::for_attempt`],
/// until `accept(attempt, output)` takes a result.
pub fn optimize_runs<T, C, A>(input: &PsoInput<T>, cost: &C, attempts: usize, mut accept: A) -> SwarmRuns<T>
where
    T: RealField + Copy,
    C: CostFunction<T> + ?Sized,
    A: FnMut(usize, &PsoOutput<T>) -> bool,
{
    let mut best: Option<PsoOutput<T>> = None;
    let mut last = None;
    let mut runs = 0;
    let accepted = retry(attempts, |attempt| {
        runs = attempt;
        let out = match optimize(&input.for_attempt(attempt), cost) {
            Ok(out) => out,
            Err(err) => {
                warn!("pso: run {attempt}: {err}");
                return None;
            }
        };
        last = Some(out.status);
        let done = accept(attempt, &out);
        if done || best.as_ref().map_or(true, |b| out.loss < b.loss) {
            best = Some(out);
        }
        done.then_some(())
    })
    .is_some();
    SwarmRuns {
        best,
        last,
        accepted,
        runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(lb: Vec<f64>, ub: Vec<f64>, seed: u64) -> PsoInput<f64> {
        PsoInput::new(
            lb,
            ub,
            PsoParams {
                n_iterations: 60,
                n_particles: 200,
                seed: Some(seed),
                ..PsoParams::default()
            },
        )
    }

    fn shifted_sphere(x: &[f64]) -> f64 {
        (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2)
    }

    #[test]
    fn sphere_converges_for_most_seeds() {
        let hits = (0..20)
            .filter(|&seed| {
                let out = optimize(&input(vec![-5.0, -5.0], vec![5.0, 5.0], seed), &shifted_sphere).unwrap();
                out.loss < 1e-2
            })
            .count();
        assert!(hits >= 19, "only {hits}/20 seeds converged");
    }

    #[test]
    fn history_is_monotone_and_ends_at_loss() {
        let out = optimize(&input(vec![-5.0, -5.0], vec![5.0, 5.0], 3), &shifted_sphere).unwrap();
        assert_eq!(out.history.len(), 61);
        assert!(out.history.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*out.history.last().unwrap(), out.loss);
        assert!(out.valid_solution);
        assert!(out.iteration.is_some());
        assert!((shifted_sphere(&out.x) - out.loss).abs() < 1e-12);
        assert_eq!(out.status, PsoStatus::Success);
    }

    #[test]
    fn same_seed_same_result() {
        let a = optimize(&input(vec![-5.0, -5.0], vec![5.0, 5.0], 11), &shifted_sphere).unwrap();
        let b = optimize(&input(vec![-5.0, -5.0], vec![5.0, 5.0], 11), &shifted_sphere).unwrap();
        assert_eq!(a.x, b.x);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn minimum_on_lower_bound_is_flagged() {
        let out = optimize(&input(vec![0.0], vec![1.0], 5), &|x: &[f64]| x[0]).unwrap();
        assert_eq!(out.status, PsoStatus::BoundaryReached);
        assert_eq!(out.x[0], 0.0);
        assert_eq!(out.loss, 0.0);
    }

    #[test]
    fn nan_everywhere_fails_initialization() {
        let err = optimize(&input(vec![0.0], vec![1.0], 1), &|_: &[f64]| f64::NAN).unwrap_err();
        assert_eq!(err, PsoError::InitializationFailure);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let err = optimize(&input(vec![0.0, 1.0], vec![1.0], 1), &shifted_sphere).unwrap_err();
        assert!(matches!(err, PsoError::InvalidBounds(_)));
        let err = optimize(&input(vec![2.0], vec![1.0], 1), &|x: &[f64]| x[0]).unwrap_err();
        assert!(matches!(err, PsoError::InvalidBounds(_)));

        let mut swapped = input(vec![2.0], vec![1.0], 1);
        swapped.normalize_bounds();
        assert_eq!((swapped.lb[0], swapped.ub[0]), (1.0, 2.0));
    }

    #[test]
    fn works_in_single_precision() {
        let input = PsoInput::<f32>::new(
            vec![-3.0],
            vec![3.0],
            PsoParams {
                seed: Some(2),
                ..PsoParams::default()
            },
        );
        let out = optimize(&input, &|x: &[f32]| (x[0] - 0.5) * (x[0] - 0.5)).unwrap();
        assert!(out.loss < 1e-2);
    }

    #[test]
    fn origin_sphere_converges_for_most_seeds() {
        let sphere = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let hits = (0..20)
            .filter(|&seed| {
                let mut input = input(vec![-10.0, -10.0], vec![10.0, 10.0], seed);
                input.params.n_iterations = 50;
                let out = optimize(&input, &sphere).unwrap();
                out.loss < 1e-2
            })
            .count();
        assert!(hits >= 19, "only {hits}/20 seeds converged");
    }

    #[test]
    fn attempts_shift_a_fixed_seed() {
        let base = input(vec![-5.0, -5.0], vec![5.0, 5.0], 40);
        assert_eq!(base.for_attempt(1).params.seed, Some(40));
        assert_eq!(base.for_attempt(3).params.seed, Some(42));
        assert_eq!(base.for_attempt(0).params.seed, Some(40));
        assert_eq!(base.for_attempt(2).lb, base.lb);

        let mut unseeded = base.clone();
        unseeded.params.seed = None;
        assert_eq!(unseeded.for_attempt(5).params.seed, None);
    }

    #[test]
    fn seeded_runs_differ_between_attempts() {
        let mut short = input(vec![-5.0, -5.0], vec![5.0, 5.0], 9);
        short.params.n_iterations = 2;
        short.params.n_particles = 5;
        let mut seen = Vec::new();
        let runs = optimize_runs(&short, &shifted_sphere, 3, |_, out| {
            seen.push(out.x.clone());
            false
        });
        assert!(!runs.accepted);
        assert_eq!(runs.runs, 3);
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] != w[1]));
        let lowest = seen.iter().map(|x| shifted_sphere(x)).fold(f64::INFINITY, f64::min);
        assert_eq!(runs.best.unwrap().loss, lowest);
    }

    #[test]
    fn accepted_run_stops_the_series() {
        let runs = optimize_runs(&input(vec![-5.0, -5.0], vec![5.0, 5.0], 1), &shifted_sphere, 4, |attempt, _| {
            attempt == 2
        });
        assert!(runs.accepted);
        assert_eq!(runs.runs, 2);
        assert_eq!(runs.last, Some(PsoStatus::Success));
        assert!(runs.best.is_some());
    }

    #[test]
    fn failing_runs_leave_no_best() {
        let runs = optimize_runs(&input(vec![0.0], vec![1.0], 1), &|_: &[f64]| f64::NAN, 3, |_, _| true);
        assert!(!runs.accepted);
        assert_eq!(runs.runs, 3);
        assert!(runs.best.is_none());
        assert!(runs.last.is_none());
    }
}
