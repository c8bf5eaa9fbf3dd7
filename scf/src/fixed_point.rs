//! Fixed-point driver with quasi-Newton mixing.
//!
//! Iterates `y_{k+1} = g(y_k)` toward `y* = g(y*)`, recording each
//! `(iterate, residual)` pair in a bounded window and letting the mixing
//! strategy propose the next iterate. Strictly sequential across
//! iterations; the batched entry point advances independent systems in
//! lockstep with a shared schedule.

use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScfError};
use crate::mixing::{self, MixMethod, MixingHistory};

#[derive(Debug, Clone)]
pub struct FixedPointOptions {
    /// Convergence threshold on `‖g(y) - y‖`, independent of step size.
    pub tolerance: f64,
    pub max_iter: usize,
    pub mixing: MixMethod,
    /// Damping used by the linear step and as the quasi-Newton seed.
    pub alpha: f64,
    /// Capacity of the `(iterate, residual)` window.
    pub history_size: usize,
    /// Consecutive residual increases tolerated before declaring divergence.
    pub divergence_window: usize,
}

impl Default for FixedPointOptions {
    fn default() -> Self {
        FixedPointOptions {
            tolerance: 1e-6,
            max_iter: 50,
            mixing: MixMethod::Pulay,
            alpha: 0.5,
            history_size: 8,
            divergence_window: 5,
        }
    }
}

impl FixedPointOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            return Err(ScfError::InvalidConfiguration(
                "fixed-point tolerance must be positive".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(ScfError::InvalidConfiguration(
                "fixed-point iteration budget must be at least 1".into(),
            ));
        }
        if self.history_size == 0 {
            return Err(ScfError::InvalidConfiguration(
                "mixing history size must be at least 1".into(),
            ));
        }
        if self.divergence_window == 0 {
            return Err(ScfError::InvalidConfiguration(
                "divergence window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedPointStatus {
    /// `‖g(y) - y‖` fell below tolerance.
    Converged,
    /// The residual grew for `divergence_window` consecutive steps.
    Diverged,
    /// The iteration budget ran out; the state is best-effort, the caller
    /// decides whether it is usable.
    MaxIterExceeded,
}

/// Terminal state of one fixed-point solve.
#[derive(Debug, Clone)]
pub struct FixedPointState {
    pub y: DVector<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub status: FixedPointStatus,
}

/// Find `y*` with `g(y*) = y*`. Given identical `y0`, `g` and options the
/// iterate sequence is bit-reproducible: there are no randomized restarts.
pub fn solve<G>(g: G, y0: DVector<f64>, options: &FixedPointOptions) -> Result<FixedPointState>
where
    G: Fn(&DVector<f64>) -> Result<DVector<f64>>,
{
    options.validate()?;

    let mut instance = Instance::new(y0, options.history_size);
    for iter in 0..options.max_iter {
        let step = instance.advance(&g, options, iter)?;
        match step {
            StepOutcome::Converged => {
                info!(
                    "fixed point converged in {} iterations (residual {:.3e})",
                    iter + 1,
                    instance.residual
                );
                return Ok(instance.freeze(iter + 1, FixedPointStatus::Converged));
            }
            StepOutcome::Diverged => {
                info!(
                    "fixed point diverged after {} iterations (residual {:.3e})",
                    iter + 1,
                    instance.residual
                );
                return Ok(instance.freeze(iter + 1, FixedPointStatus::Diverged));
            }
            StepOutcome::Continue => {}
        }
    }
    info!(
        "fixed point exhausted {} iterations (residual {:.3e})",
        options.max_iter, instance.residual
    );
    Ok(instance.freeze(options.max_iter, FixedPointStatus::MaxIterExceeded))
}

/// Advance several independent systems in lockstep: every system performs
/// the same number of iterations and convergence is checked on the
/// aggregate (worst) residual. Map evaluations across the batch run
/// data-parallel; the control flow stays sequential.
pub fn solve_batch<G>(
    g: &G,
    y0s: Vec<DVector<f64>>,
    options: &FixedPointOptions,
) -> Result<Vec<FixedPointState>>
where
    G: Fn(usize, &DVector<f64>) -> Result<DVector<f64>> + Sync,
{
    options.validate()?;
    if y0s.is_empty() {
        return Err(ScfError::InvalidConfiguration(
            "batched solve needs at least one system".into(),
        ));
    }

    let mut instances: Vec<Instance> = y0s
        .into_iter()
        .map(|y0| Instance::new(y0, options.history_size))
        .collect();

    for iter in 0..options.max_iter {
        let maps: Vec<DVector<f64>> = instances
            .par_iter()
            .enumerate()
            .map(|(i, inst)| g(i, &inst.y))
            .collect::<Result<_>>()?;

        let mut worst = 0.0_f64;
        let mut worst_grew = 0usize;
        for (inst, gy) in instances.iter_mut().zip(maps) {
            inst.record(gy)?;
            worst = worst.max(inst.residual);
            worst_grew = worst_grew.max(inst.grew);
        }

        if worst < options.tolerance {
            return Ok(finish(instances, iter + 1, FixedPointStatus::Converged));
        }
        if worst_grew >= options.divergence_window {
            return Ok(finish(instances, iter + 1, FixedPointStatus::Diverged));
        }
        for inst in instances.iter_mut() {
            inst.mix(options)?;
        }
    }
    let max_iter = options.max_iter;
    Ok(finish(instances, max_iter, FixedPointStatus::MaxIterExceeded))
}

fn finish(
    instances: Vec<Instance>,
    iterations: usize,
    status: FixedPointStatus,
) -> Vec<FixedPointState> {
    instances
        .into_iter()
        .map(|inst| inst.freeze(iterations, status))
        .collect()
}

enum StepOutcome {
    Converged,
    Diverged,
    Continue,
}

/// One system's mutable iteration state, owned exclusively by the driver
/// for the duration of a solve.
struct Instance {
    y: DVector<f64>,
    residual: f64,
    grew: usize,
    history: MixingHistory,
}

impl Instance {
    fn new(y0: DVector<f64>, history_size: usize) -> Self {
        Instance {
            y: y0,
            residual: f64::INFINITY,
            grew: 0,
            history: MixingHistory::new(history_size),
        }
    }

    /// Record `g(y)` for the current iterate: push the `(y, r)` pair and
    /// update the residual tracking.
    fn record(&mut self, gy: DVector<f64>) -> Result<()> {
        let r = gy - &self.y;
        let norm = r.norm();
        if !norm.is_finite() {
            return Err(ScfError::NumericalDegeneracy(
                "fixed-point residual is not finite".into(),
            ));
        }
        if norm > self.residual {
            self.grew += 1;
        } else {
            self.grew = 0;
        }
        self.residual = norm;
        self.history.push(self.y.clone(), r);
        Ok(())
    }

    fn mix(&mut self, options: &FixedPointOptions) -> Result<()> {
        self.y = mixing::propose(options.mixing, options.alpha, &self.history)?;
        Ok(())
    }

    fn advance<G>(
        &mut self,
        g: &G,
        options: &FixedPointOptions,
        iter: usize,
    ) -> Result<StepOutcome>
    where
        G: Fn(&DVector<f64>) -> Result<DVector<f64>>,
    {
        let gy = g(&self.y)?;
        self.record(gy)?;
        debug!("iteration {iter}: residual {:.6e}", self.residual);

        if self.residual < options.tolerance {
            return Ok(StepOutcome::Converged);
        }
        if self.grew >= options.divergence_window {
            return Ok(StepOutcome::Diverged);
        }
        self.mix(options)?;
        Ok(StepOutcome::Continue)
    }

    fn freeze(self, iterations: usize, status: FixedPointStatus) -> FixedPointState {
        FixedPointState {
            y: self.y,
            iterations,
            residual: self.residual,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(mixing: MixMethod) -> FixedPointOptions {
        FixedPointOptions {
            mixing,
            alpha: 1.0,
            ..FixedPointOptions::default()
        }
    }

    fn affine(y: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(y * 0.5 + DVector::from_element(y.len(), 1.0))
    }

    #[test]
    fn converges_to_the_affine_fixed_point() {
        // g(y) = 0.5y + 1 has the fixed point y* = 2
        for mixing in [MixMethod::Linear, MixMethod::Pulay, MixMethod::Broyden] {
            let state = solve(affine, DVector::zeros(1), &options(mixing)).unwrap();
            assert_eq!(state.status, FixedPointStatus::Converged);
            assert!(
                (state.y[0] - 2.0).abs() < 1e-6,
                "{mixing:?} ended at {}",
                state.y[0]
            );
            assert!(state.iterations <= 30);
        }
    }

    #[test]
    fn pulay_needs_only_a_handful_of_iterations_on_affine_maps() {
        let state = solve(affine, DVector::zeros(1), &options(MixMethod::Pulay)).unwrap();
        assert!(state.iterations <= 4, "took {}", state.iterations);
    }

    #[test]
    fn restarting_from_the_fixed_point_is_idempotent() {
        let opts = options(MixMethod::Pulay);
        let first = solve(affine, DVector::zeros(1), &opts).unwrap();
        let second = solve(affine, first.y.clone(), &opts).unwrap();
        assert_eq!(second.status, FixedPointStatus::Converged);
        assert!(second.iterations <= 2, "took {}", second.iterations);
    }

    #[test]
    fn iterate_sequence_is_deterministic() {
        let opts = options(MixMethod::Broyden);
        let a = solve(affine, DVector::zeros(1), &opts).unwrap();
        let b = solve(affine, DVector::zeros(1), &opts).unwrap();
        assert_eq!(a.y, b.y);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn expanding_map_is_flagged_as_diverged() {
        // g(y) = 2y + 1 pushes the iterate away from the repelling point
        let g = |y: &DVector<f64>| Ok(y * 2.0 + DVector::from_element(1, 1.0));
        let opts = FixedPointOptions {
            mixing: MixMethod::Linear,
            alpha: 1.0,
            divergence_window: 3,
            ..FixedPointOptions::default()
        };
        let state = solve(g, DVector::from_element(1, 1.0), &opts).unwrap();
        assert_eq!(state.status, FixedPointStatus::Diverged);
        assert!(state.iterations < opts.max_iter);
    }

    #[test]
    fn exhausted_budget_is_reported_not_hidden() {
        let opts = FixedPointOptions {
            max_iter: 3,
            tolerance: 1e-12,
            mixing: MixMethod::Linear,
            alpha: 0.1,
            ..FixedPointOptions::default()
        };
        let state = solve(affine, DVector::zeros(1), &opts).unwrap();
        assert_eq!(state.status, FixedPointStatus::MaxIterExceeded);
        assert_eq!(state.iterations, 3);
        assert!(state.residual > 0.0);
    }

    #[test]
    fn non_finite_map_output_is_fatal() {
        let g = |_: &DVector<f64>| Ok(DVector::from_element(1, f64::NAN));
        let err = solve(g, DVector::zeros(1), &FixedPointOptions::default()).unwrap_err();
        assert!(matches!(err, ScfError::NumericalDegeneracy(_)));
    }

    #[test]
    fn zero_tolerance_is_rejected_before_iterating() {
        let opts = FixedPointOptions {
            tolerance: 0.0,
            ..FixedPointOptions::default()
        };
        assert!(matches!(
            solve(affine, DVector::zeros(1), &opts),
            Err(ScfError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn batch_advances_in_lockstep_and_matches_solo_results() {
        let g = |_: usize, y: &DVector<f64>| affine(y);
        let states = solve_batch(&g, vec![DVector::zeros(1), DVector::from_element(1, 5.0)], &options(MixMethod::Linear)).unwrap();
        assert_eq!(states.len(), 2);
        // shared schedule: both report the same iteration count and status
        assert_eq!(states[0].iterations, states[1].iterations);
        assert_eq!(states[0].status, FixedPointStatus::Converged);
        for state in &states {
            assert!((state.y[0] - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn empty_batch_is_invalid() {
        let g = |_: usize, y: &DVector<f64>| affine(y);
        assert!(matches!(
            solve_batch(&g, vec![], &FixedPointOptions::default()),
            Err(ScfError::InvalidConfiguration(_))
        ));
    }
}
