//! Quasi-Newton mixing over a bounded history of past iterates.
//!
//! The fixed-point driver records `(iterate, residual)` pairs in a
//! fixed-capacity window; `propose` is a pure function over the window's
//! contents producing the next iterate. Plain damped substitution is only
//! linearly convergent and may oscillate, so the default strategies
//! extrapolate over the stored history.

use nalgebra::{DMatrix, DVector};
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, ScfError};

/// Mixing strategy, resolved once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMethod {
    /// Damped substitution: `y + α r`.
    Linear,
    /// DIIS extrapolation over the residual Gram matrix.
    Pulay,
    /// Limited-memory Broyden (second kind) inverse-Jacobian update.
    Broyden,
}

impl FromStr for MixMethod {
    type Err = ScfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "pulay" | "diis" => Ok(Self::Pulay),
            "broyden" => Ok(Self::Broyden),
            other => Err(ScfError::InvalidConfiguration(format!(
                "unknown mixing method: {other}"
            ))),
        }
    }
}

/// Bounded window of past `(iterate, residual)` pairs. Once the window is
/// full the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct MixingHistory {
    iterates: Vec<DVector<f64>>,
    residuals: Vec<DVector<f64>>,
    capacity: usize,
}

impl MixingHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "mixing history needs capacity >= 1");
        MixingHistory {
            iterates: Vec::with_capacity(capacity),
            residuals: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, iterate: DVector<f64>, residual: DVector<f64>) {
        if self.iterates.len() >= self.capacity {
            self.iterates.remove(0);
            self.residuals.remove(0);
        }
        self.iterates.push(iterate);
        self.residuals.push(residual);
    }

    pub fn len(&self) -> usize {
        self.iterates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterates.is_empty()
    }

    pub fn clear(&mut self) {
        self.iterates.clear();
        self.residuals.clear();
    }

    fn last(&self) -> (&DVector<f64>, &DVector<f64>) {
        let m = self.iterates.len();
        (&self.iterates[m - 1], &self.residuals[m - 1])
    }
}

/// Propose the next iterate from the history window.
pub fn propose(method: MixMethod, alpha: f64, history: &MixingHistory) -> Result<DVector<f64>> {
    if history.is_empty() {
        return Err(ScfError::InvalidConfiguration(
            "mixing requires at least one (iterate, residual) pair".into(),
        ));
    }
    match method {
        MixMethod::Linear => Ok(damped_step(alpha, history)),
        MixMethod::Pulay => Ok(pulay_step(alpha, history)),
        MixMethod::Broyden => Ok(broyden_step(alpha, history)),
    }
}

fn damped_step(alpha: f64, history: &MixingHistory) -> DVector<f64> {
    let (y, r) = history.last();
    y + r * alpha
}

/// DIIS over the stored residuals: minimize `‖Σ cᵢ rᵢ‖²` subject to
/// `Σ cᵢ = 1`, then extrapolate `Σ cᵢ (yᵢ + α rᵢ)`. Falls back to the
/// damped step while the window holds fewer than two pairs or when the
/// augmented system is singular.
fn pulay_step(alpha: f64, history: &MixingHistory) -> DVector<f64> {
    let m = history.len();
    if m < 2 {
        return damped_step(alpha, history);
    }

    let mut aug = DMatrix::zeros(m + 1, m + 1);
    for i in 0..m {
        for j in 0..m {
            aug[(i, j)] = history.residuals[i].dot(&history.residuals[j]);
        }
        aug[(i, m)] = -1.0;
        aug[(m, i)] = -1.0;
    }
    let mut rhs = DVector::zeros(m + 1);
    rhs[m] = -1.0;

    let coeffs = match aug.lu().solve(&rhs) {
        Some(c) => c,
        None => {
            debug!("DIIS extrapolation failed: singular system, falling back to damped step");
            return damped_step(alpha, history);
        }
    };

    let mut next = DVector::zeros(history.iterates[0].len());
    for i in 0..m {
        next += (&history.iterates[i] + &history.residuals[i] * alpha) * coeffs[i];
    }
    next
}

/// Limited-memory Broyden's second method. Builds the inverse-Jacobian
/// approximation `H` from the secant pairs in the window, starting from
/// `H₀ = -αI` so the first step coincides with damped substitution, and
/// proposes `y - H r`.
fn broyden_step(alpha: f64, history: &MixingHistory) -> DVector<f64> {
    let m = history.len();
    if m < 2 {
        return damped_step(alpha, history);
    }

    let (y_last, r_last) = history.last();

    // secant pairs: s_i = y_{i+1} - y_i, t_i = r_{i+1} - r_i
    let mut us: Vec<DVector<f64>> = Vec::with_capacity(m - 1);
    let mut ts: Vec<DVector<f64>> = Vec::with_capacity(m - 1);
    for i in 0..m - 1 {
        let s = &history.iterates[i + 1] - &history.iterates[i];
        let t = &history.residuals[i + 1] - &history.residuals[i];
        let tt = t.dot(&t);
        if tt < 1e-30 {
            continue;
        }
        let mut h_t = &t * (-alpha);
        for (u, tj) in us.iter().zip(ts.iter()) {
            h_t += u * tj.dot(&t);
        }
        us.push((s - h_t) / tt);
        ts.push(t);
    }

    let mut h_r = r_last * (-alpha);
    for (u, t) in us.iter().zip(ts.iter()) {
        h_r += u * t.dot(r_last);
    }
    y_last - h_r
}
