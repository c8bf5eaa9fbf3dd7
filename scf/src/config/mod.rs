//! Configuration management for self-consistent-field calculations.
//!
//! YAML sections map onto serde structs with optional fields completed by
//! `with_defaults()`. Strategy names are parsed into closed enums exactly
//! once, here; nothing downstream compares method strings.

mod args;

pub use args::Args;

use serde::{Deserialize, Serialize};

use crate::adjoint::AdjointOptions;
use crate::eigen_impl::{EigenMethod, EigenOptions};
use crate::error::Result;
use crate::fixed_point::FixedPointOptions;
use crate::ks::{ExternalParams, KsOptions};
use crate::mixing::MixMethod;

/// Main configuration structure.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub system: SystemParams,
    #[serde(default)]
    pub scf_params: ScfParams,
    pub eigen_params: Option<EigenParams>,
    pub gradient: Option<GradientParams>,
}

/// Model-system parameters: one atom on a well-tempered Gaussian radial
/// basis over a logarithmic grid.
#[derive(Debug, Deserialize, Serialize)]
pub struct SystemParams {
    pub atomz: f64,
    pub numel: f64,
    pub vext_strength: Option<f64>,
    pub basis_size: Option<usize>,
    pub width_min: Option<f64>,
    pub width_max: Option<f64>,
    pub grid_points: Option<usize>,
    pub grid_rmin: Option<f64>,
    pub grid_rmax: Option<f64>,
}

impl SystemParams {
    pub fn with_defaults(mut self) -> Self {
        if self.vext_strength.is_none() {
            self.vext_strength = Some(0.0);
        }
        if self.basis_size.is_none() {
            self.basis_size = Some(8);
        }
        if self.width_min.is_none() {
            self.width_min = Some(0.15);
        }
        if self.width_max.is_none() {
            self.width_max = Some(8.0);
        }
        if self.grid_points.is_none() {
            self.grid_points = Some(300);
        }
        if self.grid_rmin.is_none() {
            self.grid_rmin = Some(1e-4);
        }
        if self.grid_rmax.is_none() {
            self.grid_rmax = Some(50.0);
        }
        self
    }
}

/// Self-consistency parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ScfParams {
    pub convergence_threshold: Option<f64>,
    pub max_cycle: Option<usize>,
    pub mixing_method: Option<String>,
    pub mixing_alpha: Option<f64>,
    pub history_size: Option<usize>,
    pub divergence_window: Option<usize>,
}

impl ScfParams {
    pub fn with_defaults(mut self) -> Self {
        if self.convergence_threshold.is_none() {
            self.convergence_threshold = Some(1e-6);
        }
        if self.max_cycle.is_none() {
            self.max_cycle = Some(100);
        }
        if self.mixing_method.is_none() {
            self.mixing_method = Some("pulay".to_string());
        }
        if self.mixing_alpha.is_none() {
            self.mixing_alpha = Some(0.5);
        }
        if self.history_size.is_none() {
            self.history_size = Some(8);
        }
        if self.divergence_window.is_none() {
            self.divergence_window = Some(5);
        }
        self
    }
}

/// Eigensolver parameters. When no method is named the strategy is picked
/// by the small-system threshold on the basis dimension.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EigenParams {
    pub method: Option<String>,
    pub tolerance: Option<f64>,
    pub max_expansions: Option<usize>,
    pub exact_threshold: Option<usize>,
}

impl EigenParams {
    pub fn with_defaults(mut self) -> Self {
        if self.tolerance.is_none() {
            self.tolerance = Some(1e-8);
        }
        if self.max_expansions.is_none() {
            self.max_expansions = Some(200);
        }
        if self.exact_threshold.is_none() {
            self.exact_threshold = Some(100);
        }
        self
    }
}

/// Implicit-differentiation parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GradientParams {
    pub enabled: Option<bool>,
    pub tolerance: Option<f64>,
    pub max_krylov: Option<usize>,
    pub fd_step: Option<f64>,
}

impl GradientParams {
    pub fn with_defaults(mut self) -> Self {
        if self.enabled.is_none() {
            self.enabled = Some(false);
        }
        if self.tolerance.is_none() {
            self.tolerance = Some(1e-8);
        }
        if self.max_krylov.is_none() {
            self.max_krylov = Some(100);
        }
        if self.fd_step.is_none() {
            self.fd_step = Some(1e-5);
        }
        self
    }
}

impl Config {
    /// Apply defaults to all configuration sections.
    pub fn with_defaults(mut self) -> Self {
        self.system = self.system.with_defaults();
        self.scf_params = self.scf_params.with_defaults();
        self.eigen_params = Some(self.eigen_params.take().unwrap_or_default().with_defaults());
        if let Some(gradient) = self.gradient.take() {
            self.gradient = Some(gradient.with_defaults());
        }
        self
    }

    pub fn gradient_enabled(&self) -> bool {
        self.gradient
            .as_ref()
            .and_then(|g| g.enabled)
            .unwrap_or(false)
    }

    /// The typed manifest of differentiable parameters.
    pub fn external_params(&self) -> ExternalParams {
        ExternalParams {
            atomz: self.system.atomz,
            vext_strength: self.system.vext_strength.unwrap_or(0.0),
        }
    }

    /// Resolve the configuration into engine options. Method names are
    /// parsed here, once; unknown names fail before any iteration starts.
    pub fn ks_options(&self) -> Result<KsOptions> {
        let scf = &self.scf_params;
        let mixing: MixMethod = scf
            .mixing_method
            .as_deref()
            .unwrap_or("pulay")
            .parse()?;
        let fixed_point = FixedPointOptions {
            tolerance: scf.convergence_threshold.unwrap_or(1e-6),
            max_iter: scf.max_cycle.unwrap_or(100),
            mixing,
            alpha: scf.mixing_alpha.unwrap_or(0.5),
            history_size: scf.history_size.unwrap_or(8),
            divergence_window: scf.divergence_window.unwrap_or(5),
        };

        let eigen_defaults = EigenParams::default().with_defaults();
        let eigen_params = self.eigen_params.as_ref().unwrap_or(&eigen_defaults);
        let method = match eigen_params.method.as_deref() {
            Some(name) => name.parse()?,
            None => {
                // dense path below the small-system cutoff, iterative above
                let nbasis = self.system.basis_size.unwrap_or(8);
                if nbasis < eigen_params.exact_threshold.unwrap_or(100) {
                    EigenMethod::Exact
                } else {
                    EigenMethod::Davidson
                }
            }
        };
        let eigen = EigenOptions {
            method,
            tolerance: eigen_params.tolerance.unwrap_or(1e-8),
            max_expansions: eigen_params.max_expansions.unwrap_or(200),
            ..EigenOptions::default()
        };

        let gradient_defaults = GradientParams::default().with_defaults();
        let gradient = self.gradient.as_ref().unwrap_or(&gradient_defaults);
        let adjoint = AdjointOptions {
            tolerance: gradient.tolerance.unwrap_or(1e-8),
            max_krylov: gradient.max_krylov.unwrap_or(100),
        };

        let options = KsOptions {
            fixed_point,
            eigen,
            adjoint,
            fd_step: gradient.fd_step.unwrap_or(1e-5),
        };
        options.fixed_point.validate()?;
        Ok(options)
    }
}
