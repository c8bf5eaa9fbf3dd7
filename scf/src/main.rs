//! Self-consistent-field command-line interface.
//!
//! Runs the single-atom model system described by a YAML configuration,
//! reports eigenvalues and total energy, optionally differentiates the
//! energy with respect to the external-parameter manifest, and persists
//! the converged solution.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::fs;
use tracing::{info, warn};

use hamilton::{DiracExchange, GaussAtomHamiltonian, RadialGrid};
use scf::config::{Args, Config};
use scf::fixed_point::FixedPointStatus;
use scf::io;
use scf::ks::{ExternalParams, KohnSham};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    io::setup_output(args.output.as_ref());

    info!("Reading configuration from: {}", args.config_file);
    let content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;

    let mut config: Config = serde_yml::from_str::<Config>(&content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();

    // Command-line overrides
    if let Some(mc) = args.max_cycle {
        info!("Overriding max_cycle with: {}", mc);
        config.scf_params.max_cycle = Some(mc);
    }
    if let Some(threshold) = args.convergence_threshold {
        info!("Overriding convergence_threshold with: {}", threshold);
        config.scf_params.convergence_threshold = Some(threshold);
    }
    if let Some(ref mixing) = args.mixing {
        info!("Overriding mixing_method with: {}", mixing);
        config.scf_params.mixing_method = Some(mixing.clone());
    }

    let options = config.ks_options()?;

    // Build the model system
    let system = &config.system;
    let grid = RadialGrid::logspace(
        system.grid_rmin.unwrap_or(1e-4),
        system.grid_rmax.unwrap_or(50.0),
        system.grid_points.unwrap_or(300),
    );
    let widths = GaussAtomHamiltonian::well_tempered_widths(
        system.width_min.unwrap_or(0.15),
        system.width_max.unwrap_or(8.0),
        system.basis_size.unwrap_or(8),
    );
    let hamiltonian = GaussAtomHamiltonian::new(grid, widths);
    let xc = DiracExchange::new();

    let ks = KohnSham::new(&hamiltonian, &xc, system.numel, options)?;
    let params = config.external_params();

    info!(
        "\nStarting self-consistency for Z = {}, {} electrons, {} basis functions...\n",
        params.atomz,
        system.numel,
        hamiltonian.gwidths().len()
    );
    let solution = ks.solve(&params, None)?;

    match solution.status {
        FixedPointStatus::Converged => {}
        FixedPointStatus::MaxIterExceeded => warn!(
            "iteration budget exhausted; results are best-effort (residual {:.3e})",
            solution.residual
        ),
        FixedPointStatus::Diverged => warn!(
            "self-consistency diverged; results are best-effort (residual {:.3e})",
            solution.residual
        ),
    }

    info!("\nFinal energy levels:");
    for (i, energy) in solution.eigenvalues.iter().enumerate() {
        info!("  Level {}: {:.8} au", i + 1, energy);
    }
    info!("\nTotal energy: {:.10} au", solution.energy);

    if args.gradient || config.gradient_enabled() {
        info!("\nDifferentiating the total energy at the fixed point...");
        let grad = ks.energy_gradient(&solution)?;
        for (label, value) in ExternalParams::LABELS.iter().zip(grad.iter()) {
            info!("  dE/d({}) = {:.8}", label, value);
        }
    }

    if let Some(ref path) = args.snapshot {
        io::save_solution(path, &solution)?;
    }

    Ok(())
}
