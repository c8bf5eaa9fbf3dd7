//! Persistence of converged solutions.
//!
//! The snapshot holds the converged Fock iterate, density matrix,
//! eigenvalues, energy and the external parameters that produced them —
//! enough to recheck `g(y*) ≈ y*` after a reload with
//! `KohnSham::verify_solution`.

use color_eyre::eyre::{Result, WrapErr};
use std::fs::File;
use tracing::info;

use crate::ks::KsSolution;

pub fn save_solution(path: &str, solution: &KsSolution) -> Result<()> {
    let file = File::create(path).wrap_err_with(|| format!("unable to create {path}"))?;
    serde_json::to_writer_pretty(file, solution)
        .wrap_err("failed to serialize the solution snapshot")?;
    info!("solution snapshot written to {}", path);
    Ok(())
}

pub fn load_solution(path: &str) -> Result<KsSolution> {
    let file = File::open(path).wrap_err_with(|| format!("unable to open {path}"))?;
    serde_json::from_reader(file).wrap_err("failed to parse the solution snapshot")
}
