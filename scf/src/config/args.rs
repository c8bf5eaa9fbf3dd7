//! Command-line argument parsing.

use clap::Parser;

/// Self-consistent-field calculation with YAML configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config_file: String,

    /// Override maximum SCF cycles
    #[arg(long)]
    pub max_cycle: Option<usize>,

    /// Override convergence threshold
    #[arg(long)]
    pub convergence_threshold: Option<f64>,

    /// Override mixing method (linear, pulay, broyden)
    #[arg(long)]
    pub mixing: Option<String>,

    /// Override output file (default stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compute dE/dθ for the external-parameter manifest
    #[arg(long)]
    pub gradient: bool,

    /// Write the converged solution snapshot to this path
    #[arg(long)]
    pub snapshot: Option<String>,
}
