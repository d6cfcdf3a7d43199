//! Command-line parsing for the `tov` audit pipeline.
//!
//! Parsing stays separate from the solver and audit code; `app` turns these
//! arguments into one `PipelineConfig` and dispatches.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::Variant;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "tov",
    version,
    about = "TOV + tidal deformability scans with a classification and refinement audit"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand. CLI values override the config file
/// and the environment.
#[derive(Debug, Args, Clone, Default)]
pub struct GlobalArgs {
    /// JSON configuration file (defaults apply to anything it omits).
    #[arg(long, global = true, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Use the smaller fast-mode density ladder.
    #[arg(long, global = true)]
    pub fast: bool,

    /// Root directory for run dossiers and tables.
    #[arg(long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Seed recorded in every run's metadata.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Keep radial profiles and write profile.csv per run.
    #[arg(long, global = true)]
    pub store_profiles: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the canonical cases (A_baseline, B_legacy, C_sigma_chi) for each EOS.
    Run(RunArgs),
    /// Compute a single (EOS, case) point and write its run directory.
    ///
    /// This is what the process backend invokes for each refinement attempt.
    Point(PointArgs),
    /// Re-classify every stored run with the current thresholds.
    Classify,
    /// Retry diagnostic, excluded and non-converged runs along the refinement ladder.
    Refine(RefineArgs),
    /// Run Variant A at each σ of the σ grid for each EOS.
    SigmaScan(SigmaScanArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct RunArgs {
    /// EOS names to run (default: the full catalogue).
    #[arg(long = "eos", value_name = "NAME")]
    pub eos: Vec<String>,

    /// σ used by the perturbed canonical cases.
    #[arg(long)]
    pub sigma: Option<f64>,

    /// Refine unclean runs right after classification.
    #[arg(long)]
    pub refine: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PointArgs {
    #[arg(long)]
    pub eos: String,

    /// Case label; part of the run identity.
    #[arg(long)]
    pub case: String,

    #[arg(long, value_enum, default_value_t = VariantArg::A)]
    pub variant: VariantArg,

    #[arg(long, default_value_t = 0.0)]
    pub sigma: f64,

    #[arg(long, default_value_t = 1.0)]
    pub chi: f64,

    #[arg(long, default_value_t = 1.0)]
    pub screening: f64,

    /// Feed the inertial increment into the gravitational source terms.
    #[arg(long)]
    pub include_in_gravity: bool,

    /// Run id (default: derived from EOS and case).
    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long)]
    pub max_step_cm: Option<f64>,

    #[arg(long)]
    pub rtol: Option<f64>,

    #[arg(long)]
    pub atol: Option<f64>,

    /// Density ladder size (default: from configuration).
    #[arg(long)]
    pub n_points: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    #[value(name = "A")]
    A,
    #[value(name = "B_exploratory")]
    BExploratory,
}

impl From<VariantArg> for Variant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::A => Variant::A,
            VariantArg::BExploratory => Variant::BExploratory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// Call the scanner directly.
    #[default]
    InProcess,
    /// Spawn `tov point` per attempt, bounded by the configured timeout.
    Process,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RefineArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::InProcess)]
    pub backend: BackendKind,

    /// Override the retry budget.
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Also run canonical (EOS, case) pairs that have no stored record yet.
    #[arg(long)]
    pub retry_not_run: bool,

    /// Per-attempt timeout for the process backend, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct SigmaScanArgs {
    #[arg(long = "eos", value_name = "NAME")]
    pub eos: Vec<String>,

    /// σ values (default: the configured grid).
    #[arg(long = "sigma", value_name = "SIGMA", num_args = 1..)]
    pub sigma: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_arguments_parse() {
        let cli = Cli::parse_from([
            "tov",
            "--output-dir",
            "/tmp/x",
            "point",
            "--eos",
            "SLy",
            "--case",
            "B_legacy",
            "--variant",
            "B_exploratory",
            "--sigma",
            "0.06",
            "--include-in-gravity",
            "--rtol",
            "1e-7",
        ]);
        assert_eq!(cli.global.output_dir, Some(PathBuf::from("/tmp/x")));
        let Command::Point(p) = cli.command else {
            panic!("expected point");
        };
        assert_eq!(p.variant, VariantArg::BExploratory);
        assert!(p.include_in_gravity);
        assert_eq!(p.rtol, Some(1e-7));
        assert_eq!(p.chi, 1.0);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from(["tov", "sigma-scan", "--fast", "--sigma", "0.01", "0.02", "0.03"]);
        assert!(cli.global.fast);
        let Command::SigmaScan(s) = cli.command else {
            panic!("expected sigma-scan");
        };
        assert_eq!(s.sigma, vec![0.01, 0.02, 0.03]);
    }

    #[test]
    fn refine_defaults_to_in_process() {
        let cli = Cli::parse_from(["tov", "refine"]);
        let Command::Refine(r) = cli.command else {
            panic!("expected refine");
        };
        assert_eq!(r.backend, BackendKind::InProcess);
    }
}
