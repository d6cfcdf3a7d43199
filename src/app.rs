//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - layers defaults, config file, environment and flags into one `PipelineConfig`
//! - dispatches to the pipeline steps in `pipeline`
//! - prints the run table and status counts

use std::time::Duration;

use clap::Parser;

use crate::audit::{AuditStore, run_id};
use crate::cli::{BackendKind, Cli, Command, GlobalArgs, PointArgs, RefineArgs, RunArgs, SigmaScanArgs};
use crate::domain::{CaseSpec, PerturbationParameters, PipelineConfig, RunRecord};
use crate::eos::{EquationOfState, catalog};
use crate::error::AppError;
use crate::refine::{CancellationToken, InProcessBackend, ProcessBackend, SolverBackend};
use crate::solver::FractionalMapping;

pub mod pipeline;

/// Entry point for the `tov` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.global)?;
    tracing::debug!(?config, "resolved configuration");

    match cli.command {
        Command::Run(args) => handle_run(config, &cli.global, args),
        Command::Point(args) => handle_point(config, args),
        Command::Classify => handle_classify(config),
        Command::Refine(args) => handle_refine(config, &cli.global, args),
        Command::SigmaScan(args) => handle_sigma_scan(config, args),
    }
}

/// Defaults, then the config file, then `.env`/environment, then flags.
pub fn resolve_config(global: &GlobalArgs) -> Result<PipelineConfig, AppError> {
    let mut config = match &global.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;
    apply_flags(&mut config, global);
    config.validate()?;
    Ok(config)
}

fn apply_flags(config: &mut PipelineConfig, global: &GlobalArgs) {
    if global.fast {
        config.fast = true;
    }
    if let Some(dir) = &global.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(seed) = global.seed {
        config.seed = seed;
    }
    if global.store_profiles {
        config.solver.store_profiles = true;
    }
}

fn print_summary(records: &[RunRecord]) {
    println!("{}", crate::report::format_run_table(records));
    println!("{}", crate::report::format_status_counts(records));
}

fn handle_run(mut config: PipelineConfig, global: &GlobalArgs, args: RunArgs) -> Result<(), AppError> {
    if let Some(sigma) = args.sigma {
        config.sigma = sigma;
        config.validate()?;
    }
    let store = AuditStore::open(&config.output_dir)?;
    let eos = pipeline::resolve_eos(&args.eos)?;
    let jobs = pipeline::canonical_jobs(&eos, config.sigma);
    tracing::info!(jobs = jobs.len(), fast = config.fast, dir = %config.output_dir.display(), "canonical runs");

    pipeline::run_jobs(&config, &FractionalMapping, &store, &jobs)?;
    if args.refine {
        refine_with(&config, global, &store, RefineArgs::default())?;
    }
    let primary = pipeline::write_tables(&store)?;
    print_summary(&primary);
    Ok(())
}

fn handle_point(config: PipelineConfig, args: PointArgs) -> Result<(), AppError> {
    let store = AuditStore::open(&config.output_dir)?;
    let eos = catalog::by_name(&args.eos)?;
    let case = CaseSpec {
        label: args.case.clone(),
        variant: args.variant.into(),
        params: PerturbationParameters {
            sigma: args.sigma,
            chi: args.chi,
            screening_factor: args.screening,
            include_in_gravity: args.include_in_gravity,
        },
    };
    let mut settings = config.solver;
    if let Some(v) = args.max_step_cm {
        settings.max_step_cm = v;
    }
    if let Some(v) = args.rtol {
        settings.rtol = v;
    }
    if let Some(v) = args.atol {
        settings.atol = v;
    }
    settings.validate()?;

    let id = args.run_id.unwrap_or_else(|| run_id(eos.name(), &case.label));
    let job = pipeline::Job { eos, case };
    let record = pipeline::run_case(&config, &FractionalMapping, &store, &job, &id, settings, args.n_points)?;
    print_summary(std::slice::from_ref(&record));
    Ok(())
}

fn handle_classify(config: PipelineConfig) -> Result<(), AppError> {
    let store = AuditStore::open(&config.output_dir)?;
    let records = pipeline::classify_stored(&config, &store)?;
    if records.is_empty() {
        return Err(AppError::new(
            3,
            format!("No stored runs under '{}'.", store.diagnostics_dir().display()),
        ));
    }
    let primary = pipeline::write_tables(&store)?;
    print_summary(&primary);
    Ok(())
}

fn handle_refine(config: PipelineConfig, global: &GlobalArgs, args: RefineArgs) -> Result<(), AppError> {
    let store = AuditStore::open(&config.output_dir)?;
    refine_with(&config, global, &store, args)?;
    let primary = pipeline::write_tables(&store)?;
    print_summary(&primary);
    Ok(())
}

fn refine_with(
    config: &PipelineConfig,
    global: &GlobalArgs,
    store: &AuditStore,
    args: RefineArgs,
) -> Result<(), AppError> {
    let mut config = config.clone();
    if let Some(n) = args.max_retries {
        config.refinement.max_retries = n;
    }
    if args.retry_not_run {
        config.refinement.retry_not_run = true;
    }
    if let Some(secs) = args.timeout_secs {
        config.refinement.timeout_secs = secs;
    }
    config.validate()?;

    let in_process;
    let process;
    let backend: &dyn SolverBackend = match args.backend {
        BackendKind::InProcess => {
            in_process = InProcessBackend::new(&config, &FractionalMapping);
            &in_process
        }
        BackendKind::Process => {
            let timeout = Duration::from_secs(config.refinement.timeout_secs);
            process = ProcessBackend::current_exe(&config.output_dir, timeout)?.with_config(global.config.clone());
            &process
        }
    };

    let outcomes = pipeline::refine_stored(&config, store, backend, CancellationToken::new())?;
    for o in &outcomes {
        tracing::info!(run_id = %o.run_id, attempts = o.attempts, terminal = ?o.terminal, "refined");
    }
    println!("Refined {} run(s) with the {} backend.", outcomes.len(), backend.name());
    Ok(())
}

fn handle_sigma_scan(config: PipelineConfig, args: SigmaScanArgs) -> Result<(), AppError> {
    let sigmas = if args.sigma.is_empty() {
        config.sigma_grid.clone()
    } else {
        args.sigma
    };
    if sigmas.len() < 3 || sigmas.iter().any(|s| !s.is_finite()) {
        return Err(AppError::config("The σ scan needs at least 3 finite σ values."));
    }
    let store = AuditStore::open(&config.output_dir)?;
    let eos = pipeline::resolve_eos(&args.eos)?;
    let jobs = pipeline::sigma_scan_jobs(&eos, &sigmas);
    tracing::info!(jobs = jobs.len(), sigmas = ?sigmas, "sigma scan");

    let records = pipeline::run_jobs(&config, &FractionalMapping, &store, &jobs)?;
    pipeline::write_tables(&store)?;
    print_summary(&records);
    Ok(())
}
