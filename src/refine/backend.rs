//! Where refinement attempts are computed.
//!
//! A backend never fails outright: anything that goes wrong while computing
//! an attempt comes back as a `converged = false` record carrying the error
//! message, so the controller can log it and move on.

use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::audit::store::SUMMARY_FILE;
use crate::audit::{DiscretizationAuditor, build_record, failed_record};
use crate::domain::{CaseSpec, PipelineConfig, RunRecord, SolverSettings};
use crate::eos::catalog;
use crate::error::AppError;
use crate::solver::InertialMapping;

/// Everything needed to compute one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRequest {
    pub run_tag: String,
    pub eos: String,
    pub case: CaseSpec,
    pub settings: SolverSettings,
    pub n_points: usize,
}

pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute an unclassified record for `req`.
    fn run(&self, req: &AttemptRequest) -> RunRecord;
}

/// Runs the scanner in this process.
pub struct InProcessBackend<'a> {
    config: &'a PipelineConfig,
    mapping: &'a dyn InertialMapping,
}

impl<'a> InProcessBackend<'a> {
    pub fn new(config: &'a PipelineConfig, mapping: &'a dyn InertialMapping) -> Self {
        Self { config, mapping }
    }

    fn try_run(&self, req: &AttemptRequest) -> Result<RunRecord, AppError> {
        let eos = catalog::by_name(&req.eos)?;
        let auditor = DiscretizationAuditor::new(self.config, self.mapping);
        let audit = auditor.audit(&eos, &req.case, req.settings, Some(req.n_points))?;
        Ok(build_record(
            &req.run_tag,
            &eos,
            &req.case,
            req.settings,
            &audit,
            self.config.scan.target_mass_msun,
        ))
    }
}

impl SolverBackend for InProcessBackend<'_> {
    fn name(&self) -> &'static str {
        "in_process"
    }

    fn run(&self, req: &AttemptRequest) -> RunRecord {
        self.try_run(req).unwrap_or_else(|err| {
            failed_record(&req.run_tag, &req.eos, &req.case, req.settings, err.message())
        })
    }
}

/// Runs `tov point ...` as a child process bounded by a timeout and reads
/// the `summary.json` it leaves in the attempt's run directory.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    /// Arguments placed before the `point` subcommand arguments.
    leading_args: Vec<String>,
    output_dir: PathBuf,
    config_path: Option<PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            output_dir: output_dir.into(),
            config_path: None,
            timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// The currently running `tov` executable.
    pub fn current_exe(output_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, AppError> {
        let exe = std::env::current_exe()
            .map_err(|e| AppError::config(format!("Cannot locate the tov executable: {e}")))?;
        Ok(Self::new(exe, output_dir, timeout))
    }

    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Forward a config file so the child resolves the same settings.
    pub fn with_config(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    fn point_args(&self, req: &AttemptRequest) -> Vec<String> {
        let p = &req.case.params;
        let mut args = vec![
            "point".to_string(),
            "--eos".into(),
            req.eos.clone(),
            "--case".into(),
            req.case.label.clone(),
            "--variant".into(),
            req.case.variant.label().to_string(),
            "--sigma".into(),
            p.sigma.to_string(),
            "--chi".into(),
            p.chi.to_string(),
            "--screening".into(),
            p.screening_factor.to_string(),
            "--run-id".into(),
            req.run_tag.clone(),
            "--max-step-cm".into(),
            req.settings.max_step_cm.to_string(),
            "--rtol".into(),
            req.settings.rtol.to_string(),
            "--atol".into(),
            req.settings.atol.to_string(),
            "--n-points".into(),
            req.n_points.to_string(),
            "--output-dir".into(),
            self.output_dir.display().to_string(),
        ];
        if p.include_in_gravity {
            args.push("--include-in-gravity".into());
        }
        if let Some(path) = &self.config_path {
            args.push("--config".into());
            args.push(path.display().to_string());
        }
        args
    }

    fn try_run(&self, req: &AttemptRequest) -> Result<RunRecord, String> {
        let run_dir = self.output_dir.join("diagnostics").join(&req.run_tag);
        std::fs::create_dir_all(&run_dir)
            .map_err(|e| format!("cannot create '{}': {e}", run_dir.display()))?;
        let stderr_path = run_dir.join("solver_stderr.log");
        let stderr = File::create(&stderr_path)
            .map_err(|e| format!("cannot create '{}': {e}", stderr_path.display()))?;

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(self.point_args(req))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| format!("failed to start '{}': {e}", self.program.display()))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("timeout after {:.1}s", self.timeout.as_secs_f64()));
                }
                Ok(None) => std::thread::sleep(self.poll_interval),
                Err(e) => return Err(format!("failed to wait for solver: {e}")),
            }
        };
        if !status.success() {
            return Err(match status.code() {
                Some(code) => format!("solver exited with status {code}"),
                None => "solver terminated by signal".to_string(),
            });
        }

        let summary = run_dir.join(SUMMARY_FILE);
        let text = std::fs::read_to_string(&summary)
            .map_err(|e| format!("missing {SUMMARY_FILE} in '{}': {e}", run_dir.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("invalid {SUMMARY_FILE}: {e}"))
    }
}

impl SolverBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn run(&self, req: &AttemptRequest) -> RunRecord {
        match self.try_run(req) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(run_tag = %req.run_tag, error = %err, "external solver failed");
                failed_record(&req.run_tag, &req.eos, &req.case, req.settings, err)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request() -> AttemptRequest {
        AttemptRequest {
            run_tag: "SLy__A_baseline_ref1_gf1.5_nt1e-6".into(),
            eos: "SLy".into(),
            case: CaseSpec::baseline(),
            settings: SolverSettings::default(),
            n_points: 15,
        }
    }

    #[test]
    fn timeout_becomes_not_converged() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("sh", tmp.path(), Duration::from_millis(200))
            .with_leading_args(["-c", "sleep 5"]);
        let started = Instant::now();
        let rec = backend.run(&request());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!rec.converged);
        assert!(rec.error.as_deref().unwrap().starts_with("timeout"));
        assert_eq!(rec.case, "A_baseline");
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("sh", tmp.path(), Duration::from_secs(10))
            .with_leading_args(["-c", "exit 3"]);
        let rec = backend.run(&request());
        assert!(!rec.converged);
        assert_eq!(rec.error.as_deref(), Some("solver exited with status 3"));
    }

    #[test]
    fn missing_summary_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("sh", tmp.path(), Duration::from_secs(10))
            .with_leading_args(["-c", "exit 0"]);
        let rec = backend.run(&request());
        assert!(!rec.converged);
        assert!(rec.error.as_deref().unwrap().contains("missing summary.json"));
    }

    #[test]
    fn point_arguments_carry_the_case_identity() {
        let backend = ProcessBackend::new("tov", "/tmp/out", Duration::from_secs(1));
        let mut req = request();
        req.case = CaseSpec::legacy(0.06);
        let args = backend.point_args(&req);
        assert_eq!(args[0], "point");
        assert!(args.windows(2).any(|w| w[0] == "--case" && w[1] == "B_legacy"));
        assert!(args.windows(2).any(|w| w[0] == "--variant" && w[1] == "B_exploratory"));
        assert!(args.contains(&"--include-in-gravity".to_string()));
    }
}
