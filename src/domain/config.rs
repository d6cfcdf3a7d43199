//! Pipeline configuration.
//!
//! One explicit [`PipelineConfig`] value is handed to every component. It is
//! resolved in layers:
//!
//! 1. built-in defaults (`Default`)
//! 2. an optional JSON file (`--config`), where missing keys keep defaults
//! 3. `.env` / environment (`TOV_FAST`, `TOV_OUTPUT_DIR`, `TOV_SEED`)
//! 4. command-line flags (applied by `app`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Integrator settings for one structure integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Starting radius [cm].
    pub r0_cm: f64,
    /// Radius ceiling; no surface before this means no model [cm].
    pub r_max_cm: f64,
    pub max_step_cm: f64,
    pub rtol: f64,
    pub atol: f64,
    pub max_steps: usize,
    pub store_profiles: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            r0_cm: 1.0e-3,
            r_max_cm: 3.0e6,
            max_step_cm: 5.0e4,
            rtol: 3.0e-6,
            atol: 1.0e-9,
            max_steps: 200_000,
            store_profiles: false,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("r0_cm", self.r0_cm),
            ("r_max_cm", self.r_max_cm),
            ("max_step_cm", self.max_step_cm),
            ("rtol", self.rtol),
            ("atol", self.atol),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::config(format!("solver.{name} must be positive and finite (got {v}).")));
            }
        }
        if self.r_max_cm <= self.r0_cm {
            return Err(AppError::config("solver.r_max_cm must exceed solver.r0_cm."));
        }
        if self.max_steps == 0 {
            return Err(AppError::config("solver.max_steps must be at least 1."));
        }
        Ok(())
    }

    /// Settings for the refined pass of the discretization audit.
    pub fn refined(&self, step_factor: f64, tolerance_factor: f64) -> Self {
        Self {
            max_step_cm: self.max_step_cm * step_factor,
            rtol: self.rtol * tolerance_factor,
            atol: self.atol * tolerance_factor,
            max_steps: self.max_steps.saturating_mul(2),
            ..*self
        }
    }
}

/// Central-density ladder and bracketing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub n_points: usize,
    pub n_points_fast: usize,
    pub log10_rho_min: f64,
    pub log10_rho_max: f64,
    pub log10_rho_floor: f64,
    pub log10_rho_ceiling: f64,
    pub expansion_step: f64,
    pub max_expansions: usize,
    pub target_mass_msun: f64,
    pub min_points: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            n_points: 18,
            n_points_fast: 10,
            log10_rho_min: 14.2,
            log10_rho_max: 15.9,
            log10_rho_floor: 13.8,
            log10_rho_ceiling: 16.2,
            expansion_step: 0.15,
            max_expansions: 6,
            target_mass_msun: 1.4,
            min_points: 4,
        }
    }
}

impl ScanConfig {
    pub fn points(&self, fast: bool) -> usize {
        if fast { self.n_points_fast } else { self.n_points }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.n_points < 2 || self.n_points_fast < 2 {
            return Err(AppError::config("scan.n_points and scan.n_points_fast must be at least 2."));
        }
        if !(self.log10_rho_floor <= self.log10_rho_min
            && self.log10_rho_min < self.log10_rho_max
            && self.log10_rho_max <= self.log10_rho_ceiling)
        {
            return Err(AppError::config(
                "scan density bounds must satisfy floor <= min < max <= ceiling.",
            ));
        }
        if !(self.expansion_step.is_finite() && self.expansion_step > 0.0) {
            return Err(AppError::config("scan.expansion_step must be positive."));
        }
        if !(self.target_mass_msun.is_finite() && self.target_mass_msun > 0.0) {
            return Err(AppError::config("scan.target_mass_msun must be positive."));
        }
        if self.min_points < 2 {
            return Err(AppError::config("scan.min_points must be at least 2."));
        }
        Ok(())
    }
}

/// Classification thresholds. Never baked into the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub eps_interpretable: f64,
    pub eps_stress: f64,
    pub wfaktor_ceiling: f64,
    pub delta_total_ceiling_pct: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            eps_interpretable: 0.10,
            eps_stress: 0.30,
            wfaktor_ceiling: 1.0,
            delta_total_ceiling_pct: 50.0,
        }
    }
}

impl ClassifierThresholds {
    pub fn validate(&self) -> Result<(), AppError> {
        let all = [
            ("eps_interpretable", self.eps_interpretable),
            ("eps_stress", self.eps_stress),
            ("wfaktor_ceiling", self.wfaktor_ceiling),
            ("delta_total_ceiling_pct", self.delta_total_ceiling_pct),
        ];
        for (name, v) in all {
            if !(v.is_finite() && v >= 0.0) {
                return Err(AppError::config(format!(
                    "thresholds.{name} must be finite and non-negative (got {v})."
                )));
            }
        }
        if self.eps_interpretable >= self.eps_stress {
            return Err(AppError::config(format!(
                "thresholds.eps_interpretable ({}) must be below thresholds.eps_stress ({}).",
                self.eps_interpretable, self.eps_stress
            )));
        }
        Ok(())
    }
}

/// One rung of the refinement ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderStep {
    /// Divides the maximum step and multiplies the ladder size.
    pub grid_factor: f64,
    /// Relative tolerance; absolute tolerance is `solver_tol · 1e-3`.
    pub solver_tol: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_retries: usize,
    pub ladder: Vec<LadderStep>,
    /// Also attempt (EOS, case) pairs that never produced a record.
    pub retry_not_run: bool,
    /// Wall-clock limit for one external solver invocation.
    pub timeout_secs: u64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ladder: vec![
                LadderStep { grid_factor: 1.5, solver_tol: 1e-6 },
                LadderStep { grid_factor: 2.0, solver_tol: 1e-7 },
                LadderStep { grid_factor: 3.0, solver_tol: 1e-8 },
            ],
            retry_not_run: false,
            timeout_secs: 3600,
        }
    }
}

impl RefinementConfig {
    /// Effective number of attempts per run.
    pub fn attempts(&self) -> usize {
        self.max_retries.min(self.ladder.len())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for step in &self.ladder {
            if !(step.grid_factor.is_finite() && step.grid_factor >= 1.0) {
                return Err(AppError::config(format!(
                    "refinement ladder grid_factor must be >= 1 (got {}).",
                    step.grid_factor
                )));
            }
            if !(step.solver_tol.is_finite() && step.solver_tol > 0.0) {
                return Err(AppError::config(format!(
                    "refinement ladder solver_tol must be positive (got {}).",
                    step.solver_tol
                )));
            }
        }
        for pair in self.ladder.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if !(b.grid_factor > a.grid_factor && b.solver_tol < a.solver_tol) {
                return Err(AppError::config(
                    "refinement ladder must strictly tighten (grid_factor up, solver_tol down).",
                ));
            }
        }
        if self.timeout_secs == 0 {
            return Err(AppError::config("refinement.timeout_secs must be at least 1."));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub solver: SolverSettings,
    pub scan: ScanConfig,
    pub refined_step_factor: f64,
    pub refined_tolerance_factor: f64,
    pub thresholds: ClassifierThresholds,
    pub refinement: RefinementConfig,
    /// Coupling used by the canonical perturbed cases.
    pub sigma: f64,
    pub sigma_grid: Vec<f64>,
    pub fast: bool,
    /// Recorded in run metadata; the solver itself is deterministic.
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            solver: SolverSettings::default(),
            scan: ScanConfig::default(),
            refined_step_factor: 0.5,
            refined_tolerance_factor: 1e-2,
            thresholds: ClassifierThresholds::default(),
            refinement: RefinementConfig::default(),
            sigma: 0.06,
            sigma_grid: vec![0.02, 0.04, 0.06],
            fast: false,
            seed: 123_456_789,
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| AppError::io("read config", path, e))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| AppError::config(format!("Invalid config '{}': {e}", path.display())))?;
        Ok(config)
    }

    /// Apply `.env` and process environment overrides.
    pub fn apply_env(&mut self) -> Result<(), AppError> {
        dotenvy::dotenv().ok();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an explicit lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), AppError> {
        if let Some(v) = lookup("TOV_FAST") {
            self.fast = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("TOV_OUTPUT_DIR") {
            if !v.trim().is_empty() {
                self.output_dir = PathBuf::from(v.trim());
            }
        }
        if let Some(v) = lookup("TOV_SEED") {
            self.seed = v
                .trim()
                .parse()
                .map_err(|_| AppError::config(format!("TOV_SEED must be an unsigned integer (got '{v}').")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.solver.validate()?;
        self.scan.validate()?;
        self.thresholds.validate()?;
        self.refinement.validate()?;
        if let Some(first) = self.refinement.ladder.first() {
            if first.solver_tol >= self.solver.rtol {
                return Err(AppError::config(format!(
                    "refinement ladder must start below solver.rtol (got solver_tol {} >= rtol {}).",
                    first.solver_tol, self.solver.rtol
                )));
            }
        }
        if !(self.refined_step_factor > 0.0 && self.refined_step_factor < 1.0) {
            return Err(AppError::config("refined_step_factor must lie in (0, 1)."));
        }
        if !(self.refined_tolerance_factor > 0.0 && self.refined_tolerance_factor <= 1e-2) {
            return Err(AppError::config(
                "refined_tolerance_factor must tighten tolerances by at least two orders of magnitude.",
            ));
        }
        if !self.sigma.is_finite() {
            return Err(AppError::config("sigma must be finite."));
        }
        if self.sigma_grid.len() < 3 || self.sigma_grid.iter().any(|s| !s.is_finite()) {
            return Err(AppError::config("sigma_grid needs at least 3 finite values."));
        }
        Ok(())
    }

    /// Settings for the refined pass of the discretization audit.
    pub fn refined_solver(&self) -> SolverSettings {
        self.solver
            .refined(self.refined_step_factor, self.refined_tolerance_factor)
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.output_dir.join("diagnostics")
    }
}
