//! Nominal vs refined scans as a discretization-error proxy.
//!
//! Every (EOS, case) is scanned twice: once with the given solver settings and
//! once with the step cap scaled down and both tolerances tightened. The
//! relative differences of the headline observables go into the run record;
//! the refined values are the ones reported.

use chrono::Utc;

use crate::domain::{
    CaseSpec, DeltaTotals, Observables, PipelineConfig, RunRecord, RunStatus, ScanFamily,
    SolverSettings,
};
use crate::eos::{Eos, EquationOfState};
use crate::error::AppError;
use crate::math::{max_value, rel_diff_pct};
use crate::solver::{DensityScanner, InertialMapping, closest_to_mass, observables_at};

/// Both scans and what was derived from them.
#[derive(Debug, Clone)]
pub struct Audit {
    pub nominal: ScanFamily,
    pub refined: ScanFamily,
    pub nominal_obs: Observables,
    pub refined_obs: Observables,
    pub delta: DeltaTotals,
}

impl Audit {
    pub fn converged(&self) -> bool {
        !self.nominal.models.is_empty() && !self.refined.models.is_empty()
    }
}

pub struct DiscretizationAuditor<'a> {
    config: &'a PipelineConfig,
    mapping: &'a dyn InertialMapping,
}

impl<'a> DiscretizationAuditor<'a> {
    pub fn new(config: &'a PipelineConfig, mapping: &'a dyn InertialMapping) -> Self {
        Self { config, mapping }
    }

    /// Scan `eos` under `case` at `settings` (nominal) and at the refined
    /// counterpart of `settings`.
    pub fn audit(
        &self,
        eos: &Eos,
        case: &CaseSpec,
        settings: SolverSettings,
        n_points: Option<usize>,
    ) -> Result<Audit, AppError> {
        let refined_settings = settings.refined(
            self.config.refined_step_factor,
            self.config.refined_tolerance_factor,
        );
        let scan_cfg = &self.config.scan;
        let target = scan_cfg.target_mass_msun;

        let run = |s: SolverSettings| -> Result<ScanFamily, AppError> {
            let mut scanner =
                DensityScanner::new(eos, case.params, self.mapping, s, scan_cfg, self.config.fast);
            if let Some(n) = n_points {
                scanner = scanner.with_points(n);
            }
            scanner.scan()
        };
        let (nominal, refined) = rayon::join(|| run(settings), || run(refined_settings));
        let (nominal, refined) = (nominal?, refined?);

        let nominal_obs = observables_at(&nominal.models, target, scan_cfg.min_points);
        let refined_obs = observables_at(&refined.models, target, scan_cfg.min_points);
        let delta = deltas(&nominal_obs, &refined_obs);

        tracing::debug!(
            eos = eos.name(),
            case = %case.label,
            nominal = %nominal_obs.status,
            refined = %refined_obs.status,
            delta_max = ?delta.max_finite(),
            "discretization audit"
        );

        Ok(Audit {
            nominal,
            refined,
            nominal_obs,
            refined_obs,
            delta,
        })
    }
}

/// Percentage differences `100·|nominal − refined| / |refined|` per observable.
pub fn deltas(nominal: &Observables, refined: &Observables) -> DeltaTotals {
    let pct = |a: Option<f64>, b: Option<f64>| match (a, b) {
        (Some(a), Some(b)) => Some(rel_diff_pct(a, b)),
        _ => None,
    };
    DeltaTotals {
        m_max_pct: pct(nominal.m_max_msun, refined.m_max_msun),
        r_target_pct: pct(nominal.r_target_km, refined.r_target_km),
        lambda_target_pct: pct(nominal.lambda_target, refined.lambda_target),
    }
}

/// Assemble an unclassified record (status `accepted`, no reasons) from an audit.
pub fn build_record(
    run_id: &str,
    eos: &Eos,
    case: &CaseSpec,
    settings: SolverSettings,
    audit: &Audit,
    target_msun: f64,
) -> RunRecord {
    let models = &audit.refined.models;
    let wfaktor_max = max_value(models.iter().map(|m| m.wfaktor_max));
    let max_epsratio = max_value(models.iter().map(|m| m.max_epsratio));
    let closest = closest_to_mass(models, target_msun);

    RunRecord {
        run_id: run_id.to_string(),
        eos: eos.name().to_string(),
        case: case.label.clone(),
        variant: case.variant,
        params: case.params,
        converged: audit.converged(),
        nominal: audit.nominal_obs.clone(),
        refined: audit.refined_obs.clone(),
        delta_total: audit.delta,
        max_epsratio,
        wfaktor_max,
        wfaktor_center: closest.map(|m| m.wfaktor_center),
        solver_residual: closest.map(|m| m.solver_residual),
        rho_c_target: closest.map(|m| m.rho_c),
        n_models: models.len(),
        expansions: audit.nominal.expansions.max(audit.refined.expansions),
        bracketed: audit.nominal.bracketed && audit.refined.bracketed,
        settings,
        status: RunStatus::Accepted,
        reasons: Vec::new(),
        error: None,
        timestamp: Utc::now(),
    }
}

/// Record for a run that could not be computed at all.
pub fn failed_record(
    run_id: &str,
    eos_name: &str,
    case: &CaseSpec,
    settings: SolverSettings,
    error: impl Into<String>,
) -> RunRecord {
    let missing = Observables {
        status: "not_converged".to_string(),
        ..Observables::default()
    };
    RunRecord {
        run_id: run_id.to_string(),
        eos: eos_name.to_string(),
        case: case.label.clone(),
        variant: case.variant,
        params: case.params,
        converged: false,
        nominal: missing.clone(),
        refined: missing,
        delta_total: DeltaTotals::default(),
        max_epsratio: None,
        wfaktor_max: None,
        wfaktor_center: None,
        solver_residual: None,
        rho_c_target: None,
        n_models: 0,
        expansions: 0,
        bracketed: false,
        settings,
        status: RunStatus::Accepted,
        reasons: Vec::new(),
        error: Some(error.into()),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(m: f64, r: f64, l: f64) -> Observables {
        Observables {
            m_max_msun: Some(m),
            r_target_km: Some(r),
            lambda_target: Some(l),
            status: "ok".into(),
        }
    }

    #[test]
    fn deltas_use_refined_as_reference() {
        let d = deltas(&obs(2.02, 12.0, 404.0), &obs(2.0, 12.0, 400.0));
        assert!((d.m_max_pct.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(d.r_target_pct, Some(0.0));
        assert!((d.lambda_target_pct.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_observable_gives_missing_delta() {
        let mut bad = obs(2.0, 12.0, 400.0);
        bad.r_target_km = None;
        let d = deltas(&bad, &obs(2.0, 12.0, 400.0));
        assert_eq!(d.r_target_pct, None);
        assert_eq!(d.m_max_pct, Some(0.0));
    }

    #[test]
    fn failed_record_is_not_converged() {
        let rec = failed_record(
            "x",
            "SLy",
            &CaseSpec::baseline(),
            SolverSettings::default(),
            "boom",
        );
        assert!(!rec.converged);
        assert_eq!(rec.coverage_status(), "not_converged");
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }
}
