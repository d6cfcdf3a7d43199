//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - passed between the solver, the classifier and the refinement controller
//! - written to the per-run dossier as JSON
//! - reloaded later for re-classification

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::SolverSettings;

/// Modified-gravity coupling for one run.
///
/// The inertial energy density is `ε_grav + σ·χ·S·ε_grav` under the default
/// mapping. `include_in_gravity` decides whether that increment also sources
/// the mass equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerturbationParameters {
    pub sigma: f64,
    pub chi: f64,
    pub screening_factor: f64,
    pub include_in_gravity: bool,
}

impl PerturbationParameters {
    pub const fn zero() -> Self {
        Self {
            sigma: 0.0,
            chi: 1.0,
            screening_factor: 1.0,
            include_in_gravity: false,
        }
    }

    /// Fractional coupling `σ·χ·S`.
    pub fn coupling(&self) -> f64 {
        self.sigma * self.chi * self.screening_factor
    }

    pub fn is_zero(&self) -> bool {
        self.coupling() == 0.0
    }
}

impl Default for PerturbationParameters {
    fn default() -> Self {
        Self::zero()
    }
}

/// Which equations the perturbation enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Inertial and tidal terms only.
    #[serde(rename = "A")]
    A,
    /// Also sources the mass equation.
    #[serde(rename = "B_exploratory")]
    BExploratory,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::BExploratory => "B_exploratory",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named perturbation case. The label is part of the run identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSpec {
    pub label: String,
    pub variant: Variant,
    pub params: PerturbationParameters,
}

pub const BASELINE_CASE: &str = "A_baseline";
pub const LEGACY_CASE: &str = "B_legacy";
pub const SIGMA_CHI_CASE: &str = "C_sigma_chi";

impl CaseSpec {
    pub fn baseline() -> Self {
        Self {
            label: BASELINE_CASE.to_string(),
            variant: Variant::A,
            params: PerturbationParameters::zero(),
        }
    }

    pub fn legacy(sigma: f64) -> Self {
        Self {
            label: LEGACY_CASE.to_string(),
            variant: Variant::BExploratory,
            params: PerturbationParameters {
                sigma,
                include_in_gravity: true,
                ..PerturbationParameters::zero()
            },
        }
    }

    pub fn sigma_chi(sigma: f64) -> Self {
        Self {
            label: SIGMA_CHI_CASE.to_string(),
            variant: Variant::A,
            params: PerturbationParameters {
                sigma,
                ..PerturbationParameters::zero()
            },
        }
    }

    /// One point of the σ scan (Variant A), labelled `C_sigma_chi@σ`.
    pub fn sigma_scan_point(sigma: f64) -> Self {
        Self {
            label: format!("{SIGMA_CHI_CASE}@{sigma}"),
            ..Self::sigma_chi(sigma)
        }
    }

    /// The three canonical cases at coupling `sigma`.
    pub fn canonical(sigma: f64) -> Vec<Self> {
        vec![Self::baseline(), Self::legacy(sigma), Self::sigma_chi(sigma)]
    }
}

/// One radial sample of an integrated star.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    pub r_km: f64,
    pub m_msun: f64,
    /// Pressure [dyne/cm²].
    pub pressure: f64,
    /// Gravitational energy density [erg/cm³].
    pub eps_grav: f64,
    pub wfaktor: f64,
    pub epsratio: f64,
}

/// One converged integration at a fixed central density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StellarModel {
    /// Central rest-mass density [g/cm³].
    pub rho_c: f64,
    pub mass_msun: f64,
    pub radius_km: f64,
    pub compactness: f64,
    pub k2: f64,
    pub lambda: f64,
    /// Surface value of the tidal response variable.
    pub y_surface: f64,
    pub wfaktor_center: f64,
    /// Radial maximum when a profile was kept, else the central value.
    pub wfaktor_max: f64,
    pub max_epsratio: f64,
    pub solver_residual: f64,
    pub accepted_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<ProfileSample>>,
}

/// Models from one density scan, sorted by central density.
#[derive(Debug, Clone, Default)]
pub struct ScanFamily {
    pub models: Vec<StellarModel>,
    /// Ladder points that produced no model (per attempt, summed).
    pub dropped: usize,
    /// Whether the final ladder spanned the target mass with enough points.
    pub bracketed: bool,
    pub expansions: usize,
    pub log10_rho_range: (f64, f64),
}

/// Headline observables of one scan.
///
/// `None` means "could not be computed"; the status string says why.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observables {
    pub m_max_msun: Option<f64>,
    pub r_target_km: Option<f64>,
    pub lambda_target: Option<f64>,
    pub status: String,
}

pub const OBS_OK: &str = "ok";

impl Observables {
    pub fn is_ok(&self) -> bool {
        self.status == OBS_OK
    }
}

/// Nominal-vs-refined discrepancies in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaTotals {
    pub m_max_pct: Option<f64>,
    pub r_target_pct: Option<f64>,
    pub lambda_target_pct: Option<f64>,
}

impl DeltaTotals {
    pub fn named(&self) -> [(&'static str, Option<f64>); 3] {
        [
            ("delta_total_Mmax_pct", self.m_max_pct),
            ("delta_total_R14_pct", self.r_target_pct),
            ("delta_total_Lambda14_pct", self.lambda_target_pct),
        ]
    }

    /// Largest finite discrepancy, if any.
    pub fn max_finite(&self) -> Option<f64> {
        crate::math::max_value(
            self.named()
                .iter()
                .filter_map(|(_, v)| *v)
                .filter(|v| v.is_finite()),
        )
    }
}

/// Run status, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Accepted,
    Stress,
    Diagnostic,
    Excluded,
}

impl RunStatus {
    /// Move to `other` only if it is more severe.
    pub fn escalate(self, other: RunStatus) -> RunStatus {
        self.max(other)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Accepted => "accepted",
            RunStatus::Stress => "stress",
            RunStatus::Diagnostic => "diagnostic",
            RunStatus::Excluded => "excluded",
        }
    }

    pub const ALL: [RunStatus; 4] = [
        RunStatus::Accepted,
        RunStatus::Stress,
        RunStatus::Diagnostic,
        RunStatus::Excluded,
    ];
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: RunStatus,
    pub reasons: Vec<String>,
}

/// One classified (EOS, case) computation.
///
/// Re-runs produce a new record under a new `run_id`; records are not edited
/// after classification except by re-classifying from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub eos: String,
    pub case: String,
    pub variant: Variant,
    pub params: PerturbationParameters,
    pub converged: bool,
    pub nominal: Observables,
    pub refined: Observables,
    pub delta_total: DeltaTotals,
    pub max_epsratio: Option<f64>,
    pub wfaktor_max: Option<f64>,
    pub wfaktor_center: Option<f64>,
    pub solver_residual: Option<f64>,
    /// Central density of the model closest to the target mass.
    pub rho_c_target: Option<f64>,
    pub n_models: usize,
    pub expansions: usize,
    pub bracketed: bool,
    pub settings: SolverSettings,
    pub status: RunStatus,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunRecord {
    /// Headline maximum mass (refined scan).
    pub fn m_max(&self) -> Option<f64> {
        self.refined.m_max_msun
    }

    pub fn r_target(&self) -> Option<f64> {
        self.refined.r_target_km
    }

    pub fn lambda_target(&self) -> Option<f64> {
        self.refined.lambda_target
    }

    /// Status of the observable extraction, preferring the first failure.
    pub fn coverage_status(&self) -> &str {
        if !self.nominal.is_ok() {
            &self.nominal.status
        } else {
            &self.refined.status
        }
    }

    pub fn classification(&self) -> Classification {
        Classification {
            status: self.status,
            reasons: self.reasons.clone(),
        }
    }

    pub fn apply(&mut self, classification: Classification) {
        self.status = classification.status;
        self.reasons = classification.reasons;
    }
}

/// Tag of one line in a run's refinement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Start,
    AttemptResult,
    RefineFailed,
    Resolved,
    StressResolved,
    Unresolved,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Resolved | AttemptStatus::StressResolved | AttemptStatus::Unresolved
        )
    }
}

/// One line of `refinement_log.jsonl`. Each line stands alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver_tol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_epsratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wfaktor_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_total_max_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AttemptEntry {
    pub fn new(status: AttemptStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            attempt: None,
            run_tag: None,
            grid_factor: None,
            solver_tol: None,
            converged: None,
            max_epsratio: None,
            wfaktor_max: None,
            delta_total_max_pct: None,
            classification: None,
            error: None,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_escalation_never_improves() {
        for a in RunStatus::ALL {
            for b in RunStatus::ALL {
                let c = a.escalate(b);
                assert!(c >= a && c >= b);
            }
        }
        assert_eq!(RunStatus::Excluded.escalate(RunStatus::Stress), RunStatus::Excluded);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RunStatus::Stress).unwrap(), "\"stress\"");
    }

    #[test]
    fn canonical_cases_keep_variant_tags() {
        let cases = CaseSpec::canonical(0.06);
        assert_eq!(cases[0].label, BASELINE_CASE);
        assert!(cases[0].params.is_zero());
        assert_eq!(cases[1].variant, Variant::BExploratory);
        assert!(cases[1].params.include_in_gravity);
        assert_eq!(cases[2].variant, Variant::A);
        assert!(!cases[2].params.include_in_gravity);
        assert_eq!(CaseSpec::sigma_scan_point(0.02).label, "C_sigma_chi@0.02");
    }

    #[test]
    fn delta_max_ignores_missing_and_non_finite() {
        let d = DeltaTotals {
            m_max_pct: Some(1.0),
            r_target_pct: Some(f64::NAN),
            lambda_target_pct: Some(3.5),
        };
        assert_eq!(d.max_finite(), Some(3.5));
        assert_eq!(DeltaTotals::default().max_finite(), None);
    }

    #[test]
    fn attempt_entry_omits_empty_fields() {
        let line = serde_json::to_string(&AttemptEntry::new(AttemptStatus::Start)).unwrap();
        assert!(line.contains("\"status\":\"START\""));
        assert!(!line.contains("attempt"));
    }
}
