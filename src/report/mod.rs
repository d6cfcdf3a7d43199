//! Reporting: baseline deltas, σ-sensitivities and terminal tables.

use std::path::Path;

use serde::Serialize;

use crate::domain::{BASELINE_CASE, RunRecord, RunStatus};
use crate::error::AppError;

pub mod format;

pub use format::{format_run_table, format_status_counts};

pub const RUNS_SUMMARY_FILE: &str = "runs_summary.csv";
pub const SENSITIVITIES_FILE: &str = "sensitivities.csv";

/// One record joined with its EOS's `A_baseline` record.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub run_id: String,
    #[serde(rename = "EOS")]
    pub eos: String,
    pub case: String,
    pub variant: &'static str,
    pub sigma: f64,
    pub chi: f64,
    pub status: RunStatus,
    #[serde(rename = "Mmax")]
    pub m_max: Option<f64>,
    #[serde(rename = "R_1.4")]
    pub r_target: Option<f64>,
    #[serde(rename = "Lambda_1.4")]
    pub lambda_target: Option<f64>,
    #[serde(rename = "dMmax_pct")]
    pub d_m_max_pct: Option<f64>,
    #[serde(rename = "dR14_pct")]
    pub d_r_target_pct: Option<f64>,
    #[serde(rename = "dLambda14_pct")]
    pub d_lambda_target_pct: Option<f64>,
    pub max_epsratio: Option<f64>,
    pub delta_total_max_pct: Option<f64>,
}

/// Finite-difference slopes `(obs_case − obs_baseline) / Δσ`.
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityRow {
    #[serde(rename = "EOS")]
    pub eos: String,
    pub case: String,
    pub sigma: f64,
    pub status: RunStatus,
    #[serde(rename = "S_Mmax_per_sigma")]
    pub s_m_max: Option<f64>,
    #[serde(rename = "S_R14_per_sigma")]
    pub s_r_target: Option<f64>,
    #[serde(rename = "S_Lambda14_per_sigma")]
    pub s_lambda_target: Option<f64>,
}

fn baseline_for<'a>(records: &'a [RunRecord], eos: &str) -> Option<&'a RunRecord> {
    records
        .iter()
        .find(|r| r.eos == eos && r.case == BASELINE_CASE)
}

fn pct_change(value: Option<f64>, base: Option<f64>) -> Option<f64> {
    match (value, base) {
        (Some(v), Some(b)) if b != 0.0 && v.is_finite() && b.is_finite() => {
            Some(100.0 * (v - b) / b)
        }
        _ => None,
    }
}

fn slope(value: Option<f64>, base: Option<f64>, dsigma: f64) -> Option<f64> {
    match (value, base) {
        (Some(v), Some(b)) if v.is_finite() && b.is_finite() => Some((v - b) / dsigma),
        _ => None,
    }
}

/// Per-record percentage changes relative to the same EOS's baseline.
/// Records without a baseline keep their observables and get no deltas.
pub fn summary_rows(records: &[RunRecord]) -> Vec<SummaryRow> {
    records
        .iter()
        .map(|r| {
            let base = baseline_for(records, &r.eos);
            let d = |f: fn(&RunRecord) -> Option<f64>| pct_change(f(r), base.and_then(f));
            SummaryRow {
                run_id: r.run_id.clone(),
                eos: r.eos.clone(),
                case: r.case.clone(),
                variant: r.variant.label(),
                sigma: r.params.sigma,
                chi: r.params.chi,
                status: r.status,
                m_max: r.m_max(),
                r_target: r.r_target(),
                lambda_target: r.lambda_target(),
                d_m_max_pct: d(RunRecord::m_max),
                d_r_target_pct: d(RunRecord::r_target),
                d_lambda_target_pct: d(RunRecord::lambda_target),
                max_epsratio: r.max_epsratio,
                delta_total_max_pct: r.delta_total.max_finite(),
            }
        })
        .collect()
}

/// Slopes for every non-baseline record whose σ differs from its baseline's.
pub fn sensitivities(records: &[RunRecord]) -> Vec<SensitivityRow> {
    let mut out = Vec::new();
    for r in records.iter().filter(|r| r.case != BASELINE_CASE) {
        let Some(base) = baseline_for(records, &r.eos) else {
            continue;
        };
        let dsigma = r.params.sigma - base.params.sigma;
        if dsigma == 0.0 {
            continue;
        }
        out.push(SensitivityRow {
            eos: r.eos.clone(),
            case: r.case.clone(),
            sigma: r.params.sigma,
            status: r.status,
            s_m_max: slope(r.m_max(), base.m_max(), dsigma),
            s_r_target: slope(r.r_target(), base.r_target(), dsigma),
            s_lambda_target: slope(r.lambda_target(), base.lambda_target(), dsigma),
        });
    }
    out
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path).map_err(|e| AppError::io("create", path, e))?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush().map_err(|e| AppError::io("write", path, e))
}

/// `runs_<status>.csv`, one table per status.
pub fn partition_file(status: RunStatus) -> String {
    format!("runs_{}.csv", status.label())
}

/// Accepted and stress runs are results; the rest are diagnostics.
pub fn is_primary_result(record: &RunRecord) -> bool {
    matches!(record.status, RunStatus::Accepted | RunStatus::Stress)
}

/// Write `runs_summary.csv` and `sensitivities.csv` from the accepted and
/// stress records, plus one partition table per status from all of them.
pub fn write_reports(output_dir: &Path, records: &[RunRecord]) -> Result<(), AppError> {
    let headline: Vec<RunRecord> = records.iter().filter(|r| is_primary_result(r)).cloned().collect();
    write_csv(&output_dir.join(RUNS_SUMMARY_FILE), &summary_rows(&headline))?;
    write_csv(&output_dir.join(SENSITIVITIES_FILE), &sensitivities(&headline))?;

    let rows = summary_rows(records);
    for status in RunStatus::ALL {
        let part: Vec<&SummaryRow> = rows.iter().filter(|r| r.status == status).collect();
        write_csv(&output_dir.join(partition_file(status)), &part)?;
    }
    tracing::info!(
        records = records.len(),
        headline = headline.len(),
        dir = %output_dir.display(),
        "reports written"
    );
    Ok(())
}
