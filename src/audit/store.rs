//! On-disk audit dossier.
//!
//! Layout under `<output_dir>`:
//!
//! ```text
//! diagnostics/<run_id>/summary.json          full RunRecord
//! diagnostics/<run_id>/metadata.json         identity, parameters, timestamp, seed
//! diagnostics/<run_id>/run_config.json       resolved configuration
//! diagnostics/<run_id>/diagnosis.txt         non-accepted runs only
//! diagnostics/<run_id>/refinement_log.jsonl  one AttemptEntry per line, append-only
//! diagnostics/<run_id>/profile.csv           optional radial profile
//! audit_index.csv / audit_trail.csv          one row per run
//! ```
//!
//! Each run directory is written by exactly one worker; the attempt log is
//! opened in append mode so concurrent appends to different runs never touch
//! each other and a re-append of an entry never rewrites earlier lines.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AttemptEntry, PerturbationParameters, PipelineConfig, ProfileSample, RunRecord, RunStatus,
    SolverSettings, Variant,
};
use crate::error::AppError;

pub const SUMMARY_FILE: &str = "summary.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const RUN_CONFIG_FILE: &str = "run_config.json";
pub const DIAGNOSIS_FILE: &str = "diagnosis.txt";
pub const ATTEMPT_LOG_FILE: &str = "refinement_log.jsonl";
pub const PROFILE_FILE: &str = "profile.csv";
pub const INDEX_FILE: &str = "audit_index.csv";
pub const TRAIL_FILE: &str = "audit_trail.csv";

/// Directory-safe run identifier: `<eos>__<case>`.
pub fn run_id(eos: &str, case: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect()
    };
    format!("{}__{}", clean(eos), clean(case))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub eos: String,
    pub case: String,
    pub variant: Variant,
    pub params: PerturbationParameters,
    pub timestamp: DateTime<Utc>,
    pub seed: u64,
    pub tool: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
struct RunConfigFile<'a> {
    effective_solver: SolverSettings,
    refined_solver: SolverSettings,
    config: &'a PipelineConfig,
}

#[derive(Debug, Clone, Serialize)]
struct IndexRow<'a> {
    audit_id: String,
    run_id: &'a str,
    eos: &'a str,
    case: &'a str,
    variant: &'a str,
    status: &'a str,
    triggered_rules: String,
    diagnostics_dir: String,
    max_epsratio: Option<f64>,
    wfaktor_max: Option<f64>,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
struct TrailRow<'a> {
    audit_id: String,
    run_id: &'a str,
    eos: &'a str,
    case: &'a str,
    variant: &'a str,
    status: &'a str,
    triggered_rules: String,
    diagnostics_dir: String,
    max_epsratio: Option<f64>,
    wfaktor_max: Option<f64>,
    timestamp: String,
    sigma: f64,
    chi: f64,
    screening_factor: f64,
    include_in_gravity: bool,
    converged: bool,
    coverage_status: &'a str,
    #[serde(rename = "Mmax")]
    m_max: Option<f64>,
    #[serde(rename = "R_1.4")]
    r_target: Option<f64>,
    #[serde(rename = "Lambda_1.4")]
    lambda_target: Option<f64>,
    #[serde(rename = "Mmax_nominal")]
    m_max_nominal: Option<f64>,
    #[serde(rename = "R_1.4_nominal")]
    r_target_nominal: Option<f64>,
    #[serde(rename = "Lambda_1.4_nominal")]
    lambda_target_nominal: Option<f64>,
    delta_total_mmax_pct: Option<f64>,
    delta_total_r14_pct: Option<f64>,
    delta_total_lambda14_pct: Option<f64>,
    wfaktor_center: Option<f64>,
    solver_residual: Option<f64>,
    rho_c_target: Option<f64>,
    n_models: usize,
    expansions: usize,
    bracketed: bool,
    max_step_cm: f64,
    rtol: f64,
    atol: f64,
    error: &'a str,
}

/// Per-run dossiers plus aggregate index tables.
#[derive(Debug, Clone)]
pub struct AuditStore {
    root: PathBuf,
}

impl AuditStore {
    /// Open (and create) the store rooted at `output_dir`.
    pub fn open(output_dir: &Path) -> Result<Self, AppError> {
        let diagnostics = output_dir.join("diagnostics");
        fs::create_dir_all(&diagnostics).map_err(|e| AppError::io("create", &diagnostics, e))?;
        Ok(Self {
            root: output_dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.root.join("diagnostics")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.diagnostics_dir().join(run_id)
    }

    fn ensure_run_dir(&self, run_id: &str) -> Result<PathBuf, AppError> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).map_err(|e| AppError::io("create", &dir, e))?;
        Ok(dir)
    }

    /// Write summary, metadata and resolved configuration; write or remove
    /// the diagnosis depending on the status.
    pub fn write_run(&self, record: &RunRecord, config: &PipelineConfig) -> Result<PathBuf, AppError> {
        let dir = self.ensure_run_dir(&record.run_id)?;
        write_json(&dir.join(SUMMARY_FILE), record)?;

        let metadata = RunMetadata {
            run_id: record.run_id.clone(),
            eos: record.eos.clone(),
            case: record.case.clone(),
            variant: record.variant,
            params: record.params,
            timestamp: record.timestamp,
            seed: config.seed,
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_json(&dir.join(METADATA_FILE), &metadata)?;

        let run_config = RunConfigFile {
            effective_solver: record.settings,
            refined_solver: record
                .settings
                .refined(config.refined_step_factor, config.refined_tolerance_factor),
            config,
        };
        write_json(&dir.join(RUN_CONFIG_FILE), &run_config)?;

        self.write_diagnosis(record)?;
        Ok(dir)
    }

    /// `diagnosis.txt` for non-accepted runs; removes a stale one otherwise.
    pub fn write_diagnosis(&self, record: &RunRecord) -> Result<(), AppError> {
        let path = self.ensure_run_dir(&record.run_id)?.join(DIAGNOSIS_FILE);
        if record.status == RunStatus::Accepted {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| AppError::io("remove", &path, e))?;
            }
            return Ok(());
        }
        fs::write(&path, render_diagnosis(record)).map_err(|e| AppError::io("write", &path, e))
    }

    /// Persist a re-classified record without touching its metadata or
    /// configuration.
    pub fn rewrite_summary(&self, record: &RunRecord) -> Result<(), AppError> {
        let dir = self.ensure_run_dir(&record.run_id)?;
        write_json(&dir.join(SUMMARY_FILE), record)?;
        self.write_diagnosis(record)
    }

    pub fn write_profile(&self, run_id: &str, profile: &[ProfileSample]) -> Result<(), AppError> {
        let path = self.ensure_run_dir(run_id)?.join(PROFILE_FILE);
        let mut w = csv::Writer::from_path(&path).map_err(|e| AppError::io("create", &path, e))?;
        for sample in profile {
            w.serialize(sample)?;
        }
        w.flush().map_err(|e| AppError::io("write", &path, e))
    }

    pub fn read_summary(&self, run_id: &str) -> Result<RunRecord, AppError> {
        read_json(&self.run_dir(run_id).join(SUMMARY_FILE))
    }

    /// Append one self-contained line to the run's attempt log.
    pub fn append_attempt(&self, run_id: &str, entry: &AttemptEntry) -> Result<(), AppError> {
        let path = self.ensure_run_dir(run_id)?.join(ATTEMPT_LOG_FILE);
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::io("open", &path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| AppError::io("append to", &path, e))?;
        file.flush().map_err(|e| AppError::io("flush", &path, e))
    }

    /// Read a run's attempt log. A trailing line that fails to parse is
    /// treated as a torn write and skipped; earlier bad lines are errors.
    pub fn read_attempts(&self, run_id: &str) -> Result<Vec<AttemptEntry>, AppError> {
        let path = self.run_dir(run_id).join(ATTEMPT_LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(|e| AppError::io("open", &path, e))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| AppError::io("read", &path, e))?;
        let lines: Vec<&String> = lines.iter().filter(|l| !l.trim().is_empty()).collect();

        let mut out = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<AttemptEntry>(line) {
                Ok(entry) => out.push(entry),
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping torn attempt-log tail");
                }
                Err(e) => {
                    return Err(AppError::config(format!(
                        "Corrupt attempt log '{}' line {}: {e}",
                        path.display(),
                        i + 1
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Every `summary.json` below the diagnostics directory, sorted by run id.
    pub fn load_records(&self) -> Result<Vec<RunRecord>, AppError> {
        let dir = self.diagnostics_dir();
        let entries = fs::read_dir(&dir).map_err(|e| AppError::io("list", &dir, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AppError::io("list", &dir, e))?;
            let summary = entry.path().join(SUMMARY_FILE);
            if summary.is_file() {
                records.push(read_json::<RunRecord>(&summary)?);
            }
        }
        records.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(records)
    }

    /// Rewrite `audit_index.csv` and `audit_trail.csv` from `records`.
    pub fn write_tables(&self, records: &[RunRecord]) -> Result<(), AppError> {
        let index_path = self.root.join(INDEX_FILE);
        let trail_path = self.root.join(TRAIL_FILE);
        let mut index = csv::Writer::from_path(&index_path).map_err(|e| AppError::io("create", &index_path, e))?;
        let mut trail = csv::Writer::from_path(&trail_path).map_err(|e| AppError::io("create", &trail_path, e))?;

        let mut sorted: Vec<&RunRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        for (i, r) in sorted.into_iter().enumerate() {
            let row = self.index_row(i + 1, r);
            index.serialize(&row)?;
            trail.serialize(TrailRow {
                audit_id: row.audit_id,
                run_id: row.run_id,
                eos: row.eos,
                case: row.case,
                variant: row.variant,
                status: row.status,
                triggered_rules: row.triggered_rules,
                diagnostics_dir: row.diagnostics_dir,
                max_epsratio: row.max_epsratio,
                wfaktor_max: row.wfaktor_max,
                timestamp: row.timestamp,
                sigma: r.params.sigma,
                chi: r.params.chi,
                screening_factor: r.params.screening_factor,
                include_in_gravity: r.params.include_in_gravity,
                converged: r.converged,
                coverage_status: r.coverage_status(),
                m_max: r.m_max(),
                r_target: r.r_target(),
                lambda_target: r.lambda_target(),
                m_max_nominal: r.nominal.m_max_msun,
                r_target_nominal: r.nominal.r_target_km,
                lambda_target_nominal: r.nominal.lambda_target,
                delta_total_mmax_pct: r.delta_total.m_max_pct,
                delta_total_r14_pct: r.delta_total.r_target_pct,
                delta_total_lambda14_pct: r.delta_total.lambda_target_pct,
                wfaktor_center: r.wfaktor_center,
                solver_residual: r.solver_residual,
                rho_c_target: r.rho_c_target,
                n_models: r.n_models,
                expansions: r.expansions,
                bracketed: r.bracketed,
                max_step_cm: r.settings.max_step_cm,
                rtol: r.settings.rtol,
                atol: r.settings.atol,
                error: r.error.as_deref().unwrap_or(""),
            })?;
        }
        index.flush().map_err(|e| AppError::io("write", &index_path, e))?;
        trail.flush().map_err(|e| AppError::io("write", &trail_path, e))
    }

    fn index_row<'a>(&self, n: usize, r: &'a RunRecord) -> IndexRow<'a> {
        IndexRow {
            audit_id: format!("AUD-{n:04}"),
            run_id: &r.run_id,
            eos: &r.eos,
            case: &r.case,
            variant: r.variant.label(),
            status: r.status.label(),
            triggered_rules: r.reasons.join(";"),
            diagnostics_dir: self.run_dir(&r.run_id).display().to_string(),
            max_epsratio: r.max_epsratio,
            wfaktor_max: r.wfaktor_max,
            timestamp: r.timestamp.to_rfc3339(),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(|e| AppError::io("write", path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AppError> {
    let text = fs::read_to_string(path).map_err(|e| AppError::io("read", path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| AppError::config(format!("Invalid JSON in '{}': {e}", path.display())))
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.6}"),
        None => "n/a".to_string(),
    }
}

fn render_diagnosis(r: &RunRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run: {}\n", r.run_id));
    out.push_str(&format!("EOS: {}\n", r.eos));
    out.push_str(&format!("Case: {} (variant {})\n", r.case, r.variant));
    out.push_str(&format!(
        "Parameters: sigma={} chi={} screening_factor={} include_in_gravity={}\n",
        r.params.sigma, r.params.chi, r.params.screening_factor, r.params.include_in_gravity
    ));
    out.push_str(&format!("Timestamp: {}\n", r.timestamp.to_rfc3339()));
    out.push_str(&format!("Status: {}\n\n", r.status));

    out.push_str("Triggered rules:\n");
    if r.reasons.is_empty() {
        out.push_str("  (none)\n");
    }
    for reason in &r.reasons {
        out.push_str(&format!("  - {reason}\n"));
    }

    out.push_str("\nObserved:\n");
    out.push_str(&format!(
        "  converged={} coverage={} bracketed={} models={} expansions={}\n",
        r.converged,
        r.coverage_status(),
        r.bracketed,
        r.n_models,
        r.expansions
    ));
    out.push_str(&format!(
        "  Mmax={} R_1.4={} Lambda_1.4={}\n",
        fmt_opt(r.m_max()),
        fmt_opt(r.r_target()),
        fmt_opt(r.lambda_target())
    ));
    out.push_str(&format!(
        "  max_epsratio={} wfaktor_max={} delta_total_max_pct={}\n",
        fmt_opt(r.max_epsratio),
        fmt_opt(r.wfaktor_max),
        fmt_opt(r.delta_total.max_finite())
    ));
    out.push_str(&format!("  solver_residual={}\n", fmt_opt(r.solver_residual)));
    out.push_str(&format!(
        "  settings: max_step_cm={:e} rtol={:e} atol={:e}\n",
        r.settings.max_step_cm, r.settings.rtol, r.settings.atol
    ));
    if let Some(err) = &r.error {
        out.push_str(&format!("  error: {err}\n"));
    }

    out.push_str("\nDisposition: ");
    out.push_str(match r.status {
        RunStatus::Accepted => "included in headline results.",
        RunStatus::Stress => "reported as a stress case, outside the interpretable band.",
        RunStatus::Diagnostic => {
            "excluded from headline results pending refinement; see refinement_log.jsonl."
        }
        RunStatus::Excluded => "excluded from headline results; retained in the audit trail.",
    });
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::classify::tests::clean_record;
    use crate::domain::AttemptStatus;

    #[test]
    fn run_id_is_directory_safe() {
        assert_eq!(run_id("SLy-PP(Read2009)", "C_sigma_chi@0.02"), "SLy-PP_Read2009___C_sigma_chi_0.02");
    }

    #[test]
    fn summary_round_trips_and_diagnosis_follows_status() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        let config = PipelineConfig::default();

        let mut rec = clean_record(0.5);
        rec.status = RunStatus::Excluded;
        rec.reasons = vec!["epsratio_gt_0.30:0.5".into()];
        let dir = store.write_run(&rec, &config).unwrap();
        assert!(dir.join(METADATA_FILE).is_file());
        assert!(dir.join(RUN_CONFIG_FILE).is_file());
        let diagnosis = fs::read_to_string(dir.join(DIAGNOSIS_FILE)).unwrap();
        assert!(diagnosis.contains("Status: excluded"));
        assert!(diagnosis.contains("epsratio_gt_0.30:0.5"));

        let back = store.read_summary(&rec.run_id).unwrap();
        assert_eq!(back.status, RunStatus::Excluded);
        assert_eq!(back.max_epsratio, Some(0.5));

        rec.status = RunStatus::Accepted;
        store.write_run(&rec, &config).unwrap();
        assert!(!dir.join(DIAGNOSIS_FILE).exists());
    }

    #[test]
    fn attempt_log_is_append_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        store.append_attempt("r1", &AttemptEntry::new(AttemptStatus::Start)).unwrap();

        // A fresh handle appends after the existing line.
        let again = AuditStore::open(tmp.path()).unwrap();
        let mut entry = AttemptEntry::new(AttemptStatus::AttemptResult);
        entry.attempt = Some(1);
        again.append_attempt("r1", &entry).unwrap();

        let text = fs::read_to_string(store.run_dir("r1").join(ATTEMPT_LOG_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            serde_json::from_str::<AttemptEntry>(line).unwrap();
        }
        let entries = store.read_attempts("r1").unwrap();
        assert_eq!(entries[0].status, AttemptStatus::Start);
        assert_eq!(entries[1].attempt, Some(1));
    }

    #[test]
    fn torn_tail_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        store.append_attempt("r1", &AttemptEntry::new(AttemptStatus::Start)).unwrap();
        let path = store.run_dir("r1").join(ATTEMPT_LOG_FILE);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"timestamp\":\"20").unwrap();
        assert_eq!(store.read_attempts("r1").unwrap().len(), 1);
    }

    #[test]
    fn tables_have_one_row_per_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        let mut a = clean_record(0.05);
        a.run_id = "b_run".into();
        let mut b = clean_record(0.2);
        b.run_id = "a_run".into();
        b.status = RunStatus::Stress;
        b.reasons = vec!["epsratio_stress:0.2".into()];
        store.write_tables(&[a, b]).unwrap();

        let mut rdr = csv::Reader::from_path(tmp.path().join(INDEX_FILE)).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "audit_id");
        assert_eq!(&headers[6], "triggered_rules");
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "AUD-0001");
        assert_eq!(&rows[0][1], "a_run");
        assert_eq!(&rows[0][5], "stress");

        let mut trail = csv::Reader::from_path(tmp.path().join(TRAIL_FILE)).unwrap();
        let th = trail.headers().unwrap().clone();
        assert!(th.iter().any(|h| h == "Lambda_1.4"));
        assert_eq!(trail.records().count(), 2);
    }
}
