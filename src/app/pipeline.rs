//! Shared pipeline steps used by every subcommand.
//!
//! Workflow per (EOS, case):
//! nominal + refined scan -> RunRecord -> classification -> run directory
//!
//! The subcommands differ only in which (EOS, case) pairs they feed through
//! it and in what they do with the records afterwards.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::audit::{AuditStore, DiscretizationAuditor, RunClassifier, build_record, failed_record, run_id};
use crate::domain::{AttemptStatus, CaseSpec, PipelineConfig, RunRecord, SolverSettings};
use crate::eos::{Eos, EquationOfState, catalog};
use crate::error::AppError;
use crate::refine::{
    CancellationToken, RefinementController, RefinementOutcome, SolverBackend, is_attempt_tag,
};
use crate::solver::{InertialMapping, closest_to_mass};

/// One (EOS, case) unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub eos: Eos,
    pub case: CaseSpec,
}

/// Catalogue entries named in `names`, or the whole catalogue if empty.
pub fn resolve_eos(names: &[String]) -> Result<Vec<Eos>, AppError> {
    if names.is_empty() {
        return catalog::all();
    }
    names.iter().map(|n| catalog::by_name(n)).collect()
}

/// EOS × canonical cases at the configured σ.
pub fn canonical_jobs(eos: &[Eos], sigma: f64) -> Vec<Job> {
    eos.iter()
        .flat_map(|e| {
            CaseSpec::canonical(sigma)
                .into_iter()
                .map(move |case| Job { eos: e.clone(), case })
        })
        .collect()
}

/// EOS × (baseline + one Variant A case per σ).
pub fn sigma_scan_jobs(eos: &[Eos], sigmas: &[f64]) -> Vec<Job> {
    eos.iter()
        .flat_map(|e| {
            std::iter::once(CaseSpec::baseline())
                .chain(sigmas.iter().map(|s| CaseSpec::sigma_scan_point(*s)))
                .map(move |case| Job { eos: e.clone(), case })
        })
        .collect()
}

/// Scan, classify and persist one (EOS, case). Scan failures become a
/// `converged = false` record instead of an error.
pub fn run_case(
    config: &PipelineConfig,
    mapping: &dyn InertialMapping,
    store: &AuditStore,
    job: &Job,
    run_id: &str,
    settings: SolverSettings,
    n_points: Option<usize>,
) -> Result<RunRecord, AppError> {
    let auditor = DiscretizationAuditor::new(config, mapping);
    let target = config.scan.target_mass_msun;
    let (mut record, profile) = match auditor.audit(&job.eos, &job.case, settings, n_points) {
        Ok(audit) => {
            let record = build_record(run_id, &job.eos, &job.case, settings, &audit, target);
            let profile = closest_to_mass(&audit.refined.models, target).and_then(|m| m.profile.clone());
            (record, profile)
        }
        Err(err) => {
            tracing::warn!(run_id, eos = job.eos.name(), case = %job.case.label, error = %err, "scan failed");
            let record = failed_record(run_id, job.eos.name(), &job.case, settings, err.message());
            (record, None)
        }
    };

    RunClassifier::new(config.thresholds).apply(&mut record);
    store.write_run(&record, config)?;
    if let Some(profile) = profile.filter(|p| !p.is_empty()) {
        store.write_profile(run_id, &profile)?;
    }
    tracing::info!(
        run_id,
        eos = %record.eos,
        case = %record.case,
        status = %record.status,
        reasons = %record.reasons.join(";"),
        "run classified"
    );
    Ok(record)
}

/// Run every job in parallel; each job owns its own run directory.
pub fn run_jobs(
    config: &PipelineConfig,
    mapping: &dyn InertialMapping,
    store: &AuditStore,
    jobs: &[Job],
) -> Result<Vec<RunRecord>, AppError> {
    let mut records: Vec<RunRecord> = jobs
        .par_iter()
        .map(|job| {
            let id = run_id(job.eos.name(), &job.case.label);
            run_case(config, mapping, store, job, &id, config.solver, None)
        })
        .collect::<Result<_, _>>()?;
    records.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    Ok(records)
}

/// Reload every stored run, re-classify with the current thresholds and
/// persist the new status.
pub fn classify_stored(config: &PipelineConfig, store: &AuditStore) -> Result<Vec<RunRecord>, AppError> {
    let classifier = RunClassifier::new(config.thresholds);
    let mut records = store.load_records()?;
    for record in &mut records {
        let before = record.status;
        classifier.apply(record);
        if before != record.status {
            tracing::info!(run_id = %record.run_id, from = %before, to = %record.status, "status changed");
        }
        store.rewrite_summary(record)?;
    }
    Ok(records)
}

/// Placeholder records for canonical pairs that have never been run.
pub fn not_run_records(
    config: &PipelineConfig,
    existing: &[RunRecord],
) -> Result<Vec<RunRecord>, AppError> {
    let eos = catalog::all()?;
    let out = canonical_jobs(&eos, config.sigma)
        .into_iter()
        .filter_map(|job| {
            let id = run_id(job.eos.name(), &job.case.label);
            (!existing.iter().any(|r| r.run_id == id))
                .then(|| failed_record(&id, job.eos.name(), &job.case, config.solver, "not run"))
        })
        .collect();
    Ok(out)
}

/// Refine every eligible original run found in the store.
pub fn refine_stored(
    config: &PipelineConfig,
    store: &AuditStore,
    backend: &dyn SolverBackend,
    cancel: CancellationToken,
) -> Result<Vec<RefinementOutcome>, AppError> {
    let classifier = RunClassifier::new(config.thresholds);
    let mut originals: Vec<RunRecord> = store
        .load_records()?
        .into_iter()
        .filter(|r| !is_attempt_tag(&r.run_id))
        .collect();
    if config.refinement.retry_not_run {
        for mut placeholder in not_run_records(config, &originals)? {
            classifier.apply(&mut placeholder);
            store.write_run(&placeholder, config)?;
            originals.push(placeholder);
        }
    }

    RefinementController::new(config, store, backend)
        .with_cancellation(cancel)
        .refine_all(&originals)
}

/// An attempt only stands in for the original it was computed from.
fn same_computation(original: &RunRecord, attempt: &RunRecord) -> bool {
    attempt.eos == original.eos
        && attempt.case == original.case
        && attempt.variant == original.variant
        && attempt.params == original.params
}

/// Original runs, each replaced by the attempt that resolved it if any.
/// Attempts that did not resolve their run stay in the trail only, and a
/// resolution logged before the original was (re)computed is stale.
pub fn primary_records(store: &AuditStore, all: &[RunRecord]) -> Result<Vec<RunRecord>, AppError> {
    let by_id: HashMap<&str, &RunRecord> = all.iter().map(|r| (r.run_id.as_str(), r)).collect();
    let mut out = Vec::new();
    for original in all.iter().filter(|r| !is_attempt_tag(&r.run_id)) {
        let log = store.read_attempts(&original.run_id)?;
        let resolved = log
            .iter()
            .rev()
            .find(|e| e.status.is_terminal())
            .filter(|e| matches!(e.status, AttemptStatus::Resolved | AttemptStatus::StressResolved))
            .filter(|e| e.timestamp >= original.timestamp)
            .and_then(|e| e.run_tag.as_deref())
            .and_then(|tag| by_id.get(tag))
            .filter(|attempt| same_computation(original, attempt));
        out.push(resolved.map_or_else(|| original.clone(), |r| (*r).clone()));
    }
    Ok(out)
}

/// Rewrite the aggregate tables from everything on disk.
pub fn write_tables(store: &AuditStore) -> Result<Vec<RunRecord>, AppError> {
    let all = store.load_records()?;
    store.write_tables(&all)?;
    let primary = primary_records(store, &all)?;
    crate::report::write_reports(store.root(), &primary)?;
    Ok(primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AttemptEntry;

    #[test]
    fn job_lists_cover_every_pair() {
        let eos = resolve_eos(&["SLy".into(), "Poly2(toy)".into()]).unwrap();
        let jobs = canonical_jobs(&eos, 0.06);
        assert_eq!(jobs.len(), 6);
        assert_eq!(jobs[1].case.label, "B_legacy");

        let jobs = sigma_scan_jobs(&eos, &[0.02, 0.04, 0.06]);
        assert_eq!(jobs.len(), 8);
        assert_eq!(jobs[3].case.label, "C_sigma_chi@0.06");
    }

    #[test]
    fn not_run_pairs_are_placeholders() {
        let config = PipelineConfig::default();
        let existing = vec![failed_record(
            &run_id("SLy-PP(Read2009)", "A_baseline"),
            "SLy-PP(Read2009)",
            &CaseSpec::baseline(),
            config.solver,
            "x",
        )];
        let missing = not_run_records(&config, &existing).unwrap();
        assert_eq!(missing.len(), 17);
        assert!(missing.iter().all(|r| !r.converged && r.error.as_deref() == Some("not run")));
    }

    #[test]
    fn resolved_attempt_supersedes_original() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        let config = PipelineConfig::default();
        let original = failed_record("SLy__C", "SLy", &CaseSpec::sigma_chi(0.06), config.solver, "x");
        let mut attempt = original.clone();
        attempt.run_id = "SLy__C_ref1_gf1.5_nt1e-6".into();
        attempt.converged = true;
        store
            .append_attempt(
                "SLy__C",
                &AttemptEntry {
                    run_tag: Some(attempt.run_id.clone()),
                    ..AttemptEntry::new(AttemptStatus::Resolved)
                },
            )
            .unwrap();

        let primary = primary_records(&store, &[original, attempt]).unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].run_id, "SLy__C_ref1_gf1.5_nt1e-6");
    }

    #[test]
    fn stale_resolution_does_not_replace_a_fresh_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuditStore::open(tmp.path()).unwrap();
        let config = PipelineConfig::default();

        // A σ = 0.06 run was refined and resolved an hour ago ...
        let mut old_attempt = failed_record("SLy__C", "SLy", &CaseSpec::sigma_chi(0.06), config.solver, "old");
        old_attempt.run_id = "SLy__C_ref1_gf1.5_nt1e-6".into();
        old_attempt.timestamp = chrono::Utc::now() - chrono::Duration::hours(1);
        store
            .append_attempt(
                "SLy__C",
                &AttemptEntry {
                    timestamp: old_attempt.timestamp,
                    run_tag: Some(old_attempt.run_id.clone()),
                    ..AttemptEntry::new(AttemptStatus::Resolved)
                },
            )
            .unwrap();
        // ... and the case has since been re-run at σ = 0.1.
        let fresh = failed_record("SLy__C", "SLy", &CaseSpec::sigma_chi(0.1), config.solver, "fresh");

        let primary = primary_records(&store, &[fresh.clone(), old_attempt.clone()]).unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].run_id, "SLy__C");
        assert_eq!(primary[0].params.sigma, 0.1);

        // A newer resolution computed for different parameters is ignored too.
        store
            .append_attempt(
                "SLy__C",
                &AttemptEntry {
                    run_tag: Some(old_attempt.run_id.clone()),
                    ..AttemptEntry::new(AttemptStatus::Resolved)
                },
            )
            .unwrap();
        let primary = primary_records(&store, &[fresh, old_attempt]).unwrap();
        assert_eq!(primary[0].error.as_deref(), Some("fresh"));
    }
}
