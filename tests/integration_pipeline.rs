//! End-to-end checks through the public API: solver, scanner, audit store,
//! classifier and refinement controller working together.

use tov_audit::app::pipeline::{self, Job};
use tov_audit::audit::store::{ATTEMPT_LOG_FILE, INDEX_FILE, TRAIL_FILE};
use tov_audit::audit::{AuditStore, RunClassifier, failed_record, run_id};
use tov_audit::domain::{
    AttemptStatus, CaseSpec, ClassifierThresholds, PerturbationParameters, PipelineConfig,
    RunStatus, SolverSettings,
};
use tov_audit::eos::{Eos, EquationOfState, Polytrope, catalog};
use tov_audit::math::{C2_CGS, G_CGS, MSUN_GEOM_CM};
use tov_audit::refine::{InProcessBackend, RefinementController};
use tov_audit::report::{self, RUNS_SUMMARY_FILE, SENSITIVITIES_FILE};
use tov_audit::solver::{DensityScanner, FractionalMapping, StructureIntegrator, stable_branch};

fn fast_config(dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        fast: true,
        output_dir: dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

#[test]
fn polytrope_star_has_textbook_mass_and_radius() {
    // K = 100, Γ = 2 with G = c = M☉ = 1, ρc = 1.28e-3, converted to cgs.
    let l = MSUN_GEOM_CM;
    let k_cgs = 100.0 * G_CGS * l * l;
    let rho_c = 1.28e-3 * C2_CGS / (G_CGS * l * l);
    let eos = Eos::Polytrope(Polytrope::new("ref", k_cgs, 2.0).unwrap());

    let model = StructureIntegrator::new(
        &eos,
        PerturbationParameters::zero(),
        &FractionalMapping,
        SolverSettings::default(),
    )
    .solve(rho_c)
    .unwrap();

    assert!((model.mass_msun - 1.40).abs() < 0.03, "M = {}", model.mass_msun);
    assert!((model.radius_km - 14.15).abs() < 0.4, "R = {}", model.radius_km);
    assert!(model.compactness > 0.0 && model.compactness < 0.5);
    assert!(model.k2 > 0.0 && model.lambda > 0.0);
    assert_eq!(model.max_epsratio, 0.0);
}

#[test]
fn inertial_perturbation_reports_exact_epsratio_and_small_shift() {
    let eos = catalog::by_name("SLy").unwrap();
    let config = PipelineConfig { fast: true, ..PipelineConfig::default() };
    let scan = |case: &CaseSpec| {
        DensityScanner::new(&eos, case.params, &FractionalMapping, config.solver, &config.scan, true)
            .scan()
            .unwrap()
    };
    let base = scan(&CaseSpec::baseline());
    let pert = scan(&CaseSpec::sigma_chi(0.06));

    assert!(pert.models.iter().all(|m| m.max_epsratio == 0.06));
    let m_base = stable_branch(&base.models).masses().into_iter().fold(0.0, f64::max);
    let m_pert = stable_branch(&pert.models).masses().into_iter().fold(0.0, f64::max);
    assert!(((m_pert - m_base) / m_base).abs() < 0.1, "{m_base} vs {m_pert}");
}

#[test]
fn stable_branch_masses_strictly_increase() {
    let eos = catalog::by_name("AP4").unwrap();
    let config = PipelineConfig::default();
    let family = DensityScanner::new(
        &eos,
        PerturbationParameters::zero(),
        &FractionalMapping,
        config.solver,
        &config.scan,
        true,
    )
    .scan()
    .unwrap();
    let masses = stable_branch(&family.models).masses();
    assert!(masses.len() >= 2);
    assert!(masses.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn canonical_runs_write_dossiers_and_tables() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(tmp.path());
    let store = AuditStore::open(tmp.path()).unwrap();
    let eos = pipeline::resolve_eos(&["SLy".to_string()]).unwrap();
    let jobs = pipeline::canonical_jobs(&eos, config.sigma);

    let records = pipeline::run_jobs(&config, &FractionalMapping, &store, &jobs).unwrap();
    assert_eq!(records.len(), 3);
    for r in &records {
        assert!(r.converged, "{} did not converge: {:?}", r.run_id, r.error);
        let dir = store.run_dir(&r.run_id);
        for file in ["summary.json", "metadata.json", "run_config.json"] {
            assert!(dir.join(file).is_file(), "{file} missing for {}", r.run_id);
        }
        assert_eq!(dir.join("diagnosis.txt").exists(), r.status != RunStatus::Accepted);
    }
    let c = records.iter().find(|r| r.case == "C_sigma_chi").unwrap();
    assert_eq!(c.max_epsratio, Some(0.06));

    let primary = pipeline::write_tables(&store).unwrap();
    assert_eq!(primary.len(), 3);
    let index = std::fs::read_to_string(tmp.path().join(INDEX_FILE)).unwrap();
    assert_eq!(index.lines().count(), 4);
    assert!(index.lines().nth(1).unwrap().starts_with("AUD-0001,"));
    assert!(tmp.path().join(TRAIL_FILE).is_file());
    let headline: Vec<_> = primary.iter().filter(|r| report::is_primary_result(r)).collect();
    let summary = std::fs::read_to_string(tmp.path().join(RUNS_SUMMARY_FILE)).unwrap();
    assert_eq!(summary.lines().count(), 1 + headline.len());
    if headline.len() > 1 && headline.iter().any(|r| r.case == "A_baseline") {
        let sens = std::fs::read_to_string(tmp.path().join(SENSITIVITIES_FILE)).unwrap();
        assert_eq!(sens.lines().count(), headline.len());
    }
    let partitioned: usize = RunStatus::ALL
        .into_iter()
        .map(|s| {
            let text = std::fs::read_to_string(tmp.path().join(report::partition_file(s))).unwrap();
            text.lines().count().saturating_sub(1)
        })
        .sum();
    assert_eq!(partitioned, 3);

    // Re-classifying unchanged records reproduces them.
    let again = pipeline::classify_stored(&config, &store).unwrap();
    for (a, b) in records.iter().zip(&again) {
        assert_eq!(a.classification(), b.classification());
    }
}

#[test]
fn stricter_thresholds_reclassify_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = fast_config(tmp.path());
    let store = AuditStore::open(tmp.path()).unwrap();
    let job = Job {
        eos: catalog::by_name("SLy").unwrap(),
        case: CaseSpec::sigma_chi(0.06),
    };
    let id = run_id(job.eos.name(), &job.case.label);
    let first = pipeline::run_case(&config, &FractionalMapping, &store, &job, &id, config.solver, None).unwrap();
    assert_eq!(first.max_epsratio, Some(0.06));

    config.thresholds = ClassifierThresholds {
        eps_interpretable: 0.01,
        eps_stress: 0.05,
        ..ClassifierThresholds::default()
    };
    let again = pipeline::classify_stored(&config, &store).unwrap();
    assert_eq!(again[0].status, RunStatus::Excluded);
    assert!(again[0].reasons.iter().any(|r| r == "epsratio_gt_0.05:0.06"));
    assert!(store.run_dir(&id).join("diagnosis.txt").is_file());
}

#[test]
fn unknown_eos_is_refined_to_a_single_unresolved_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let config = fast_config(tmp.path());
    let store = AuditStore::open(tmp.path()).unwrap();

    let mut original = failed_record("Nope__A_baseline", "Nope", &CaseSpec::baseline(), config.solver, "not run");
    RunClassifier::new(config.thresholds).apply(&mut original);
    assert_eq!(original.status, RunStatus::Diagnostic);

    let backend = InProcessBackend::new(&config, &FractionalMapping);
    let outcome = RefinementController::new(&config, &store, &backend)
        .refine(&original)
        .unwrap();
    assert_eq!(outcome.terminal, AttemptStatus::Unresolved);
    assert_eq!(outcome.attempts, config.refinement.attempts());

    let log = store.read_attempts("Nope__A_baseline").unwrap();
    assert_eq!(log.first().map(|e| e.status), Some(AttemptStatus::Start));
    assert_eq!(log.iter().filter(|e| e.status.is_terminal()).count(), 1);
    assert!(
        log.iter()
            .filter(|e| e.status == AttemptStatus::RefineFailed)
            .all(|e| e.error.as_deref().unwrap_or("").contains("Unknown EOS"))
    );
}

#[test]
fn attempt_log_survives_reopening() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = AuditStore::open(tmp.path()).unwrap();
        store
            .append_attempt("r", &tov_audit::domain::AttemptEntry::new(AttemptStatus::Start))
            .unwrap();
    }
    let store = AuditStore::open(tmp.path()).unwrap();
    store
        .append_attempt(
            "r",
            &tov_audit::domain::AttemptEntry::new(AttemptStatus::Unresolved).with_note("cancelled"),
        )
        .unwrap();

    let text = std::fs::read_to_string(store.run_dir("r").join(ATTEMPT_LOG_FILE)).unwrap();
    assert_eq!(text.lines().count(), 2);
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
    let entries = store.read_attempts("r").unwrap();
    assert_eq!(entries[1].note.as_deref(), Some("cancelled"));
}
