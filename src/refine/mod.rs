//! Bounded, escalating retries for runs that did not classify cleanly.
//!
//! Every refined run gets one `START` line, one `ATTEMPT_RESULT` or
//! `REFINE_FAILED` line per attempt, and exactly one terminal line
//! (`RESOLVED`, `STRESS_RESOLVED` or `UNRESOLVED`) in its attempt log.
//! Attempts share nothing but the immutable configuration, so different runs
//! can be refined concurrently.

pub mod backend;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::audit::{AuditStore, RunClassifier};
use crate::domain::{
    AttemptEntry, AttemptStatus, CaseSpec, LadderStep, PipelineConfig, RunRecord, RunStatus,
    SolverSettings,
};
use crate::error::AppError;

pub use backend::{AttemptRequest, InProcessBackend, ProcessBackend, SolverBackend};

/// Cooperative stop flag checked before each attempt.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs eligible for refinement.
pub fn needs_refinement(record: &RunRecord) -> bool {
    !record.converged || matches!(record.status, RunStatus::Diagnostic | RunStatus::Excluded)
}

/// `{original}_ref{n}_gf{grid_factor}_nt{solver_tol}`.
pub fn attempt_tag(original: &str, attempt: usize, step: LadderStep) -> String {
    format!(
        "{original}_ref{attempt}_gf{:?}_nt{:e}",
        step.grid_factor, step.solver_tol
    )
}

/// Whether `run_id` names a refinement attempt rather than an original run.
pub fn is_attempt_tag(run_id: &str) -> bool {
    let Some((_, rest)) = run_id.rsplit_once("_ref") else {
        return false;
    };
    let Some((n, rest)) = rest.split_once("_gf") else {
        return false;
    };
    !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) && rest.contains("_nt")
}

/// How one original run ended up.
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub run_id: String,
    pub terminal: AttemptStatus,
    pub attempts: usize,
    /// Classified record of every attempt, in order.
    pub records: Vec<RunRecord>,
}

impl RefinementOutcome {
    /// The attempt that resolved the run, if any.
    pub fn resolved(&self) -> Option<&RunRecord> {
        match self.terminal {
            AttemptStatus::Resolved | AttemptStatus::StressResolved => self.records.last(),
            _ => None,
        }
    }
}

pub struct RefinementController<'a> {
    config: &'a PipelineConfig,
    classifier: RunClassifier,
    store: &'a AuditStore,
    backend: &'a dyn SolverBackend,
    cancel: CancellationToken,
}

impl<'a> RefinementController<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        store: &'a AuditStore,
        backend: &'a dyn SolverBackend,
    ) -> Self {
        Self {
            config,
            classifier: RunClassifier::new(config.thresholds),
            store,
            backend,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Settings and ladder size for one rung, derived from the original run.
    /// A rung never loosens a tolerance the original already ran with.
    fn escalate(&self, base: SolverSettings, step: LadderStep) -> (SolverSettings, usize) {
        let settings = SolverSettings {
            max_step_cm: base.max_step_cm / step.grid_factor,
            rtol: step.solver_tol.min(base.rtol),
            atol: (step.solver_tol * 1e-3).min(base.atol),
            ..base
        };
        let base_points = self.config.scan.points(self.config.fast) as f64;
        (settings, (base_points * step.grid_factor).ceil() as usize)
    }

    /// Retry `original` along the ladder until it resolves, the budget is
    /// spent, or the token is cancelled.
    pub fn refine(&self, original: &RunRecord) -> Result<RefinementOutcome, AppError> {
        let run_id = original.run_id.as_str();
        let case = CaseSpec {
            label: original.case.clone(),
            variant: original.variant,
            params: original.params,
        };
        let refinement = &self.config.refinement;
        let budget = refinement.attempts();

        self.store.append_attempt(
            run_id,
            &AttemptEntry {
                classification: Some(original.status),
                converged: Some(original.converged),
                ..AttemptEntry::new(AttemptStatus::Start)
            }
            .with_note(format!("backend={} attempts={budget}", self.backend.name())),
        )?;
        tracing::info!(run_id, status = %original.status, budget, "refinement started");

        let mut records = Vec::new();
        let mut terminal = None;
        for (i, step) in refinement.ladder.iter().copied().take(budget).enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let attempt = i + 1;
            let (settings, n_points) = self.escalate(original.settings, step);
            let run_tag = attempt_tag(run_id, attempt, step);
            let req = AttemptRequest {
                run_tag: run_tag.clone(),
                eos: original.eos.clone(),
                case: case.clone(),
                settings,
                n_points,
            };

            let mut record = self.backend.run(&req);
            self.classifier.apply(&mut record);
            self.store.write_run(&record, self.config)?;

            let tag = if record.error.is_some() {
                AttemptStatus::RefineFailed
            } else {
                AttemptStatus::AttemptResult
            };
            self.store.append_attempt(
                run_id,
                &AttemptEntry {
                    attempt: Some(attempt),
                    run_tag: Some(run_tag.clone()),
                    grid_factor: Some(step.grid_factor),
                    solver_tol: Some(step.solver_tol),
                    converged: Some(record.converged),
                    max_epsratio: record.max_epsratio,
                    wfaktor_max: record.wfaktor_max,
                    delta_total_max_pct: record.delta_total.max_finite(),
                    classification: Some(record.status),
                    error: record.error.clone(),
                    ..AttemptEntry::new(tag)
                },
            )?;
            tracing::info!(
                run_id,
                attempt,
                run_tag = %run_tag,
                status = %record.status,
                converged = record.converged,
                "refinement attempt"
            );

            let status = record.status;
            records.push(record);
            match status {
                RunStatus::Accepted => {
                    terminal = Some(AttemptStatus::Resolved);
                    break;
                }
                RunStatus::Stress => {
                    terminal = Some(AttemptStatus::StressResolved);
                    break;
                }
                RunStatus::Diagnostic | RunStatus::Excluded => {}
            }
        }

        let attempts = records.len();
        let entry = match terminal {
            Some(status) => AttemptEntry {
                attempt: Some(attempts),
                run_tag: records.last().map(|r| r.run_id.clone()),
                classification: records.last().map(|r| r.status),
                ..AttemptEntry::new(status)
            },
            None => {
                let note = if self.cancel.is_cancelled() {
                    "cancelled"
                } else {
                    "retry budget exhausted; run stays out of primary results"
                };
                AttemptEntry::new(AttemptStatus::Unresolved).with_note(note)
            }
        };
        let terminal = entry.status;
        self.store.append_attempt(run_id, &entry)?;
        tracing::info!(run_id, attempts, terminal = ?terminal, "refinement finished");

        Ok(RefinementOutcome {
            run_id: run_id.to_string(),
            terminal,
            attempts,
            records,
        })
    }

    /// Refine every eligible record; distinct runs proceed in parallel.
    pub fn refine_all(&self, originals: &[RunRecord]) -> Result<Vec<RefinementOutcome>, AppError> {
        originals
            .par_iter()
            .filter(|r| needs_refinement(r))
            .map(|r| self.refine(r))
            .collect()
    }
}
