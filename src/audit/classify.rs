//! Run classification.
//!
//! A run starts `accepted` and each rule may only make it more severe:
//!
//! 1. non-convergence, failed coverage, missing or non-finite numeric fields
//!    ⇒ `diagnostic`
//! 2. `wfaktor_max` above the ceiling ⇒ `diagnostic`
//! 3. any finite discretization discrepancy above the ceiling ⇒ `diagnostic`
//! 4. `max_epsratio` in `(eps_interpretable, eps_stress]` ⇒ `stress`;
//!    above `eps_stress` ⇒ `excluded`
//! 5. `max_epsratio` missing or non-finite ⇒ `diagnostic`
//!
//! The rule order fixes which reasons are recorded and in what order. The
//! result depends only on the record's numeric fields, so re-classifying an
//! unchanged record reproduces it exactly.

use crate::domain::{Classification, ClassifierThresholds, RunRecord, RunStatus};

pub struct RunClassifier {
    thresholds: ClassifierThresholds,
}

impl RunClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    pub fn classify(&self, run: &RunRecord) -> Classification {
        let t = &self.thresholds;
        let mut status = RunStatus::Accepted;
        let mut reasons: Vec<String> = Vec::new();

        if !run.converged {
            reasons.push("not_converged".to_string());
        }
        let coverage = run.coverage_status();
        if run.converged && coverage != crate::domain::OBS_OK {
            reasons.push(format!("coverage:{coverage}"));
        }
        let numeric = [
            ("Mmax", run.m_max()),
            ("R_1.4", run.r_target()),
            ("Lambda_1.4", run.lambda_target()),
        ]
        .into_iter()
        .chain(run.delta_total.named())
        .chain([
            ("wfaktor_max", run.wfaktor_max),
            ("max_epsratio", run.max_epsratio),
        ]);
        for (field, value) in numeric {
            match value {
                None => reasons.push(format!("parse_error:{field}")),
                Some(v) if !v.is_finite() => reasons.push(format!("nan_or_inf:{field}")),
                Some(_) => {}
            }
        }
        if !reasons.is_empty() {
            status = status.escalate(RunStatus::Diagnostic);
        }

        if let Some(wf) = run.wfaktor_max.filter(|v| v.is_finite()) {
            if wf > t.wfaktor_ceiling {
                status = status.escalate(RunStatus::Diagnostic);
                reasons.push(format!("extreme_wfaktor:{wf:?}"));
            }
        }

        if let Some(dmax) = run.delta_total.max_finite() {
            if dmax > t.delta_total_ceiling_pct {
                status = status.escalate(RunStatus::Diagnostic);
                reasons.push(format!("delta_total_gt_threshold:{dmax:?}"));
            }
        }

        match run.max_epsratio.filter(|v| v.is_finite()) {
            Some(e) if e <= t.eps_interpretable => {}
            Some(e) if e <= t.eps_stress => {
                status = status.escalate(RunStatus::Stress);
                reasons.push(format!("epsratio_stress:{e:?}"));
            }
            Some(e) => {
                status = status.escalate(RunStatus::Excluded);
                reasons.push(format!("epsratio_gt_{:.2}:{e:?}", t.eps_stress));
            }
            None => {
                status = status.escalate(RunStatus::Diagnostic);
                reasons.push("missing_epsratio".to_string());
            }
        }

        Classification { status, reasons }
    }

    /// Classify and store the result on the record.
    pub fn apply(&self, run: &mut RunRecord) {
        let c = self.classify(run);
        run.apply(c);
    }
}
