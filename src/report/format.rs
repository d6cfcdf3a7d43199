//! Terminal output.
//!
//! Formatting lives here so the pipeline returns data and the binary decides
//! what to print.

use crate::domain::{RunRecord, RunStatus};

/// Per-run table: EOS, case, status, headline observables and reasons.
pub fn format_run_table(records: &[RunRecord]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<20} {:<22} {:<10} {:>8} {:>8} {:>10} {}\n",
            "EOS", "case", "status", "Mmax", "R_1.4", "Lambda_1.4", "reasons"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<20} {:-<22} {:-<10} {:-<8} {:-<8} {:-<10} {:-<7}\n",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in records {
        out.push_str(
            format!(
                "{:<20} {:<22} {:<10} {:>8} {:>8} {:>10} {}\n",
                truncate(&r.eos, 20),
                truncate(&r.case, 22),
                r.status.label(),
                fmt_opt(r.m_max(), 3),
                fmt_opt(r.r_target(), 2),
                fmt_opt(r.lambda_target(), 1),
                r.reasons.join(";"),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// One line with the count per status, e.g. `accepted=12 stress=3 ...`.
pub fn format_status_counts(records: &[RunRecord]) -> String {
    let parts: Vec<String> = RunStatus::ALL
        .iter()
        .map(|s| {
            let n = records.iter().filter(|r| r.status == *s).count();
            format!("{}={n}", s.label())
        })
        .collect();
    let unconverged = records.iter().filter(|r| !r.converged).count();
    format!("runs={} {} not_converged={unconverged}", records.len(), parts.join(" "))
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        Some(_) => "nan".to_string(),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
