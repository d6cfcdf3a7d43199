//! Named equations of state.
//!
//! Piecewise parameters are `(log10 p1, Γ1, Γ2, Γ3)` from Read, Lackey, Owen &
//! Friedman (2009), Table III.

use crate::error::AppError;

use super::{Eos, PiecewisePolytrope, Polytrope};

const READ_2009: [(&str, f64, [f64; 3]); 5] = [
    ("SLy", 34.384, [3.005, 2.988, 2.851]),
    ("AP4", 34.269, [2.830, 3.445, 3.348]),
    ("H4", 34.669, [2.909, 2.246, 2.144]),
    ("MPA1", 34.495, [2.921, 3.132, 2.995]),
    ("WFF1", 34.031, [2.628, 2.885, 2.951]),
];

/// Name of the Γ=2 toy polytrope.
pub const TOY_POLYTROPE: &str = "Poly2(toy)";

/// All catalogue names, piecewise entries first.
pub fn names() -> Vec<String> {
    let mut out: Vec<String> = READ_2009.iter().map(|(n, _, _)| piecewise_label(n)).collect();
    out.push(TOY_POLYTROPE.to_string());
    out
}

fn piecewise_label(short: &str) -> String {
    format!("{short}-PP(Read2009)")
}

/// Look up an EOS by catalogue name.
///
/// Accepts either the full label (`SLy-PP(Read2009)`) or the short name (`SLy`),
/// case-insensitively.
pub fn by_name(name: &str) -> Result<Eos, AppError> {
    let wanted = name.trim();
    if wanted.eq_ignore_ascii_case(TOY_POLYTROPE) || wanted.eq_ignore_ascii_case("poly2") {
        return toy_polytrope().map(Eos::Polytrope);
    }
    for (short, log10_p1, gammas) in READ_2009 {
        if wanted.eq_ignore_ascii_case(short) || wanted.eq_ignore_ascii_case(&piecewise_label(short)) {
            return PiecewisePolytrope::new(piecewise_label(short), log10_p1, gammas).map(Eos::Piecewise);
        }
    }
    Err(AppError::config(format!(
        "Unknown EOS '{name}'. Known: {}.",
        names().join(", ")
    )))
}

/// Γ=2 polytrope through `(ρ, P) = (1e14 g/cm³, 3e34 dyne/cm²)`.
pub fn toy_polytrope() -> Result<Polytrope, AppError> {
    Polytrope::through_point(TOY_POLYTROPE, 2.0, 1.0e14, 3.0e34)
}

/// Every catalogue entry, in `names()` order.
pub fn all() -> Result<Vec<Eos>, AppError> {
    names().iter().map(|n| by_name(n)).collect()
}
