//! Stable-branch selection and interpolation at the target mass.

use crate::domain::{OBS_OK, Observables, StellarModel};
use crate::math::{interp_linear, max_value};

pub const INSUFFICIENT_POINTS: &str = "insufficient_points";

/// Models kept for interpolation, in increasing central density and mass.
#[derive(Debug, Clone, Default)]
pub struct StableBranch {
    pub models: Vec<StellarModel>,
    /// Index of the first global mass maximum in the density-sorted input.
    pub peak_index: Option<usize>,
}

impl StableBranch {
    pub fn masses(&self) -> Vec<f64> {
        self.models.iter().map(|m| m.mass_msun).collect()
    }
}

/// Sort by central density, cut at the first mass maximum, then keep only
/// points whose mass exceeds every mass kept before them.
pub fn stable_branch(models: &[StellarModel]) -> StableBranch {
    let mut sorted: Vec<&StellarModel> = models.iter().collect();
    sorted.sort_by(|a, b| a.rho_c.total_cmp(&b.rho_c));

    let Some(peak) = first_argmax(sorted.iter().map(|m| m.mass_msun)) else {
        return StableBranch::default();
    };

    let mut kept: Vec<StellarModel> = Vec::with_capacity(peak + 1);
    for m in &sorted[..=peak] {
        if kept.last().is_none_or(|last| m.mass_msun > last.mass_msun) {
            kept.push((*m).clone());
        }
    }
    StableBranch {
        models: kept,
        peak_index: Some(peak),
    }
}

fn first_argmax(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Maximum mass plus radius and Λ interpolated at `target_msun`.
///
/// Coverage problems come back as a named status, never as silent NaN.
pub fn observables_at(models: &[StellarModel], target_msun: f64, min_points: usize) -> Observables {
    let m_max = max_value(models.iter().map(|m| m.mass_msun).filter(|m| m.is_finite()));

    let branch = stable_branch(models);
    if branch.models.len() < min_points {
        return Observables {
            m_max_msun: m_max,
            status: INSUFFICIENT_POINTS.to_string(),
            ..Observables::default()
        };
    }

    let masses = branch.masses();
    let lo = masses[0];
    let hi = masses[masses.len() - 1];
    if !(lo <= target_msun && target_msun <= hi) {
        return Observables {
            m_max_msun: m_max,
            status: format!("target_out_of_range:[{lo:.3},{hi:.3}]"),
            ..Observables::default()
        };
    }

    let radii: Vec<f64> = branch.models.iter().map(|m| m.radius_km).collect();
    let lambdas: Vec<f64> = branch.models.iter().map(|m| m.lambda).collect();
    Observables {
        m_max_msun: m_max,
        r_target_km: interp_linear(target_msun, &masses, &radii),
        lambda_target: interp_linear(target_msun, &masses, &lambdas),
        status: OBS_OK.to_string(),
    }
}

/// The model whose mass is closest to `target_msun` on the stable branch.
pub fn closest_to_mass(models: &[StellarModel], target_msun: f64) -> Option<&StellarModel> {
    let branch = stable_branch(models);
    let best_rho = branch
        .models
        .iter()
        .min_by(|a, b| {
            (a.mass_msun - target_msun)
                .abs()
                .total_cmp(&(b.mass_msun - target_msun).abs())
        })?
        .rho_c;
    models.iter().find(|m| m.rho_c == best_rho)
}
