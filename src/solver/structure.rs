//! Stellar structure + tidal response for one central density.
//!
//! The state `(m, P, y)` is integrated outward in geometrized units (lengths in
//! cm) from a small seed radius until the pressure falls through zero. At the
//! surface the compactness, the Love number `k2` and the tidal deformability
//! `Λ = (2/3) k2 / C⁵` are derived.
//!
//! The perturbation only changes the energy density seen by the inertial terms
//! (`ε + P` in the pressure gradient) unless `include_in_gravity` is set, in
//! which case it also sources `dm/dr` and the metric terms of the tidal
//! equation. The sound speed always comes from the unperturbed EOS.

use std::f64::consts::PI;

use thiserror::Error;

use crate::domain::{PerturbationParameters, ProfileSample, SolverSettings, StellarModel};
use crate::eos::{Eos, EquationOfState};
use crate::math::{
    CM_PER_KM, DormandPrince, EventDirection, EventFunction, IntegrationError, IntegrationResult,
    MSUN_GEOM_CM, OdeSystem, State, Tolerances, from_geom, to_geom,
};

/// Why one central density produced no model.
///
/// These are per-point failures: the scanner drops the point and continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("central density must be positive and finite (got {0})")]
    InvalidCentralDensity(f64),
    #[error("no surface before r_max={r_max_cm:e} cm")]
    SurfaceNotFound { r_max_cm: f64 },
    #[error("non-physical compactness C={compactness} (must be < 0.5)")]
    NonPhysicalCompactness { compactness: f64 },
    #[error("non-finite {0} at the surface")]
    NonFiniteSurface(&'static str),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

/// Maps the coupling and local gravitational energy density to the inertial
/// energy-density increment.
pub trait InertialMapping: Send + Sync {
    /// Increment `Δε` in the same units as `eps_grav`.
    fn increment(&self, params: &PerturbationParameters, eps_grav: f64, r_cm: f64) -> f64;

    /// `|Δε / ε_grav|` at one point.
    fn epsratio(&self, params: &PerturbationParameters, eps_grav: f64, r_cm: f64) -> f64 {
        if eps_grav == 0.0 {
            return 0.0;
        }
        (self.increment(params, eps_grav, r_cm) / eps_grav).abs()
    }
}

/// `Δε = σ·χ·S·ε_grav`, independent of radius.
#[derive(Debug, Clone, Copy, Default)]
pub struct FractionalMapping;

impl InertialMapping for FractionalMapping {
    fn increment(&self, params: &PerturbationParameters, eps_grav: f64, _r_cm: f64) -> f64 {
        params.coupling() * eps_grav
    }

    fn epsratio(&self, params: &PerturbationParameters, _eps_grav: f64, _r_cm: f64) -> f64 {
        params.coupling().abs()
    }
}

/// Ratio of the inertial increment to the local `|ε + P|`.
pub fn wfaktor(delta_eps: f64, eps_grav: f64, pressure: f64) -> f64 {
    delta_eps.abs() / ((eps_grav + pressure).abs() + f64::MIN_POSITIVE)
}

/// Love number `k2` from compactness and the surface value of `y`.
///
/// Requires `C < 0.5` for the logarithm; callers check that first.
pub fn love_number_k2(c: f64, y: f64) -> f64 {
    let one_m2c = 1.0 - 2.0 * c;
    let term1 = (8.0 * c.powi(5) / 5.0) * one_m2c.powi(2) * (2.0 + 2.0 * c * (y - 1.0) - y);
    let term2 = 2.0 * c * (6.0 - 3.0 * y + 3.0 * c * (5.0 * y - 8.0))
        + 4.0 * c.powi(3) * (13.0 - 11.0 * y + c * (3.0 * y - 2.0) + 2.0 * c * c * (1.0 + y))
        + 3.0 * one_m2c.powi(2) * (2.0 - y + 2.0 * c * (y - 1.0)) * one_m2c.ln();
    term1 / term2
}

/// Energy densities at one point of the star (geometrized).
#[derive(Debug, Clone, Copy)]
struct Local {
    eps_grav: f64,
    delta: f64,
    eps_inertial: f64,
    /// Energy density sourcing `dm/dr` and the metric.
    eps_source: f64,
    deps_dp: f64,
}

struct StructureSystem<'a> {
    eos: &'a Eos,
    params: PerturbationParameters,
    mapping: &'a dyn InertialMapping,
}

impl StructureSystem<'_> {
    fn local(&self, r: f64, p_geom: f64) -> Local {
        let inv = self.eos.invert(from_geom(p_geom));
        let eps_grav = to_geom(inv.eps);
        let delta = self.mapping.increment(&self.params, eps_grav, r);
        let eps_inertial = eps_grav + delta;
        let eps_source = if self.params.include_in_gravity {
            eps_inertial
        } else {
            eps_grav
        };
        Local {
            eps_grav,
            delta,
            eps_inertial,
            eps_source,
            deps_dp: inv.deps_dp,
        }
    }
}

impl OdeSystem for StructureSystem<'_> {
    fn rhs(&self, r: f64, s: &State) -> State {
        let (m, p, y) = (s[0], s[1], s[2]);
        if p <= 0.0 || r <= 0.0 {
            return State::zeros();
        }
        let loc = self.local(r, p);
        let cs2 = 1.0 / loc.deps_dp;
        let c1 = 1.0 - 2.0 * m / r;
        if c1 <= 0.0 {
            return State::from_element(f64::NAN);
        }
        let mass_term = m + 4.0 * PI * r.powi(3) * p;

        let dm = 4.0 * PI * r * r * loc.eps_source;
        let dp = -(loc.eps_inertial + p) * mass_term / (r * (r - 2.0 * m));

        let eps_bg = loc.eps_source;
        let f = (1.0 - 4.0 * PI * r * r * (eps_bg - p)) / c1;
        let q = 4.0 * PI * (5.0 * eps_bg + 9.0 * p + (eps_bg + p) / cs2) / c1
            - 6.0 / (r * r)
            - 4.0 * mass_term * mass_term / (r.powi(4) * c1 * c1);
        let dy = -y * y / r - y * f / r - r * q;

        State::new(dm, dp, dy)
    }
}

struct Surface;

impl EventFunction for Surface {
    fn eval(&self, _r: f64, s: &State) -> f64 {
        s[1]
    }
}

/// Raw accepted-step sample kept for profiles and the mass residual.
#[derive(Debug, Clone, Copy)]
struct Sample {
    r: f64,
    m: f64,
    p: f64,
    loc: Local,
}

/// Integrates one star for a fixed EOS, perturbation and solver settings.
pub struct StructureIntegrator<'a> {
    eos: &'a Eos,
    params: PerturbationParameters,
    mapping: &'a dyn InertialMapping,
    settings: SolverSettings,
}

impl<'a> StructureIntegrator<'a> {
    pub fn new(
        eos: &'a Eos,
        params: PerturbationParameters,
        mapping: &'a dyn InertialMapping,
        settings: SolverSettings,
    ) -> Self {
        Self {
            eos,
            params,
            mapping,
            settings,
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn solve(&self, rho_c: f64) -> Result<StellarModel, SolveError> {
        if !(rho_c.is_finite() && rho_c > 0.0) {
            return Err(SolveError::InvalidCentralDensity(rho_c));
        }
        let system = StructureSystem {
            eos: self.eos,
            params: self.params,
            mapping: self.mapping,
        };

        let (p_c_cgs, _) = self.eos.pressure_and_energy(rho_c);
        let p_c = to_geom(p_c_cgs);
        if !(p_c.is_finite() && p_c > 0.0) {
            return Err(SolveError::InvalidCentralDensity(rho_c));
        }

        let r0 = self.settings.r0_cm;
        let center = system.local(r0, p_c);
        let m0 = 4.0 / 3.0 * PI * r0.powi(3) * center.eps_source;
        let y_init = State::new(m0, p_c, 2.0);

        let tol = Tolerances::new(self.settings.rtol, self.settings.atol)
            .with_scale(State::new(MSUN_GEOM_CM, p_c, 1.0));
        let stepper = DormandPrince::new(tol, self.settings.max_step_cm, self.settings.max_steps);

        let keep = self.settings.store_profiles;
        let mut samples: Vec<Sample> = Vec::new();
        let outcome = stepper.integrate_to_event(
            &system,
            &Surface,
            EventDirection::Falling,
            r0,
            y_init,
            self.settings.r_max_cm,
            |r, s| {
                if keep && s[1] > 0.0 {
                    samples.push(Sample {
                        r,
                        m: s[0],
                        p: s[1],
                        loc: system.local(r, s[1]),
                    });
                }
            },
        )?;

        let (radius, state, last_error_norm, stats) = match outcome {
            IntegrationResult::Event {
                x,
                y,
                last_error_norm,
                stats,
            } => (x, y, last_error_norm, stats),
            IntegrationResult::Completed { .. } => {
                return Err(SolveError::SurfaceNotFound {
                    r_max_cm: self.settings.r_max_cm,
                });
            }
        };

        let mass = state[0];
        let y_surface = state[2];
        let (compactness, k2, lambda) = surface_response(mass, radius, y_surface)?;

        let wfaktor_center = wfaktor(center.delta, center.eps_grav, p_c);
        let center_epsratio = self.mapping.epsratio(&self.params, center.eps_grav, r0);

        let (wfaktor_max, max_epsratio, solver_residual, profile) = if keep && !samples.is_empty() {
            let profile: Vec<ProfileSample> = samples
                .iter()
                .map(|s| ProfileSample {
                    r_km: s.r / CM_PER_KM,
                    m_msun: s.m / MSUN_GEOM_CM,
                    pressure: from_geom(s.p),
                    eps_grav: from_geom(s.loc.eps_grav),
                    wfaktor: wfaktor(s.loc.delta, s.loc.eps_grav, s.p),
                    epsratio: self.mapping.epsratio(&self.params, s.loc.eps_grav, s.r),
                })
                .collect();
            let wf_max = profile.iter().map(|p| p.wfaktor).fold(wfaktor_center, f64::max);
            let eps_max = profile.iter().map(|p| p.epsratio).fold(center_epsratio, f64::max);
            (wf_max, eps_max, mass_residual(&samples), Some(profile))
        } else {
            (wfaktor_center, center_epsratio, last_error_norm, None)
        };

        Ok(StellarModel {
            rho_c,
            mass_msun: mass / MSUN_GEOM_CM,
            radius_km: radius / CM_PER_KM,
            compactness,
            k2,
            lambda,
            y_surface,
            wfaktor_center,
            wfaktor_max,
            max_epsratio,
            solver_residual,
            accepted_steps: stats.accepted,
            profile,
        })
    }
}

/// Compactness, `k2` and `Λ` from the surface state (geometrized mass and
/// radius). Anything at or beyond `C = 0.5` is rejected.
pub fn surface_response(mass: f64, radius: f64, y_surface: f64) -> Result<(f64, f64, f64), SolveError> {
    if !(mass.is_finite() && mass > 0.0) {
        return Err(SolveError::NonFiniteSurface("mass"));
    }
    if !y_surface.is_finite() {
        return Err(SolveError::NonFiniteSurface("tidal response"));
    }
    let compactness = mass / radius;
    if compactness >= 0.5 {
        return Err(SolveError::NonPhysicalCompactness { compactness });
    }
    let k2 = love_number_k2(compactness, y_surface);
    let lambda = 2.0 / 3.0 * k2 / compactness.powi(5);
    if !(k2.is_finite() && lambda.is_finite()) {
        return Err(SolveError::NonFiniteSurface("Love number"));
    }
    Ok((compactness, k2, lambda))
}

/// Largest relative mismatch between the finite-difference `dm/dr` and the
/// trapezoid average of `4πr²ε` over consecutive samples.
fn mass_residual(samples: &[Sample]) -> f64 {
    samples
        .windows(2)
        .filter_map(|w| {
            let (a, b) = (w[0], w[1]);
            let dr = b.r - a.r;
            if dr <= 0.0 {
                return None;
            }
            let fd = (b.m - a.m) / dr;
            let src = 2.0 * PI * (a.r * a.r * a.loc.eps_source + b.r * b.r * b.loc.eps_source);
            (src > 0.0).then(|| (fd - src).abs() / src)
        })
        .fold(0.0, f64::max)
}
