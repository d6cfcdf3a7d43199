//! Three-segment piecewise polytrope (Read et al. 2009 parameterisation).
//!
//! Segments are split at two fixed rest-mass densities. Pressure is matched at
//! each boundary through the `K_i`, and the energy-density offsets `a_i` are
//! solved once here so that `ε(P)` is continuous. Calls never re-check either.

use crate::error::AppError;
use crate::math::C2_CGS;

use super::{EquationOfState, Inverse};

/// First dividing density `10^14.7` g/cm³.
pub const RHO_1: f64 = 5.011_872_336_272_722e14;
/// Second dividing density `10^15.0` g/cm³.
pub const RHO_2: f64 = 1.0e15;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    k: f64,
    gamma: f64,
    /// Energy-density offset: `ε = (1 + a) ρc² + P/(Γ−1)`.
    a: f64,
}

impl Segment {
    fn pressure(&self, rho: f64) -> f64 {
        self.k * rho.powf(self.gamma)
    }

    fn energy(&self, rho: f64, p: f64) -> f64 {
        (1.0 + self.a) * rho * C2_CGS + p / (self.gamma - 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PiecewisePolytrope {
    name: String,
    segments: [Segment; 3],
    /// Pressures at `RHO_1` and `RHO_2`.
    p_break: [f64; 2],
}

impl PiecewisePolytrope {
    /// Build from `log10 p1` (pressure at `RHO_1`, dyne/cm²) and the three
    /// adiabatic indices.
    pub fn new(
        name: impl Into<String>,
        log10_p1: f64,
        gammas: [f64; 3],
    ) -> Result<Self, AppError> {
        let name = name.into();
        if !log10_p1.is_finite() {
            return Err(AppError::config(format!("{name}: log10 p1 must be finite.")));
        }
        if let Some(g) = gammas.iter().find(|g| !(g.is_finite() && **g > 1.0)) {
            return Err(AppError::config(format!("{name}: every Γ must exceed 1 (got {g}).")));
        }
        let [g1, g2, g3] = gammas;

        let p1 = 10f64.powf(log10_p1);
        let k1 = p1 / RHO_1.powf(g1);
        let k2 = k1 * RHO_1.powf(g1 - g2);
        let k3 = k2 * RHO_2.powf(g2 - g3);

        let s1 = Segment { k: k1, gamma: g1, a: 0.0 };
        let eps1 = s1.energy(RHO_1, p1);
        let a2 = eps1 / (RHO_1 * C2_CGS) - 1.0 - p1 / ((g2 - 1.0) * RHO_1 * C2_CGS);
        let s2 = Segment { k: k2, gamma: g2, a: a2 };

        let p2 = s2.pressure(RHO_2);
        let eps2 = s2.energy(RHO_2, p2);
        let a3 = eps2 / (RHO_2 * C2_CGS) - 1.0 - p2 / ((g3 - 1.0) * RHO_2 * C2_CGS);
        let s3 = Segment { k: k3, gamma: g3, a: a3 };

        Ok(Self {
            name,
            segments: [s1, s2, s3],
            p_break: [p1, p2],
        })
    }

    fn segment_for_density(&self, rho: f64) -> &Segment {
        if rho < RHO_1 {
            &self.segments[0]
        } else if rho < RHO_2 {
            &self.segments[1]
        } else {
            &self.segments[2]
        }
    }

    fn segment_for_pressure(&self, p: f64) -> &Segment {
        if p < self.p_break[0] {
            &self.segments[0]
        } else if p < self.p_break[1] {
            &self.segments[1]
        } else {
            &self.segments[2]
        }
    }

    pub fn break_pressures(&self) -> [f64; 2] {
        self.p_break
    }
}

impl EquationOfState for PiecewisePolytrope {
    fn name(&self) -> &str {
        &self.name
    }

    fn pressure_and_energy(&self, rho: f64) -> (f64, f64) {
        let rho = rho.max(0.0);
        let seg = self.segment_for_density(rho);
        let p = seg.pressure(rho);
        (p, seg.energy(rho, p))
    }

    fn invert(&self, pressure: f64) -> Inverse {
        if pressure <= 0.0 {
            return Inverse::VACUUM;
        }
        let seg = self.segment_for_pressure(pressure);
        let rho = (pressure / seg.k).powf(1.0 / seg.gamma);
        let eps = seg.energy(rho, pressure);
        let deps_dp =
            (1.0 + seg.a) * C2_CGS * rho / (seg.gamma * pressure) + 1.0 / (seg.gamma - 1.0);
        Inverse { rho, eps, deps_dp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sly() -> PiecewisePolytrope {
        PiecewisePolytrope::new("SLy", 34.384, [3.005, 2.988, 2.851]).unwrap()
    }

    fn rel(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs()
    }

    #[test]
    fn continuous_across_dividing_densities() {
        let eos = sly();
        for rho_b in [RHO_1, RHO_2] {
            let below = rho_b * (1.0 - 1e-13);
            let (p_lo, e_lo) = eos.pressure_and_energy(below);
            let (p_hi, e_hi) = eos.pressure_and_energy(rho_b);
            assert!(rel(p_lo, p_hi) < 1e-9, "pressure jump at {rho_b:e}");
            assert!(rel(e_lo, e_hi) < 1e-9, "energy jump at {rho_b:e}");
        }
    }

    #[test]
    fn pressure_at_first_break_matches_parameter() {
        let eos = sly();
        let (p1, _) = eos.pressure_and_energy(RHO_1);
        assert!(rel(p1, 10f64.powf(34.384)) < 1e-12);
    }

    #[test]
    fn round_trip_across_all_segments() {
        let eos = sly();
        for i in 0..=40 {
            let rho = 10f64.powf(13.5 + 0.05 * i as f64);
            let (p, eps) = eos.pressure_and_energy(rho);
            let inv = eos.invert(p);
            assert!(rel(inv.rho, rho) < 1e-6, "rho={rho:e}");
            assert!(rel(inv.eps, eps) < 1e-6);
        }
    }

    #[test]
    fn energy_increases_with_pressure() {
        let eos = sly();
        let mut last = 0.0;
        for i in 0..=200 {
            let p = 10f64.powf(32.0 + 0.025 * i as f64);
            let inv = eos.invert(p);
            assert!(inv.eps > last);
            assert!(inv.deps_dp > 0.0);
            last = inv.eps;
        }
    }

    #[test]
    fn rejects_bad_gamma() {
        assert!(PiecewisePolytrope::new("bad", 34.0, [3.0, 0.9, 3.0]).is_err());
    }
}
