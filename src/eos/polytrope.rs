//! Single polytrope `P = K ρ^Γ`.

use crate::error::AppError;
use crate::math::C2_CGS;

use super::{EquationOfState, Inverse};

/// Single-segment polytrope in cgs units.
///
/// Energy density follows the ideal-fluid relation `ε = ρc² + P/(Γ−1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polytrope {
    name: String,
    k: f64,
    gamma: f64,
}

impl Polytrope {
    pub fn new(name: impl Into<String>, k: f64, gamma: f64) -> Result<Self, AppError> {
        if !(k.is_finite() && k > 0.0) {
            return Err(AppError::config(format!("Polytrope K must be positive and finite (got {k}).")));
        }
        if !(gamma.is_finite() && gamma > 1.0) {
            return Err(AppError::config(format!("Polytrope Γ must exceed 1 (got {gamma}).")));
        }
        Ok(Self {
            name: name.into(),
            k,
            gamma,
        })
    }

    /// Build from a reference point `(ρ_ref, P_ref)` instead of `K`.
    pub fn through_point(
        name: impl Into<String>,
        gamma: f64,
        rho_ref: f64,
        p_ref: f64,
    ) -> Result<Self, AppError> {
        if !(rho_ref > 0.0 && p_ref > 0.0) {
            return Err(AppError::config("Polytrope reference point must be positive."));
        }
        Self::new(name, p_ref / rho_ref.powf(gamma), gamma)
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl EquationOfState for Polytrope {
    fn name(&self) -> &str {
        &self.name
    }

    fn pressure_and_energy(&self, rho: f64) -> (f64, f64) {
        let rho = rho.max(0.0);
        let p = self.k * rho.powf(self.gamma);
        let eps = rho * C2_CGS + p / (self.gamma - 1.0);
        (p, eps)
    }

    fn invert(&self, pressure: f64) -> Inverse {
        if pressure <= 0.0 {
            return Inverse::VACUUM;
        }
        let rho = (pressure / self.k).powf(1.0 / self.gamma);
        let eps = rho * C2_CGS + pressure / (self.gamma - 1.0);
        let deps_dp = C2_CGS * rho / (self.gamma * pressure) + 1.0 / (self.gamma - 1.0);
        Inverse { rho, eps, deps_dp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_over_six_decades() {
        let eos = Polytrope::new("test", 3.0e6, 2.0).unwrap();
        for i in 0..=60 {
            let rho = 10f64.powf(11.0 + 0.1 * i as f64);
            let (p, eps) = eos.pressure_and_energy(rho);
            let inv = eos.invert(p);
            assert!((inv.rho / rho - 1.0).abs() < 1e-10, "rho={rho}");
            assert!((inv.eps / eps - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let eos = Polytrope::new("test", 3.0e6, 2.0).unwrap();
        let p = 1.0e34;
        let h = p * 1e-6;
        let fd = (eos.invert(p + h).eps - eos.invert(p - h).eps) / (2.0 * h);
        assert!((eos.invert(p).deps_dp / fd - 1.0).abs() < 1e-6);
    }

    #[test]
    fn non_positive_pressure_is_vacuum() {
        let eos = Polytrope::new("test", 3.0e6, 2.0).unwrap();
        assert_eq!(eos.invert(0.0), Inverse::VACUUM);
        assert_eq!(eos.invert(-1.0), Inverse::VACUUM);
    }

    #[test]
    fn rejects_soft_gamma() {
        assert!(Polytrope::new("bad", 1.0, 1.0).is_err());
        assert!(Polytrope::new("bad", -1.0, 2.0).is_err());
    }
}
