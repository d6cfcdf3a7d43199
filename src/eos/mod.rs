//! Equations of state.
//!
//! An EOS maps rest-mass density to pressure and energy density and back, all
//! in cgs. Two variants exist (single and piecewise polytropes); callers hold
//! the closed [`Eos`] enum and dispatch statically.

pub mod catalog;
pub mod piecewise;
pub mod polytrope;

pub use piecewise::PiecewisePolytrope;
pub use polytrope::Polytrope;

/// Result of inverting the EOS at a given pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inverse {
    /// Rest-mass density [g/cm³].
    pub rho: f64,
    /// Total energy density [erg/cm³].
    pub eps: f64,
    /// `dε/dP` (dimensionless); `1/dε/dP` is the squared sound speed.
    pub deps_dp: f64,
}

impl Inverse {
    pub const VACUUM: Inverse = Inverse {
        rho: 0.0,
        eps: 0.0,
        deps_dp: 0.0,
    };
}

pub trait EquationOfState {
    fn name(&self) -> &str;

    /// `(P, ε)` at rest-mass density `rho`.
    fn pressure_and_energy(&self, rho: f64) -> (f64, f64);

    /// `(ρ, ε, dε/dP)` at pressure `pressure`; non-positive pressure is vacuum.
    fn invert(&self, pressure: f64) -> Inverse;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eos {
    Polytrope(Polytrope),
    Piecewise(PiecewisePolytrope),
}

impl Eos {
    pub fn kind(&self) -> &'static str {
        match self {
            Eos::Polytrope(_) => "polytrope",
            Eos::Piecewise(_) => "piecewise_polytrope",
        }
    }
}

impl EquationOfState for Eos {
    fn name(&self) -> &str {
        match self {
            Eos::Polytrope(e) => e.name(),
            Eos::Piecewise(e) => e.name(),
        }
    }

    fn pressure_and_energy(&self, rho: f64) -> (f64, f64) {
        match self {
            Eos::Polytrope(e) => e.pressure_and_energy(rho),
            Eos::Piecewise(e) => e.pressure_and_energy(rho),
        }
    }

    fn invert(&self, pressure: f64) -> Inverse {
        match self {
            Eos::Polytrope(e) => e.invert(pressure),
            Eos::Piecewise(e) => e.invert(pressure),
        }
    }
}
