//! Numerical building blocks: physical constants, grids and interpolation,
//! and the adaptive ODE integrator used by the structure solver.

pub mod grid;
pub mod ode;
pub mod units;

pub use grid::*;
pub use ode::*;
pub use units::*;
