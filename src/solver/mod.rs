//! Stellar-structure solver: one-star integration, density scans and
//! stable-branch extraction.

pub mod branch;
pub mod scan;
pub mod structure;

pub use branch::{StableBranch, closest_to_mass, observables_at, stable_branch};
pub use scan::DensityScanner;
pub use structure::{
    FractionalMapping, InertialMapping, SolveError, StructureIntegrator, surface_response,
};
