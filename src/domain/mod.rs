//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - perturbation parameters and named cases (`PerturbationParameters`, `CaseSpec`)
//! - solver outputs (`StellarModel`, `ScanFamily`, `Observables`)
//! - the classified unit of work (`RunRecord`, `RunStatus`) and its log rows
//! - the pipeline configuration (`PipelineConfig` and its parts)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
