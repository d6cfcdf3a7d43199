//! `tov-audit` library crate.
//!
//! The binary (`tov`) is a thin wrapper around this library so that:
//!
//! - the solver and the audit protocol are testable without spawning processes
//! - the refinement controller can drive the same code in-process or through `tov point`
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod audit;
pub mod cli;
pub mod domain;
pub mod eos;
pub mod error;
pub mod math;
pub mod refine;
pub mod report;
pub mod solver;
