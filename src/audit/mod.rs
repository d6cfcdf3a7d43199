//! Discretization audit, run classification and the on-disk audit store.

pub mod classify;
pub mod discretization;
pub mod store;

pub use classify::RunClassifier;
pub use discretization::{Audit, DiscretizationAuditor, build_record, failed_record};
pub use store::{AuditStore, run_id};
