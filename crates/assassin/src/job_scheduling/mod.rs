//! Job scheduling subsystem
//!
//! - `JobScheduler`: the in-process job table and its per-job drivers
//! - `Reconciler`: keeps the job table in line with stored task definitions

pub mod job_scheduler;
pub mod reconciler;
pub mod types;

pub use job_scheduler::JobScheduler;
pub use reconciler::{ReconcileReport, Reconciler};
pub use types::*;
