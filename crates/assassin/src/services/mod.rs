//! Periodic services built on the coordination store

pub mod overdue_monitor;
pub mod recovery;

pub use overdue_monitor::{MonitorOutcome, OverdueMonitor};
pub use recovery::RecoverySweep;
