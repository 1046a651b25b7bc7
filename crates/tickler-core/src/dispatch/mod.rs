//! Periodic delivery of due reminders.
//!
//! [`DispatchEngine`] performs one scan: fetch due records, attempt each
//! delivery, record the outcome. [`Scheduler`] runs scans on a fixed cadence
//! without letting them overlap.

mod engine;
mod scheduler;

pub use engine::{DispatchEngine, Scan, ScanReport};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStats};
