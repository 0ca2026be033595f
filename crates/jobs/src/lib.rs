// crates/jobs/src/lib.rs
//! Background job core for taskdeck.
//!
//! Provides:
//! - `JobExecutor` — pluggable capability that performs a job's actual work
//! - `JobService` — job lifecycle and the pending-claim processing loop
//! - `EventHub` — per-user broadcast registry for server-push updates

pub mod executor;
pub mod hub;
pub mod service;

pub use executor::{AgentExecutor, ExecutorError, JobExecutor};
pub use hub::{ClientId, EventHub};
pub use service::{JobError, JobService, JobUpdate};
