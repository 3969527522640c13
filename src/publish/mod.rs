// src/publish/mod.rs
//! Scheduled publication: policy, message formatting and the timer loop.

pub mod format;
pub mod policy;
pub mod scheduler;

pub use format::{format_rate_message, format_unavailable};
pub use policy::PublishPolicy;
pub use scheduler::{
    PublishScheduler, PublishTarget, ScheduleHandle, ScheduleSnapshot, ScheduleState,
    SchedulerPhase, TickOutcome,
};
