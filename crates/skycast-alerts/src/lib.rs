//! Recurring weather alerts for Skycast
//!
//! Jobs poll the weather source on an interval, append the fresh
//! observation to the store and notify a sink when their condition holds.

pub mod condition;
pub mod error;
pub mod scheduler;
pub mod sink;

pub use condition::{Condition, Metric, Operator};
pub use error::AlertError;
pub use scheduler::{AlertScheduler, FiringOutcome, JobId, JobInfo};
pub use sink::{AlertEvent, AlertSink, ChannelSink, LogSink};
