//! Domain model: events, concurrency keys, runs and jobs.

pub mod event;
pub mod job;
pub mod platform;
pub mod run;
