//! Background jobs.

pub mod sweeper;
