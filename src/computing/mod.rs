//! A module about distributing the jobs over the compute devices.

pub mod device;
pub mod job;
pub mod dispatcher;
