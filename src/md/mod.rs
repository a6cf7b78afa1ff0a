//! A module about running one molecular dynamics job.

pub mod traits;
pub mod system;
pub mod potential;
pub mod integrator;
pub mod hooks;
pub mod validation;
pub mod restart;
pub mod runner;
