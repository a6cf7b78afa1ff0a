//! A module about the constants and the errors shared by the whole crate.

pub mod constants;
pub mod error;
