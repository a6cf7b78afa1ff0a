//! A module about the configuration, the output layout, and the snapshot trajectories.

pub mod input;
pub mod output;
pub mod trajectory;
