//! A module about the interfaces to the external engines (ML potential driver and CP2K).

pub mod model_driver;
pub mod cp2k;
