//! MLMD
//!
//! MLMD runs molecular dynamics driven by a machine-learned interatomic potential (e.g. MACE) over a batch
//! of initial structures, binding every job to one device of a fixed pool. Every stride steps the frame may be
//! cross-checked against a QM reference (CP2K), and is appended to a crash-safe snapshot store,
//! from which an interrupted job resumes.

pub mod common;
pub mod io;
pub mod matrix;
pub mod md;
pub mod computing;
pub mod external;
