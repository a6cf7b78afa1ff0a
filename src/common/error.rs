//! About the warning and error information when an interrupt occurs at running time.
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;





/// All the errors that could interrupt the configuration, a job, or the batch.
///
/// Every variant except `Config` and `UnsupportedKind` is local to one job:
/// the dispatcher records it as that job's outcome and the batch goes on.
#[derive(Debug, Error)]
pub enum MdError
{
    /// A missing or invalid key in the configuration document
    #[error("There is some problem with the configuration key '{key}': {reason}")]
    Config
    {
        key: String,
        reason: String,
    },

    /// A potential or dynamics name outside the closed registry
    #[error("Unsupported {category} '{name}'. Supported values are: {supported}")]
    UnsupportedKind
    {
        category: &'static str,
        name: String,
        supported: String,
    },

    /// File reading, creating, opening, and writing
    #[error("There is some problem in {operation} the file '{}': {source}", path.display())]
    File
    {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Directory creating and listing
    #[error("There is some problem in {operation} the directory '{}': {source}", path.display())]
    Dir
    {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A structure or engine output file with an illegal format
    #[error("There is some problem with the input file '{}': {reason}", path.display())]
    Read
    {
        path: PathBuf,
        reason: String,
    },

    /// The snapshot store exists but cannot be parsed as a sequence of whole frames
    #[error("The snapshot store '{}' is corrupted: {reason}", path.display())]
    CorruptStore
    {
        path: PathBuf,
        reason: String,
    },

    /// The snapshot store is still malformed after truncation repair
    #[error("The snapshot store '{}' could not be repaired: {reason}", path.display())]
    UnrepairableStore
    {
        path: PathBuf,
        reason: String,
    },

    /// The snapshot store belongs to a structure with a different number of atoms
    #[error("The snapshot store '{}' holds {found} atoms per frame, but the structure has {expected}", path.display())]
    StoreMismatch
    {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// The snapshot store belongs to a structure with other atoms, or the same atoms in another order
    #[error("The snapshot store '{}' holds {found} as atom {atom}, but the structure has {expected}", path.display())]
    StoreSpeciesMismatch
    {
        path: PathBuf,
        atom: usize,
        expected: String,
        found: String,
    },

    /// Illegal chemical element symbol
    #[error("Illegal element type '{0}'")]
    Element(String),

    /// Failure of an energy/force evaluation (ML potential or QM engine)
    #[error("The {engine} calculation failed: {reason}")]
    Potential
    {
        engine: String,
        reason: String,
    },

    /// A job worker panicked; caught at the worker boundary
    #[error("The job panicked: {0}")]
    Panic(String),
}

pub type Result<T> = std::result::Result<T, MdError>;





/// Build the error for file reading, creating, opening, and writing, to be used with `map_err`
///
/// # Examples
/// ```text
/// let content = fs::read_to_string(path).map_err(error_file("reading", path))?;
/// ```
pub fn error_file(operation: &'static str, path: &Path) -> impl FnOnce(io::Error) -> MdError
{
    let path: PathBuf = path.to_path_buf();
    move |source| MdError::File { operation, path, source }
}

/// Build the error for directory creating and listing, to be used with `map_err`
pub fn error_dir(operation: &'static str, path: &Path) -> impl FnOnce(io::Error) -> MdError
{
    let path: PathBuf = path.to_path_buf();
    move |source| MdError::Dir { operation, path, source }
}

/// Error for the illegal format of a file
pub fn error_read(path: &Path, reason: impl Into<String>) -> MdError
{
    MdError::Read { path: path.to_path_buf(), reason: reason.into() }
}

/// Error for a missing or invalid configuration key
pub fn error_config(key: &str, reason: impl Into<String>) -> MdError
{
    MdError::Config { key: key.to_string(), reason: reason.into() }
}

/// Error for a failed energy/force evaluation
pub fn error_potential(engine: &str, reason: impl Into<String>) -> MdError
{
    MdError::Potential { engine: engine.to_string(), reason: reason.into() }
}
