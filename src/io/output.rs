//! About the output files of a job.
use crate::common::error::*;
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};





/// The files of one job, all inside `<output_dir>/<job_name>/`.
///
/// # Fields
/// ```text
/// dir: the job directory
/// store: the snapshot store (<job>.trj.xyz)
/// pdb: the PDB trajectory (<job>.trj.pdb)
/// anomaly: the frames on which ML and QM disagree (cp2k_snaps.xyz)
/// md_log: the per-atom energies and the temperature (md.log)
/// time_log: the wall-clock time of every stride (time.log)
/// cp2k_dir: the working directory of the CP2K calculations (cp2k_files)
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct JobFiles
{
    pub dir: PathBuf,
    pub store: PathBuf,
    pub pdb: PathBuf,
    pub anomaly: PathBuf,
    pub md_log: PathBuf,
    pub time_log: PathBuf,
    pub cp2k_dir: PathBuf,
}

impl JobFiles
{
    pub fn new(output_dir: &Path, job_name: &str) -> Self
    {
        let dir: PathBuf = output_dir.join(job_name);
        JobFiles
        {
            store: dir.join(format!("{}.trj.xyz", job_name)),
            pdb: dir.join(format!("{}.trj.pdb", job_name)),
            anomaly: dir.join("cp2k_snaps.xyz"),
            md_log: dir.join("md.log"),
            time_log: dir.join("time.log"),
            cp2k_dir: dir.join("cp2k_files"),
            dir,
        }
    }

    /// Create the job directory. If it already exists, do nothing.
    pub fn create_dir(&self) -> Result<()>
    {
        create_output_path(&self.dir)
    }

    /// Remove the logs, the PDB trajectory, and the anomaly store left by a previous run.
    /// The snapshot store itself is reset by its owner.
    pub fn clear_outputs(&self) -> Result<()>
    {
        for path in [&self.pdb, &self.anomaly, &self.md_log, &self.time_log]
        {
            match fs::remove_file(path)
            {
                Ok(()) => debug!("Removed '{}'", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => (),
                Err(err) => return Err(error_file("removing", path)(err)),
            }
        }
        Ok(())
    }
}



/// Create a directory (and its parents) for the output files. If it already exists, do nothing.
pub fn create_output_path(dir: &Path) -> Result<()>
{
    if dir.is_dir()
    {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(error_dir("creating", dir))
}
