//! About the description of one simulation task.
use crate::common::error::*;
use crate::computing::device::DevicePool;
use crate::io::input::Para;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;





/// One simulation task, immutable once built.
///
/// # Fields
/// ```text
/// index: the position of the job in the batch
/// job_name: the unique name of the job, which names its directory and snapshot store
/// structure: the initial structure file
/// para: the configuration shared by the whole batch
/// device_slot: the index of the device the job is bound to (index mod the pool size)
/// ```
#[derive(Clone, Debug)]
pub struct JobDescriptor
{
    index: usize,
    job_name: String,
    structure: PathBuf,
    para: Arc<Para>,
    device_slot: usize,
}

impl JobDescriptor
{
    pub fn index(&self) -> usize
    {
        self.index
    }

    pub fn job_name(&self) -> &str
    {
        &self.job_name
    }

    pub fn structure(&self) -> &Path
    {
        &self.structure
    }

    pub fn para(&self) -> &Para
    {
        &self.para
    }

    pub fn device_slot(&self) -> usize
    {
        self.device_slot
    }

    /// The directory holding every file of the job
    pub fn job_dir(&self) -> PathBuf
    {
        self.para.output_dir.join(&self.job_name)
    }
}



/// The job name of a structure file: its file name up to the first '.'
///
/// # Examples
/// ```text
/// assert_eq!(job_name_from_path(Path::new("structures/water.box.xyz")), Some("water".to_string()));
/// ```
pub fn job_name_from_path(path: &Path) -> Option<String>
{
    let file_name: &str = path.file_name()?.to_str()?;
    let name: &str = file_name.split('.').next()?;
    if name.is_empty()
    {
        None
    }
    else
    {
        Some(name.to_string())
    }
}

/// Build the jobs of a batch, binding job i to the device slot i mod P.
///
/// Two structures giving the same job name would share a directory, so they are rejected.
///
/// # Parameters
/// ```text
/// structures: the initial structure files, in batch order
/// para: the configuration
/// pool: the device pool
/// ```
pub fn build_batch(structures: &[PathBuf], para: Arc<Para>, pool: &DevicePool) -> Result<Vec<JobDescriptor>>
{
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut jobs: Vec<JobDescriptor> = Vec::with_capacity(structures.len());
    for (index, structure) in structures.iter().enumerate()
    {
        let job_name: String = job_name_from_path(structure)
            .ok_or_else(|| error_config("initial_structures", format!("cannot derive a job name from '{}'", structure.display())))?;
        if let Some(first) = seen.insert(job_name.clone(), structure.clone())
        {
            return Err(error_config("initial_structures", format!("'{}' and '{}' both give the job name '{}'", first.display(), structure.display(), job_name)));
        }
        jobs.push(JobDescriptor
        {
            index,
            job_name,
            structure: structure.clone(),
            para: Arc::clone(&para),
            device_slot: pool.slot_for(index),
        });
    }
    Ok(jobs)
}
