//! About the periodic hooks: every stride steps the runner fires, in this order,
//! the QM validation (when configured), the snapshot write, the MD log, and the time log.
use crate::common::constants::FEMTOSECOND_TO_PICOSECOND;
use crate::common::error::*;
use crate::io::trajectory::{PdbTrajectory, SnapshotRecord, SnapshotStore};
use crate::md::system::Frame;
use crate::md::traits::Hook;
use crate::md::validation::QmValidator;
use chrono::Local;
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;





/// The ordered list of hooks of one job
pub struct HookRunner
{
    stride: usize,
    hooks: Vec< Box<dyn Hook + Send> >,
}

impl HookRunner
{
    pub fn new(stride: usize) -> Result<Self>
    {
        if stride == 0
        {
            return Err(error_config("md.stride", "must be at least 1"));
        }
        Ok(HookRunner
        {
            stride,
            hooks: Vec::new(),
        })
    }

    /// The hooks of a job, in the fixed order: QM validation, snapshot write, MD log, time log
    pub fn standard(stride: usize, qm: Option<QmValidator>, snapshot: SnapshotHook, md_log: MdLogHook, time_log: TimeLogHook) -> Result<Self>
    {
        let mut runner: HookRunner = HookRunner::new(stride)?;
        if let Some(qm) = qm
        {
            runner.push(Box::new(qm));
        }
        runner.push(Box::new(snapshot));
        runner.push(Box::new(md_log));
        runner.push(Box::new(time_log));
        Ok(runner)
    }

    pub fn push(&mut self, hook: Box<dyn Hook + Send>)
    {
        self.hooks.push(hook);
    }

    pub fn stride(&self) -> usize
    {
        self.stride
    }

    pub fn names(&self) -> Vec<&'static str>
    {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    /// Whether the hooks fire after the given global step
    pub fn is_due(&self, step: usize) -> bool
    {
        step % self.stride == 0
    }

    /// Call every hook in order with the global step index. The first failing hook stops the others.
    pub fn fire(&mut self, step: usize, frame: &mut Frame) -> Result<()>
    {
        for hook in self.hooks.iter_mut()
        {
            debug!("Step {}: {}", step, hook.name());
            hook.call(step, frame)?;
        }
        Ok(())
    }
}





/// Append the frame to the snapshot store (and the PDB trajectory), after wrapping the atoms into the cell
pub struct SnapshotHook
{
    store: SnapshotStore,
    pdb: Option<PdbTrajectory>,
}

impl SnapshotHook
{
    pub fn new(store: SnapshotStore, pdb: Option<PdbTrajectory>) -> Self
    {
        SnapshotHook
        {
            store,
            pdb,
        }
    }
}

impl Hook for SnapshotHook
{
    fn name(&self) -> &'static str
    {
        "snapshot"
    }

    fn call(&mut self, step: usize, frame: &mut Frame) -> Result<()>
    {
        frame.system.wrap()?;
        let record: SnapshotRecord = frame.to_record(step);
        self.store.append(&record)?;
        if let Some(pdb) = &self.pdb
        {
            pdb.append(&record)?;
        }
        Ok(())
    }
}





/// Write the per-atom energies and the temperature, one line per firing
///
/// # Fields
/// ```text
/// path: the MD log file
/// timestep: the time step (Unit: fs)
/// ```
pub struct MdLogHook
{
    path: PathBuf,
    timestep: f64,
}

impl MdLogHook
{
    /// Open the MD log, writing the header when the file is new
    pub fn new(path: &Path, timestep: f64) -> Result<Self>
    {
        if !path.is_file()
        {
            let mut log_file: File = File::create(path).map_err(error_file("creating", path))?;
            log_file.write_all(format!("{:<10} {:>12} {:>12} {:>12}  {:>6}\n", "Time[ps]", "Etot/N[eV]", "Epot/N[eV]", "Ekin/N[eV]", "T[K]").as_bytes()).map_err(error_file("writing", path))?;
        }
        Ok(MdLogHook
        {
            path: path.to_path_buf(),
            timestep,
        })
    }
}

impl Hook for MdLogHook
{
    fn name(&self) -> &'static str
    {
        "md_log"
    }

    fn call(&mut self, step: usize, frame: &mut Frame) -> Result<()>
    {
        let natom: f64 = frame.system.natom.max(1) as f64;
        let epot: f64 = frame.energy;
        let ekin: f64 = frame.system.kinetic_energy();
        let time: f64 = step as f64 * self.timestep * FEMTOSECOND_TO_PICOSECOND;
        let line: String = format!("{:<10.4} {:>12.4} {:>12.4} {:>12.4}  {:>6.1}\n", time, (epot + ekin) / natom, epot / natom, ekin / natom, frame.system.temperature());

        let mut log_file: File = File::options().create(true).append(true).open(&self.path).map_err(error_file("opening", &self.path))?;
        log_file.write_all(line.as_bytes()).map_err(error_file("writing", &self.path))?;
        Ok(())
    }
}





/// Write the wall-clock time and the seconds elapsed since the job started, one line per firing
pub struct TimeLogHook
{
    path: PathBuf,
    start: Instant,
}

impl TimeLogHook
{
    pub fn new(path: &Path) -> Self
    {
        TimeLogHook
        {
            path: path.to_path_buf(),
            start: Instant::now(),
        }
    }
}

impl Hook for TimeLogHook
{
    fn name(&self) -> &'static str
    {
        "time_log"
    }

    fn call(&mut self, _step: usize, _frame: &mut Frame) -> Result<()>
    {
        let now: String = Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        let line: String = format!("{} {:.2}\n", now, self.start.elapsed().as_secs_f64());

        let mut log_file: File = File::options().create(true).append(true).open(&self.path).map_err(error_file("opening", &self.path))?;
        log_file.write_all(line.as_bytes()).map_err(error_file("writing", &self.path))?;
        Ok(())
    }
}
