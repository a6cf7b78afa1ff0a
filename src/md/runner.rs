//! About running one job: reconcile its snapshot store, seed the physical state,
//! build the calculator, the stepper, and the hooks, then step to the end.
use crate::common::error::*;
use crate::computing::device::Device;
use crate::computing::job::JobDescriptor;
use crate::external::cp2k::build_qm_engine;
use crate::io::input::Para;
use crate::io::output::JobFiles;
use crate::io::trajectory::{PdbTrajectory, SnapshotRecord, SnapshotStore};
use crate::md::hooks::{HookRunner, MdLogHook, SnapshotHook, TimeLogHook};
use crate::md::integrator::{DynamicsKind, Stepper};
use crate::md::potential::build_potential;
use crate::md::restart::{reconcile, Reconciliation, RunState};
use crate::md::system::{Frame, System};
use crate::md::traits::{Integrator, PES};
use crate::md::validation::QmValidator;
use log::{debug, info, warn};
use ndarray::Array2;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{Rng, SeedableRng};





/// How a job that did not fail ended
#[derive(Clone, Debug, PartialEq)]
pub enum JobCompletion
{
    /// The job ran its remaining steps; `frames` is the final number of frames in the store
    Ran
    {
        steps: usize,
        frames: usize,
    },
    AlreadyComplete
    {
        frames: usize,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOptions
{
    /// Resume from the snapshot store instead of starting over
    pub restart: bool,
}



/// Run one job on its device.
///
/// Without `restart` the previous outputs of the job are discarded first.
///
/// # Parameters
/// ```text
/// job: the job
/// device: the device the job is bound to
/// options: the run options from the command line
/// ```
///
/// # Examples
/// ```text
/// let completion: JobCompletion = run_job(&job, &Device::Cpu, RunOptions { restart: true })?;
/// ```
pub fn run_job(job: &JobDescriptor, device: &Device, options: RunOptions) -> Result<JobCompletion>
{
    let para: &Para = job.para();
    let files: JobFiles = JobFiles::new(&para.output_dir, job.job_name());
    files.create_dir()?;
    let store: SnapshotStore = SnapshotStore::new(&files.store);

    if !options.restart
    {
        discard_previous_run(&files, &store)?;
    }

    let state: RunState = match reconcile(&store, para.md.nsteps, para.md.stride)?
    {
        Reconciliation::AlreadyComplete { frames } =>
        {
            info!("Job '{}' is already complete with {} frames, skipping it", job.job_name(), frames);
            return Ok(JobCompletion::AlreadyComplete { frames });
        },
        Reconciliation::Run(state) => state,
    };

    let mut rng: StdRng = job_rng(para.md.seed, job.index());
    let system: System = seed_system(job, &store, &state, &mut rng)?;

    let mut pes: Box<dyn PES + Send> = build_potential(&para.mace, device, &files.dir)?;
    let kind: DynamicsKind = DynamicsKind::from_para(&para.md.dynamics)?;
    let mut stepper: Stepper = Stepper::new(kind, para.md.dynamics.timestep, StdRng::seed_from_u64(rng.gen()));
    let mut hooks: HookRunner = build_hooks(para, &files, &store, &system)?;

    let mut frame: Frame = Frame::new(system);
    let (energy, forces): (f64, Array2<f64>) = pes.get_energy_force(&frame.system)?;
    frame.energy = energy;
    frame.forces = forces;

    let first_step: usize = state.first_step(para.md.stride);
    info!("Job '{}' runs steps {} to {} with {} on {} (hooks: {})", job.job_name(), first_step, para.md.nsteps, pes.name(), device, hooks.names().join(", "));
    for step in first_step..=para.md.nsteps
    {
        stepper.step(&mut frame, pes.as_mut())?;
        if hooks.is_due(step)
        {
            // The stepper goes on with the ML forces whatever the hooks record
            let energy_ml: f64 = frame.energy;
            let forces_ml: Array2<f64> = frame.forces.clone();
            hooks.fire(step, &mut frame)?;
            frame.energy = energy_ml;
            frame.forces = forces_ml;
        }
    }

    let frames: usize = store.frame_count()?;
    info!("Job '{}' finished {} steps, the store holds {} frames", job.job_name(), state.remaining_steps, frames);
    Ok(JobCompletion::Ran { steps: state.remaining_steps, frames })
}



/// Start over: drop the snapshot store and the other outputs of a previous run
fn discard_previous_run(files: &JobFiles, store: &SnapshotStore) -> Result<()>
{
    if store.exists()
    {
        match store.frame_count()
        {
            Ok(0) => (),
            Ok(frames) => warn!("Starting '{}' over without --restart discards {} stored frames", store.path().display(), frames),
            Err(err) => warn!("Starting '{}' over without --restart discards an unreadable store: {}", store.path().display(), err),
        }
    }
    store.reset()?;
    files.clear_outputs()
}

/// The random number generator of a job: reproducible when a seed is configured, different for every job
fn job_rng(seed: Option<u64>, job_index: usize) -> StdRng
{
    match seed
    {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(job_index as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Read the initial structure, then take the state of the last stored frame when resuming.
/// Maxwell-Boltzmann velocities are drawn on a fresh start, or when the stored frame has none.
fn seed_system(job: &JobDescriptor, store: &SnapshotStore, state: &RunState, rng: &mut StdRng) -> Result<System>
{
    let para: &Para = job.para();
    let mut system: System = System::read_xyz(job.structure(), &para.system)?;

    let has_velocities: bool = match &state.seed
    {
        Some(record) =>
        {
            check_seed(store, &system, record)?;
            debug!("Job '{}' resumes from the frame of step {:?}", job.job_name(), record.step);
            system.apply_record(record)
        },
        None => false,
    };

    if !has_velocities
    {
        let temperature: f64 = para.md.initial_temperature();
        debug!("Drawing Maxwell-Boltzmann velocities at {} K for '{}'", temperature, job.job_name());
        system.maxwell_boltzmann(temperature, rng);
    }
    Ok(system)
}

fn check_seed(store: &SnapshotStore, system: &System, record: &SnapshotRecord) -> Result<()>
{
    if record.natom() != system.natom
    {
        return Err(MdError::StoreMismatch
        {
            path: store.path().to_path_buf(),
            expected: system.natom,
            found: record.natom(),
        });
    }
    if let Some(atom) = (0..system.natom).find(|&i| record.species[i] != system.species[i])
    {
        return Err(MdError::StoreSpeciesMismatch
        {
            path: store.path().to_path_buf(),
            atom,
            expected: system.species[atom].symbol(),
            found: record.species[atom].symbol(),
        });
    }
    Ok(())
}

/// The hooks of a job in their fixed order; the QM validation exists only when CP2K is configured
fn build_hooks(para: &Para, files: &JobFiles, store: &SnapshotStore, system: &System) -> Result<HookRunner>
{
    let qm: Option<QmValidator> = match &para.cp2k
    {
        Some(qm_para) =>
        {
            let engine: Box<dyn PES + Send> = build_qm_engine(qm_para, &files.cp2k_dir, system)?;
            Some(QmValidator::new(engine, qm_para, SnapshotStore::new(&files.anomaly)))
        },
        None => None,
    };
    let pdb: Option<PdbTrajectory> = if para.md.write_pdb { Some(PdbTrajectory::new(&files.pdb)) } else { None };
    let snapshot: SnapshotHook = SnapshotHook::new(store.clone(), pdb);
    let md_log: MdLogHook = MdLogHook::new(&files.md_log, para.md.dynamics.timestep)?;
    let time_log: TimeLogHook = TimeLogHook::new(&files.time_log);
    HookRunner::standard(para.md.stride, qm, snapshot, md_log, time_log)
}
