//! About resuming a job from its snapshot store.
use crate::common::error::*;
use crate::io::trajectory::{RepairReport, SnapshotRecord, SnapshotStore};
use log::{info, warn};





/// Where a job resumes.
///
/// # Fields
/// ```text
/// resume_frame_count: the number of complete frames already persisted
/// remaining_steps: the number of MD steps still to run
/// seed: the last persisted frame, to take the positions, velocities, and cell from (none for a fresh start)
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RunState
{
    pub resume_frame_count: usize,
    pub remaining_steps: usize,
    pub seed: Option<SnapshotRecord>,
}

impl RunState
{
    pub fn fresh(total_steps: usize) -> Self
    {
        RunState
        {
            resume_frame_count: 0,
            remaining_steps: total_steps,
            seed: None,
        }
    }

    /// The global index of the first step to run
    pub fn first_step(&self, stride: usize) -> usize
    {
        self.resume_frame_count * stride + 1
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reconciliation
{
    Run(RunState),
    /// The store already holds every frame; the job must not run
    AlreadyComplete
    {
        frames: usize,
    },
}



/// Inspect the store of a job and decide how many steps remain and which frame to start from.
///
/// A corrupt store is truncated to its complete frames first; the discarded tail is lost for good.
/// Calling this twice without writing in between gives the same answer.
///
/// # Parameters
/// ```text
/// store: the snapshot store of the job
/// total_steps: the configured number of MD steps
/// stride: the number of steps between two snapshots
/// ```
///
/// # Examples
/// ```text
/// match reconcile(&store, para.md.nsteps, para.md.stride)?
/// {
///     Reconciliation::AlreadyComplete { frames } => ...,
///     Reconciliation::Run(state) => ...,
/// }
/// ```
pub fn reconcile(store: &SnapshotStore, total_steps: usize, stride: usize) -> Result<Reconciliation>
{
    if stride == 0
    {
        return Err(error_config("md.stride", "must be at least 1"));
    }
    if !store.exists()
    {
        return Ok(Reconciliation::Run(RunState::fresh(total_steps)));
    }

    let mut frames: Vec<SnapshotRecord> = match store.read_all()
    {
        Ok(frames) => frames,
        Err(MdError::CorruptStore { reason, .. }) =>
        {
            warn!("The snapshot store '{}' is corrupted ({}), truncating it to its complete frames", store.path().display(), reason);
            let report: RepairReport = store.repair()?;
            warn!("Kept {} frames of '{}' and discarded {} lines", report.kept_frames, store.path().display(), report.discarded_lines);
            store.read_all().map_err(|err| match err
            {
                MdError::CorruptStore { path, reason } => MdError::UnrepairableStore { path, reason },
                other => other,
            })?
        },
        Err(err) => return Err(err),
    };

    let count: usize = frames.len();
    let max_frames: usize = total_steps / stride;
    if count >= max_frames
    {
        info!("'{}' already holds {} of {} frames", store.path().display(), count, max_frames);
        return Ok(Reconciliation::AlreadyComplete { frames: count });
    }

    let state: RunState = RunState
    {
        resume_frame_count: count,
        remaining_steps: total_steps - count * stride,
        seed: frames.pop(),
    };
    info!("Resuming '{}' after {} frames, {} steps remain", store.path().display(), count, state.remaining_steps);
    Ok(Reconciliation::Run(state))
}





#[cfg(test)]
mod tests
{
    use super::*;
    use crate::common::constants::Element;
    use ndarray::{array, Array2};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn record(step: usize) -> SnapshotRecord
    {
        SnapshotRecord
        {
            step: Some(step),
            species: vec![Element::Ar, Element::Ar],
            positions: array![[1.0, 1.0, 1.0], [4.8 + step as f64 * 1e-3, 1.0, 1.0]],
            velocities: Some(Array2::zeros((2, 3))),
            cell: Array2::eye(3) * 10.0,
            pbc: [true; 3],
            energy: Some(-0.01),
            forces: Some(Array2::zeros((2, 3))),
        }
    }

    fn store_with(dir: &TempDir, frames: usize, stride: usize) -> SnapshotStore
    {
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("ar2.trj.xyz"));
        for i in 1..=frames
        {
            store.append(&record(i * stride)).unwrap();
        }
        store
    }

    #[test]
    fn missing_store_is_a_fresh_run()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("none.trj.xyz"));
        assert_eq!(reconcile(&store, 100, 10).unwrap(), Reconciliation::Run(RunState::fresh(100)));
    }

    #[test]
    fn empty_store_is_a_fresh_run()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("empty.trj.xyz"));
        File::create(store.path()).unwrap();
        assert_eq!(reconcile(&store, 100, 10).unwrap(), Reconciliation::Run(RunState::fresh(100)));
    }

    #[test]
    fn completion_is_detected()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with(&dir, 10, 10);
        assert_eq!(reconcile(&store, 100, 10).unwrap(), Reconciliation::AlreadyComplete { frames: 10 });
    }

    #[test]
    fn nine_of_ten_frames_leave_ten_steps()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with(&dir, 9, 10);
        match reconcile(&store, 100, 10).unwrap()
        {
            Reconciliation::Run(state) =>
            {
                assert_eq!(state.resume_frame_count, 9);
                assert_eq!(state.remaining_steps, 10);
                assert_eq!(state.first_step(10), 91);
                assert_eq!(state.seed.unwrap().step, Some(90));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn truncated_tail_is_repaired_once()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with(&dir, 5, 10);
        let mut file: File = File::options().append(true).open(store.path()).unwrap();
        file.write_all(b"2\nLattice=\"10 0 0 0 10 0 0 0 10\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"\nAr 1.0 1.0").unwrap();
        drop(file);

        let first: Reconciliation = reconcile(&store, 100, 10).unwrap();
        let bytes_after_repair: Vec<u8> = fs::read(store.path()).unwrap();
        let second: Reconciliation = reconcile(&store, 100, 10).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(store.path()).unwrap(), bytes_after_repair);

        match first
        {
            Reconciliation::Run(state) =>
            {
                assert_eq!(state.resume_frame_count, 5);
                assert_eq!(state.remaining_steps, 50);
                assert_eq!(state.seed.unwrap().step, Some(50));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unrepairable_store_is_an_error()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("bad.trj.xyz"));
        fs::write(store.path(), "two\ncomment\nAr 0 0 0\nAr 1 0 0\n").unwrap();
        assert!(matches!(reconcile(&store, 100, 10), Err(MdError::UnrepairableStore { .. })));
    }
}
