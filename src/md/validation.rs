//! About cross-checking the ML energy and forces against a QM reference calculation.
use crate::common::error::*;
use crate::io::input::{QmFailurePolicy, QmPara};
use crate::io::trajectory::SnapshotStore;
use crate::md::system::Frame;
use crate::md::traits::{Hook, PES};
use log::{debug, warn};
use ndarray::Array2;





/// The differences between the ML and the QM results of one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Comparison
{
    /// |E_ml - E_qm| (Unit: eV)
    pub energy_diff: f64,
    /// The largest |F_ml - F_qm| over all components (Unit: eV/Angstrom)
    pub max_force_diff: f64,
    pub mismatch: bool,
}

/// Compare the two energy/force sets against the absolute tolerances.
/// A NaN difference is never within tolerance.
pub fn compare(energy_ml: f64, forces_ml: &Array2<f64>, energy_qm: f64, forces_qm: &Array2<f64>, energy_tol: f64, force_tol: f64) -> Comparison
{
    let energy_diff: f64 = (energy_ml - energy_qm).abs();
    let force_diffs: Vec<f64> = forces_ml.iter().zip(forces_qm.iter()).map(|(a, b)| (a - b).abs()).collect();
    // f64::max would drop the NaN
    let max_force_diff: f64 = force_diffs.iter().fold(0.0, |m: f64, d: &f64| if d.is_nan() || *d > m { *d } else { m });
    Comparison
    {
        energy_diff,
        max_force_diff,
        mismatch: !(energy_diff <= energy_tol) || force_diffs.iter().any(|d| !(*d <= force_tol)),
    }
}



/// The QM validation hook.
///
/// On a mismatch the frame takes the QM energy and forces, which the snapshot hook then persists,
/// and the frame is appended to the anomaly store.
///
/// # Fields
/// ```text
/// engine: the QM reference calculator
/// energy_tol: the tolerated absolute energy difference (Unit: eV)
/// force_tol: the tolerated absolute difference of any force component (Unit: eV/Angstrom)
/// on_failure: what to do when the QM calculation fails
/// anomaly: the store of the frames on which ML and QM disagree
/// ```
pub struct QmValidator
{
    engine: Box<dyn PES + Send>,
    energy_tol: f64,
    force_tol: f64,
    on_failure: QmFailurePolicy,
    anomaly: SnapshotStore,
}

impl QmValidator
{
    pub fn new(engine: Box<dyn PES + Send>, para: &QmPara, anomaly: SnapshotStore) -> Self
    {
        QmValidator
        {
            engine,
            energy_tol: para.energy_tol,
            force_tol: para.force_tol,
            on_failure: para.on_failure,
            anomaly,
        }
    }

    fn handle_failure(&self, step: usize, frame: &mut Frame, err: MdError) -> Result<()>
    {
        match self.on_failure
        {
            QmFailurePolicy::KeepMl =>
            {
                warn!("Step {}: the QM validation failed, keeping the ML values: {}", step, err);
                Ok(())
            },
            QmFailurePolicy::ZeroFill =>
            {
                warn!("Step {}: the QM validation failed, recording zero energy and forces: {}", step, err);
                frame.energy = 0.0;
                frame.forces.fill(0.0);
                Ok(())
            },
            QmFailurePolicy::Abort => Err(err),
        }
    }
}

impl Hook for QmValidator
{
    fn name(&self) -> &'static str
    {
        "qm_validation"
    }

    fn call(&mut self, step: usize, frame: &mut Frame) -> Result<()>
    {
        let (energy_qm, forces_qm): (f64, Array2<f64>) = match self.engine.get_energy_force(&frame.system)
        {
            Ok((_, forces)) if forces.dim() != frame.forces.dim() =>
            {
                let err: MdError = error_potential(self.engine.name(), format!("{} force rows returned for {} atoms", forces.nrows(), frame.system.natom));
                return self.handle_failure(step, frame, err);
            },
            Ok((energy, forces)) if !energy.is_finite() || forces.iter().any(|f| !f.is_finite()) =>
            {
                let err: MdError = error_potential(self.engine.name(), format!("non-finite energy ({}) or forces returned", energy));
                return self.handle_failure(step, frame, err);
            },
            Ok((energy, forces)) => (energy, forces),
            Err(err) => return self.handle_failure(step, frame, err),
        };

        let comparison: Comparison = compare(frame.energy, &frame.forces, energy_qm, &forces_qm, self.energy_tol, self.force_tol);
        if comparison.mismatch
        {
            warn!("Step {}: ML and QM disagree (|dE| = {:.6} eV, max |dF| = {:.6} eV/A)", step, comparison.energy_diff, comparison.max_force_diff);
            warn!("QM energy: {:.8}, ML energy: {:.8}", energy_qm, frame.energy);
            warn!("QM forces: {:?}", forces_qm);
            warn!("ML forces: {:?}", frame.forces);
            frame.energy = energy_qm;
            frame.forces = forces_qm;
            self.anomaly.append(&frame.to_record(step))?;
        }
        else
        {
            debug!("Step {}: ML agrees with QM (|dE| = {:.6} eV, max |dF| = {:.6} eV/A)", step, comparison.energy_diff, comparison.max_force_diff);
        }
        Ok(())
    }
}





#[cfg(test)]
mod tests
{
    use super::*;
    use crate::common::constants::Element;
    use crate::md::system::System;
    use ndarray::array;
    use tempfile::TempDir;

    /// A reference engine returning fixed values, or failing
    struct FixedPES
    {
        result: Option<(f64, Array2<f64>)>,
    }

    impl PES for FixedPES
    {
        fn name(&self) -> &str
        {
            "fixed"
        }

        fn get_energy_force(&mut self, _s: &System) -> Result<(f64, Array2<f64>)>
        {
            self.result.clone().ok_or_else(|| error_potential("fixed", "no result"))
        }
    }

    fn para(on_failure: QmFailurePolicy) -> QmPara
    {
        serde_yaml::from_str::<QmPara>(&format!("input_str: x\nenergy_tol: 0.1\nforce_tol: 0.5\non_failure: {}\n", match on_failure
        {
            QmFailurePolicy::KeepMl => "keep_ml",
            QmFailurePolicy::ZeroFill => "zero_fill",
            QmFailurePolicy::Abort => "abort",
        })).unwrap()
    }

    fn ml_frame() -> Frame
    {
        let s: System = System::new(vec![Element::H, Element::H], array![[5.0, 5.0, 5.0], [5.0, 5.0, 5.74]], Array2::eye(3) * 10.0, [true; 3]);
        let mut frame: Frame = Frame::new(s);
        frame.energy = -31.5;
        frame.forces = array![[0.0, 0.0, 0.3], [0.0, 0.0, -0.3]];
        frame
    }

    fn validator(dir: &TempDir, result: Option<(f64, Array2<f64>)>, policy: QmFailurePolicy) -> (QmValidator, SnapshotStore)
    {
        let anomaly: SnapshotStore = SnapshotStore::new(dir.path().join("cp2k_snaps.xyz"));
        (QmValidator::new(Box::new(FixedPES { result }), &para(policy), anomaly.clone()), anomaly)
    }

    #[test]
    fn agreement_leaves_the_frame_alone()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let (mut qm, anomaly) = validator(&dir, Some((-31.45, array![[0.0, 0.0, 0.6], [0.0, 0.0, -0.6]])), QmFailurePolicy::KeepMl);
        let mut frame: Frame = ml_frame();
        qm.call(10, &mut frame).unwrap();
        assert_eq!(frame.energy, -31.5);
        assert_eq!(frame.forces[[0, 2]], 0.3);
        assert_eq!(anomaly.frame_count().unwrap(), 0);
    }

    #[test]
    fn mismatch_overrides_and_records_the_frame()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let forces_qm: Array2<f64> = array![[0.0, 0.0, 1.2], [0.0, 0.0, -1.2]];
        let (mut qm, anomaly) = validator(&dir, Some((-31.52, forces_qm.clone())), QmFailurePolicy::KeepMl);
        let mut frame: Frame = ml_frame();
        qm.call(20, &mut frame).unwrap();
        assert_eq!(frame.energy, -31.52);
        assert_eq!(frame.forces, forces_qm);

        let recorded = anomaly.read_all().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].step, Some(20));
        assert_eq!(recorded[0].energy, Some(-31.52));
    }

    #[test]
    fn energy_alone_can_mismatch()
    {
        let forces: Array2<f64> = array![[0.0, 0.0, 0.3], [0.0, 0.0, -0.3]];
        let c: Comparison = compare(-31.5, &forces, -31.0, &forces, 0.1, 0.5);
        assert!(c.mismatch);
        assert_eq!(c.max_force_diff, 0.0);
    }

    #[test]
    fn nan_is_never_within_tolerance()
    {
        let forces_ml: Array2<f64> = array![[0.0, 0.0, 0.3]];
        let c: Comparison = compare(-1.0, &forces_ml, f64::NAN, &array![[f64::NAN, 0.0, 0.3]], 0.1, 0.5);
        assert!(c.mismatch);
        assert!(c.energy_diff.is_nan());
        assert!(c.max_force_diff.is_nan());

        let c: Comparison = compare(-1.0, &forces_ml, -1.0, &array![[0.0, f64::NAN, 0.3]], 0.1, 0.5);
        assert!(c.mismatch);
    }

    #[test]
    fn non_finite_qm_results_follow_the_failure_policy()
    {
        let dir: TempDir = TempDir::new().unwrap();

        let (mut qm, anomaly) = validator(&dir, Some((f64::NAN, array![[0.0, 0.0, 0.3], [0.0, 0.0, -0.3]])), QmFailurePolicy::KeepMl);
        let mut frame: Frame = ml_frame();
        qm.call(5, &mut frame).unwrap();
        assert_eq!(frame.energy, -31.5);
        assert_eq!(anomaly.frame_count().unwrap(), 0);

        let (mut qm, _) = validator(&dir, Some((-31.5, array![[0.0, 0.0, f64::INFINITY], [0.0, 0.0, -0.3]])), QmFailurePolicy::Abort);
        let mut frame: Frame = ml_frame();
        assert!(matches!(qm.call(5, &mut frame), Err(MdError::Potential { .. })));
    }

    #[test]
    fn failure_policies()
    {
        let dir: TempDir = TempDir::new().unwrap();

        let (mut qm, _) = validator(&dir, None, QmFailurePolicy::KeepMl);
        let mut frame: Frame = ml_frame();
        qm.call(1, &mut frame).unwrap();
        assert_eq!(frame.energy, -31.5);

        let (mut qm, _) = validator(&dir, None, QmFailurePolicy::ZeroFill);
        let mut frame: Frame = ml_frame();
        qm.call(1, &mut frame).unwrap();
        assert_eq!(frame.energy, 0.0);
        assert!(frame.forces.iter().all(|f| *f == 0.0));

        let (mut qm, anomaly) = validator(&dir, None, QmFailurePolicy::Abort);
        let mut frame: Frame = ml_frame();
        assert!(matches!(qm.call(1, &mut frame), Err(MdError::Potential { .. })));
        assert_eq!(anomaly.frame_count().unwrap(), 0);
    }

    #[test]
    fn wrong_force_shape_is_a_failure()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let (mut qm, _) = validator(&dir, Some((-31.5, Array2::zeros((3, 3)))), QmFailurePolicy::Abort);
        let mut frame: Frame = ml_frame();
        assert!(qm.call(1, &mut frame).is_err());
    }
}
