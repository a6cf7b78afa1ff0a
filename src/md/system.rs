//! About the structure and status of the simulated system.
use crate::common::constants::{Element, ACCELERATION_UNIT, BOLTZMANN_EV};
use crate::common::error::*;
use crate::io::input::SystemPara;
use crate::io::trajectory::{parse_frames, SnapshotRecord};
use crate::matrix;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use std::fs;
use std::path::Path;





/// The basic structure describing the simulated system (e.g. a molecule in a box, or a crystal).
///
/// # Fields
/// ```text
/// natom: the number of atoms
/// species: the elements of the atoms (natom Vec)
/// coord: the atomic coordinates (natom*3 Array, Unit: Angstrom)
/// vel: the atomic velocities (natom*3 Array, Unit: Angstrom/fs)
/// cell: the lattice vectors in rows (3*3 Array, Unit: Angstrom)
/// pbc: whether each lattice direction is periodic
/// mass: the atomic masses (natom Array, Unit: amu)
/// ```
#[derive(Clone, Debug)]
pub struct System
{
    pub natom: usize,
    pub species: Vec<Element>,
    pub coord: Array2<f64>,
    pub vel: Array2<f64>,
    pub cell: Array2<f64>,
    pub pbc: [bool; 3],
    pub mass: Array1<f64>,
}





impl System
{
    /// Build a system at rest from the species and positions
    pub fn new(species: Vec<Element>, coord: Array2<f64>, cell: Array2<f64>, pbc: [bool; 3]) -> Self
    {
        let natom: usize = species.len();
        let mass: Array1<f64> = species.iter().map(|e| e.get_atomic_mass()).collect();
        System
        {
            natom,
            species,
            vel: Array2::zeros(coord.raw_dim()),
            coord,
            cell,
            pbc,
            mass,
        }
    }

    /// Read the first frame of a XYZ (or extended XYZ) file, then apply the configured cell and periodicity
    /// and center the atoms in the cell
    ///
    /// # Parameters
    /// ```text
    /// path: the structure file
    /// system_para: the cell and periodic flags from the configuration
    /// ```
    ///
    /// # Examples
    /// ```text
    /// let s: System = System::read_xyz(Path::new("structures/water.xyz"), &para.system)?;
    /// ```
    pub fn read_xyz(path: &Path, system_para: &SystemPara) -> Result<Self>
    {
        let content: String = fs::read_to_string(path).map_err(error_file("reading", path))?;
        let mut frames: Vec<SnapshotRecord> = parse_frames(&content).map_err(|reason| error_read(path, reason))?;
        if frames.is_empty()
        {
            return Err(error_read(path, "the file holds no structure"));
        }
        let record: SnapshotRecord = frames.swap_remove(0);
        let has_lattice: bool = content.lines().nth(1).map_or(false, |comment| comment.contains("Lattice="));

        let cell: Array2<f64> = system_para.resolve_cell(if has_lattice { Some(&record.cell) } else { None });
        let mut s: System = System::new(record.species, record.positions, cell, system_para.pbc.to_array());
        s.center()?;
        Ok(s)
    }

    /// Translate the atoms so that the center of their bounding box (in fractional coordinates) is the center of the cell
    pub fn center(&mut self) -> Result<()>
    {
        if self.natom == 0
        {
            return Ok(());
        }
        let cell_inv: Array2<f64> = matrix::cell_inverse(&self.cell.view())?;
        let mut frac: Array2<f64> = matrix::to_fractional(&self.coord.view(), &cell_inv.view());
        for k in 0..3
        {
            let column = frac.column(k);
            let min: f64 = column.iter().cloned().fold(f64::INFINITY, f64::min);
            let max: f64 = column.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let shift: f64 = 0.5 - 0.5 * (min + max);
            frac.column_mut(k).mapv_inplace(|x| x + shift);
        }
        self.coord = matrix::to_cartesian(&frac.view(), &self.cell.view());
        Ok(())
    }

    /// Wrap the atoms into the cell along the periodic directions
    pub fn wrap(&mut self) -> Result<()>
    {
        matrix::wrap_positions(&mut self.coord, &self.cell.view(), self.pbc)
    }

    /// Draw the velocities from the Maxwell-Boltzmann distribution at the given temperature (Unit: K)
    pub fn maxwell_boltzmann<R: Rng>(&mut self, temperature: f64, rng: &mut R)
    {
        let kt: f64 = BOLTZMANN_EV * temperature;               // eV
        let normal: Array2<f64> = Array2::random_using((self.natom, 3), StandardNormal, rng);
        for i in 0..self.natom
        {
            // sqrt(kT/m) in Angstrom/fs
            let sigma: f64 = (kt / self.mass[i] * ACCELERATION_UNIT).sqrt();
            for k in 0..3
            {
                self.vel[[i, k]] = sigma * normal[[i, k]];
            }
        }
    }

    /// Kinetic energy (Unit: eV)
    pub fn kinetic_energy(&self) -> f64
    {
        let v2: Array1<f64> = (&self.vel * &self.vel).sum_axis(Axis(1));
        0.5 * (&self.mass * &v2).sum() / ACCELERATION_UNIT
    }

    /// Instantaneous temperature from the kinetic energy with 3N degrees of freedom (Unit: K)
    pub fn temperature(&self) -> f64
    {
        if self.natom == 0
        {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (3.0 * self.natom as f64 * BOLTZMANN_EV)
    }

    /// Take the positions, cell, periodicity, and (when present) velocities of a persisted frame.
    /// Returns whether the frame carried velocities.
    ///
    /// The caller checks that the frame holds the same number of atoms.
    pub fn apply_record(&mut self, record: &SnapshotRecord) -> bool
    {
        self.coord = record.positions.clone();
        self.cell = record.cell.clone();
        self.pbc = record.pbc;
        match &record.velocities
        {
            Some(vel) =>
            {
                self.vel = vel.clone();
                true
            },
            None => false,
        }
    }
}





/// The mutable state shared by the stepper and the periodic hooks: the system and its latest energy and forces
///
/// # Fields
/// ```text
/// system: the current structure and velocities
/// energy: the potential energy (Unit: eV)
/// forces: the atomic forces (natom*3 Array, Unit: eV/Angstrom)
/// ```
#[derive(Clone, Debug)]
pub struct Frame
{
    pub system: System,
    pub energy: f64,
    pub forces: Array2<f64>,
}

impl Frame
{
    pub fn new(system: System) -> Self
    {
        let forces: Array2<f64> = Array2::zeros(system.coord.raw_dim());
        Frame
        {
            system,
            energy: 0.0,
            forces,
        }
    }

    pub fn to_record(&self, step: usize) -> SnapshotRecord
    {
        SnapshotRecord
        {
            step: Some(step),
            species: self.system.species.clone(),
            positions: self.system.coord.clone(),
            velocities: Some(self.system.vel.clone()),
            cell: self.system.cell.clone(),
            pbc: self.system.pbc,
            energy: Some(self.energy),
            forces: Some(self.forces.clone()),
        }
    }
}





#[cfg(test)]
mod tests
{
    use super::*;
    use crate::io::input::{CellPara, PbcPara};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;
    use tempfile::TempDir;

    fn water_file(dir: &TempDir, comment: &str) -> std::path::PathBuf
    {
        let path = dir.path().join("water.xyz");
        fs::write(&path, format!("3\n{}\nO 0.0 0.0 0.0\nH 0.758602 0.585882 0.0\nH -0.758602 0.585882 0.0\n", comment)).unwrap();
        path
    }

    #[test]
    fn structure_is_centered_in_the_fallback_cell()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let s: System = System::read_xyz(&water_file(&dir, "water"), &SystemPara::default()).unwrap();
        assert_eq!(s.natom, 3);
        assert_eq!(s.species, vec![Element::O, Element::H, Element::H]);
        assert_eq!(s.pbc, [true; 3]);
        assert_abs_diff_eq!(s.coord[[0, 0]], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.coord[[1, 0]] + s.coord[[2, 0]], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.coord[[0, 1]] + s.coord[[1, 1]], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.coord[[0, 2]], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.mass[0], 15.9994);
    }

    #[test]
    fn configured_cell_overrides_the_file()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let path = water_file(&dir, "Lattice=\"20 0 0 0 20 0 0 0 20\" pbc=\"T T T\"");
        let s: System = System::read_xyz(&path, &SystemPara::default()).unwrap();
        assert_eq!(s.cell[[0, 0]], 20.0);

        let para: SystemPara = SystemPara { pbc: PbcPara::All(false), cellvectors: Some(CellPara::Lengths([12.0, 12.0, 12.0])) };
        let s: System = System::read_xyz(&path, &para).unwrap();
        assert_eq!(s.cell[[0, 0]], 12.0);
        assert_eq!(s.pbc, [false; 3]);
        assert_abs_diff_eq!(s.coord[[0, 0]], 6.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_or_broken_structure_is_a_read_error()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let path = dir.path().join("broken.xyz");
        fs::write(&path, "2\n\nH 0 0 0\n").unwrap();
        assert!(matches!(System::read_xyz(&path, &SystemPara::default()), Err(MdError::Read { .. })));
        fs::write(&path, "").unwrap();
        assert!(matches!(System::read_xyz(&path, &SystemPara::default()), Err(MdError::Read { .. })));
    }

    #[test]
    fn maxwell_boltzmann_reaches_the_temperature()
    {
        let species: Vec<Element> = vec![Element::Ar; 3000];
        let coord: Array2<f64> = Array2::zeros((3000, 3));
        let mut s: System = System::new(species, coord, Array2::eye(3) * 50.0, [true; 3]);
        let mut rng: StdRng = StdRng::seed_from_u64(7);
        s.maxwell_boltzmann(300.0, &mut rng);
        assert_abs_diff_eq!(s.temperature(), 300.0, epsilon = 15.0);
    }

    #[test]
    fn kinetic_energy_units()
    {
        // One hydrogen atom moving at 0.1 Angstrom/fs
        let mut s: System = System::new(vec![Element::H], array![[0.0, 0.0, 0.0]], Array2::eye(3) * 10.0, [false; 3]);
        s.vel[[0, 0]] = 0.1;
        assert_abs_diff_eq!(s.kinetic_energy(), 0.5 * 1.00794 * 0.01 / ACCELERATION_UNIT, epsilon = 1e-12);
        assert_abs_diff_eq!(s.kinetic_energy(), 0.5223, epsilon = 1e-3);
    }

    #[test]
    fn wrap_brings_atoms_back_into_the_cell()
    {
        let mut s: System = System::new(vec![Element::H], array![[-1.0, 11.0, 4.0]], Array2::eye(3) * 10.0, [true; 3]);
        s.wrap().unwrap();
        assert_abs_diff_eq!(s.coord[[0, 0]], 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.coord[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn frame_record_carries_the_state()
    {
        let s: System = System::new(vec![Element::H, Element::H], array![[0.0, 0.0, 0.0], [0.0, 0.0, 0.74]], Array2::eye(3) * 10.0, [true; 3]);
        let mut frame: Frame = Frame::new(s);
        frame.energy = -1.5;
        let record: SnapshotRecord = frame.to_record(20);
        assert_eq!(record.step, Some(20));
        assert_eq!(record.energy, Some(-1.5));
        assert_eq!(record.natom(), 2);

        let mut other: System = frame.system.clone();
        other.coord.fill(3.0);
        assert!(other.apply_record(&record));
        assert_eq!(other.coord, frame.system.coord);
    }
}
