//! About the input files: the YAML configuration document and the discovery of the initial structures.
use crate::common::constants::{DEFAULT_TEMPERATURE_K, FALLBACK_CELL};
use crate::common::error::*;
use crate::computing::device::DevicePool;
use crate::md::integrator::DynamicsKind;
use crate::md::potential::PotentialKind;
use log::debug;
use ndarray::{arr1, arr2, Array2};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};





/// A YAML value that may be given either as a scalar or as a list
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T>
{
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T>
{
    pub fn to_vec(&self) -> Vec<T>
    {
        match self
        {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}



/// The periodic flags, either one flag for all the directions or one per direction
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PbcPara
{
    All(bool),
    Each([bool; 3]),
}

impl PbcPara
{
    pub fn to_array(&self) -> [bool; 3]
    {
        match self
        {
            PbcPara::All(flag) => [*flag; 3],
            PbcPara::Each(flags) => *flags,
        }
    }
}

/// The simulation cell, either three edge lengths of an orthorhombic cell or three lattice vectors (Unit: Angstrom)
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CellPara
{
    Lengths([f64; 3]),
    Vectors([[f64; 3]; 3]),
}

impl CellPara
{
    pub fn to_matrix(&self) -> Array2<f64>
    {
        match self
        {
            CellPara::Lengths(lengths) => Array2::from_diag(&arr1(lengths)),
            CellPara::Vectors(vectors) => arr2(vectors),
        }
    }
}



/// The structure containing the settings applied to every initial structure.
///
/// # Fields
/// ```text
/// pbc: the periodic flags (default: true)
/// cellvectors: the simulation cell; when absent, the cell of the structure file, or the 10 Angstrom cube
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct SystemPara
{
    #[serde(default = "default_pbc")]
    pub pbc: PbcPara,
    #[serde(default)]
    pub cellvectors: Option<CellPara>,
}

impl Default for SystemPara
{
    fn default() -> Self
    {
        SystemPara
        {
            pbc: default_pbc(),
            cellvectors: None,
        }
    }
}

impl SystemPara
{
    /// The configured cell, if any, otherwise the cell read from the structure, otherwise the fallback cube
    pub fn resolve_cell(&self, from_structure: Option<&Array2<f64>>) -> Array2<f64>
    {
        match (&self.cellvectors, from_structure)
        {
            (Some(cell), _) => cell.to_matrix(),
            (None, Some(cell)) => cell.clone(),
            (None, None) => FALLBACK_CELL.clone(),
        }
    }
}



/// Numeric precision requested from the ML potential
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dtype
{
    Float32,
    Float64,
}

impl Dtype
{
    pub fn as_str(&self) -> &'static str
    {
        match self
        {
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }
}

/// Parameters of the analytic Lennard-Jones potential (Unit: eV and Angstrom)
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct LjPara
{
    #[serde(default = "default_lj_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_lj_sigma")]
    pub sigma: f64,
    #[serde(default = "default_lj_cutoff")]
    pub cutoff: f64,
}

impl Default for LjPara
{
    fn default() -> Self
    {
        LjPara
        {
            epsilon: default_lj_epsilon(),
            sigma: default_lj_sigma(),
            cutoff: default_lj_cutoff(),
        }
    }
}

/// The structure containing the parameters of the ML potential.
///
/// # Fields
/// ```text
/// devices: the device pool, a single name or a list (e.g. cpu, cuda:0, mps)
/// model: the potential kind (mace_off, mace_anicc, mace_mp, mace, lennard_jones)
/// model_path: the foundation model size (e.g. small) or the path of a custom model
/// driver: the executable serving the ML potential
/// driver_args: the arguments placed before the model options on the driver command line
/// default_dtype: float32 or float64
/// lennard_jones: the parameters of the analytic potential
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct MlpPara
{
    #[serde(default = "default_devices")]
    pub devices: OneOrMany<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub driver_args: Vec<String>,
    #[serde(default = "default_dtype")]
    pub default_dtype: Dtype,
    #[serde(default)]
    pub lennard_jones: LjPara,
}

impl Default for MlpPara
{
    fn default() -> Self
    {
        MlpPara
        {
            devices: default_devices(),
            model: default_model(),
            model_path: default_model_path(),
            driver: default_driver(),
            driver_args: Vec::new(),
            default_dtype: default_dtype(),
            lennard_jones: LjPara::default(),
        }
    }
}



/// The stepper settings: its class, time step (Unit: fs), and class-specific parameters
#[derive(Clone, Debug, Deserialize)]
pub struct DynamicsPara
{
    #[serde(default = "default_dynamics_class")]
    pub class: String,
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl Default for DynamicsPara
{
    fn default() -> Self
    {
        DynamicsPara
        {
            class: default_dynamics_class(),
            timestep: default_timestep(),
            parameters: BTreeMap::new(),
        }
    }
}

/// The structure containing the parameters of the MD run.
///
/// # Fields
/// ```text
/// dynamics: the stepper settings
/// nsteps: the total number of MD steps of a job
/// stride: the number of steps between two firings of the periodic hooks
/// temperature_k: the temperature of the initial Maxwell-Boltzmann velocities (null: 300 K, 0: start at rest)
/// seed: the seed of the random number generator (null: drawn from the OS)
/// write_pdb: whether to write the PDB trajectory beside the snapshot store
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct MdPara
{
    #[serde(default)]
    pub dynamics: DynamicsPara,
    #[serde(default = "default_nsteps")]
    pub nsteps: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(rename = "temperature_K", default = "default_temperature")]
    pub temperature_k: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub write_pdb: bool,
}

impl Default for MdPara
{
    fn default() -> Self
    {
        MdPara
        {
            dynamics: DynamicsPara::default(),
            nsteps: default_nsteps(),
            stride: default_stride(),
            temperature_k: default_temperature(),
            seed: None,
            write_pdb: true,
        }
    }
}

impl MdPara
{
    /// The temperature of the initial velocities (Unit: K)
    pub fn initial_temperature(&self) -> f64
    {
        self.temperature_k.unwrap_or(DEFAULT_TEMPERATURE_K)
    }
}



/// How the CP2K engine is reached
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QmBackend
{
    Command,
    Library,
}

/// What the QM validation does when the reference calculation fails
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QmFailurePolicy
{
    /// Log the failure and keep the ML energy and forces
    KeepMl,
    /// Replace the energy and forces by zeros
    ZeroFill,
    /// Fail the job
    Abort,
}

/// The structure containing the parameters of the CP2K validation.
///
/// # Fields
/// ```text
/// backend: command (a CP2K subprocess per evaluation) or library (in-process libcp2k)
/// exe: the CP2K executable
/// nprocs: the number of MPI processes of the subprocess
/// mpi_launcher: the MPI launcher placed before the executable (null: run the executable directly)
/// input_str / input_file: the CP2K input, given inline or as a file
/// project_name: the CP2K project name, which prefixes the position and force trajectories
/// coord_file_name: the coordinate file referred to by the CP2K input
/// energy_tol: the tolerated absolute energy difference (Unit: eV)
/// force_tol: the tolerated absolute difference of any force component (Unit: eV/Angstrom)
/// on_failure: keep_ml, zero_fill, or abort
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct QmPara
{
    #[serde(default = "default_backend")]
    pub backend: QmBackend,
    #[serde(default = "default_exe")]
    pub exe: String,
    #[serde(default = "default_nprocs")]
    pub nprocs: usize,
    #[serde(default = "default_mpi_launcher")]
    pub mpi_launcher: Option<String>,
    #[serde(default)]
    pub input_str: Option<String>,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_coord_file_name")]
    pub coord_file_name: String,
    #[serde(default = "default_energy_tol")]
    pub energy_tol: f64,
    #[serde(default = "default_force_tol")]
    pub force_tol: f64,
    #[serde(default = "default_on_failure")]
    pub on_failure: QmFailurePolicy,
}

impl QmPara
{
    /// The CP2K input text, read from input_file when input_str is absent
    pub fn input_text(&self) -> Result<String>
    {
        match (&self.input_str, &self.input_file)
        {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(file)) => fs::read_to_string(file).map_err(error_file("reading", file)),
            (None, None) => Err(error_config("cp2k.input_str", "either input_str or input_file is required")),
        }
    }
}



/// The whole configuration document.
#[derive(Clone, Debug, Deserialize)]
pub struct Para
{
    pub initial_structures: OneOrMany<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub system: SystemPara,
    #[serde(default)]
    pub mace: MlpPara,
    #[serde(default)]
    pub md: MdPara,
    #[serde(default)]
    pub cp2k: Option<QmPara>,
}



fn default_pbc() -> PbcPara { PbcPara::All(true) }
fn default_lj_epsilon() -> f64 { 0.0104 }
fn default_lj_sigma() -> f64 { 3.4 }
fn default_lj_cutoff() -> f64 { 8.5 }
fn default_devices() -> OneOrMany<String> { OneOrMany::Many(vec![String::from("cpu")]) }
fn default_model() -> String { String::from("mace_off") }
fn default_model_path() -> String { String::from("small") }
fn default_driver() -> String { String::from("mace-driver") }
fn default_dtype() -> Dtype { Dtype::Float64 }
fn default_dynamics_class() -> String { String::from("Langevin") }
fn default_timestep() -> f64 { 1.0 }
fn default_nsteps() -> usize { 100 }
fn default_stride() -> usize { 1 }
fn default_temperature() -> Option<f64> { Some(DEFAULT_TEMPERATURE_K) }
fn default_true() -> bool { true }
fn default_backend() -> QmBackend { QmBackend::Command }
fn default_exe() -> String { String::from("cp2k.psmp") }
fn default_nprocs() -> usize { 1 }
fn default_mpi_launcher() -> Option<String> { Some(String::from("mpirun")) }
fn default_project_name() -> String { String::from("cp2k") }
fn default_coord_file_name() -> String { String::from("coord.xyz") }
fn default_energy_tol() -> f64 { 0.1 }
fn default_force_tol() -> f64 { 0.5 }
fn default_on_failure() -> QmFailurePolicy { QmFailurePolicy::KeepMl }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }





/// Split a serde_yaml message like "md.stride: invalid type: ..." into the key path and the reason
fn yaml_error_to_config(err: serde_yaml::Error) -> MdError
{
    let message: String = err.to_string();
    match message.split_once(": ")
    {
        Some((key, reason)) if !key.contains(char::is_whitespace) => error_config(key, reason),
        _ => error_config("(document)", message),
    }
}

impl Para
{
    /// Parse and validate a configuration document
    ///
    /// # Examples
    /// ```text
    /// let para: Para = Para::from_yaml_str("initial_structures: structures\nmd: {nsteps: 1000, stride: 10}\n")?;
    /// ```
    pub fn from_yaml_str(text: &str) -> Result<Self>
    {
        let document: serde_yaml::Value = serde_yaml::from_str(text).map_err(yaml_error_to_config)?;
        match document.get("initial_structures")
        {
            Some(value) if !value.is_null() => (),
            _ => return Err(error_config("initial_structures", "a directory or a list of structure files is required")),
        }

        let para: Para = serde_yaml::from_str(text).map_err(yaml_error_to_config)?;
        para.check()?;
        Ok(para)
    }

    /// Read, parse, and validate the configuration file
    pub fn load(path: &Path) -> Result<Self>
    {
        let text: String = fs::read_to_string(path).map_err(error_file("reading", path))?;
        let para: Para = Self::from_yaml_str(&text)?;
        debug!("Loaded the configuration from '{}': {:?}", path.display(), para);
        Ok(para)
    }

    /// Validate every key that a job depends on, so that a bad configuration fails before any job starts
    pub fn check(&self) -> Result<()>
    {
        if self.md.stride == 0
        {
            return Err(error_config("md.stride", "must be at least 1"));
        }
        if self.md.nsteps == 0
        {
            return Err(error_config("md.nsteps", "must be at least 1"));
        }
        if self.md.stride > self.md.nsteps
        {
            return Err(error_config("md.stride", format!("must not exceed md.nsteps ({})", self.md.nsteps)));
        }
        if !(self.md.dynamics.timestep > 0.0)
        {
            return Err(error_config("md.dynamics.timestep", "must be a positive number"));
        }
        if let Some(temperature) = self.md.temperature_k
        {
            if !(temperature >= 0.0)
            {
                return Err(error_config("md.temperature_K", "must not be negative"));
            }
        }

        DevicePool::from_names(&self.mace.devices.to_vec())?;
        let kind: PotentialKind = PotentialKind::from_name(&self.mace.model)?;
        if kind == PotentialKind::LennardJones
        {
            let lj: &LjPara = &self.mace.lennard_jones;
            if !(lj.epsilon > 0.0 && lj.sigma > 0.0 && lj.cutoff > 0.0)
            {
                return Err(error_config("mace.lennard_jones", "epsilon, sigma, and cutoff must be positive"));
            }
        }
        DynamicsKind::from_para(&self.md.dynamics)?;

        if let Some(cell) = &self.system.cellvectors
        {
            crate::matrix::cell_inverse(&cell.to_matrix().view())?;
        }

        if let Some(qm) = &self.cp2k
        {
            if qm.input_str.is_none() && qm.input_file.is_none()
            {
                return Err(error_config("cp2k.input_str", "either input_str or input_file is required"));
            }
            if qm.exe.trim().is_empty()
            {
                return Err(error_config("cp2k.exe", "must not be empty"));
            }
            if qm.nprocs == 0
            {
                return Err(error_config("cp2k.nprocs", "must be at least 1"));
            }
            if !(qm.energy_tol >= 0.0)
            {
                return Err(error_config("cp2k.energy_tol", "must not be negative"));
            }
            if !(qm.force_tol >= 0.0)
            {
                return Err(error_config("cp2k.force_tol", "must not be negative"));
            }
            if qm.backend == QmBackend::Library && !cfg!(feature = "libcp2k")
            {
                return Err(error_config("cp2k.backend", "the library backend needs the crate feature 'libcp2k'"));
            }
        }

        Ok(())
    }

    /// List the initial structures: a directory gives its *.xyz files in name order, a file or a list gives itself
    pub fn discover_structures(&self) -> Result<Vec<PathBuf>>
    {
        let mut structures: Vec<PathBuf> = Vec::new();
        for source in self.initial_structures.to_vec()
        {
            if source.is_dir()
            {
                let mut found: Vec<PathBuf> = Vec::new();
                for entry in fs::read_dir(&source).map_err(error_dir("listing", &source))?
                {
                    let path: PathBuf = entry.map_err(error_dir("listing", &source))?.path();
                    if path.is_file() && path.extension().map_or(false, |ext| ext == "xyz")
                    {
                        found.push(path);
                    }
                }
                found.sort();
                structures.extend(found);
            }
            else if source.is_file()
            {
                structures.push(source);
            }
            else
            {
                return Err(error_config("initial_structures", format!("'{}' is neither a directory nor a file", source.display())));
            }
        }
        Ok(structures)
    }
}





#[cfg(test)]
mod tests
{
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_follow_a_minimal_document()
    {
        let para: Para = Para::from_yaml_str("initial_structures: structures\n").unwrap();
        assert_eq!(para.mace.devices.to_vec(), vec![String::from("cpu")]);
        assert_eq!(para.mace.model, "mace_off");
        assert_eq!(para.mace.model_path, "small");
        assert_eq!(para.mace.default_dtype, Dtype::Float64);
        assert_eq!(para.md.dynamics.class, "Langevin");
        assert_eq!(para.md.dynamics.timestep, 1.0);
        assert!(para.md.dynamics.parameters.is_empty());
        assert_eq!(para.md.nsteps, 100);
        assert_eq!(para.md.stride, 1);
        assert_eq!(para.md.temperature_k, Some(300.0));
        assert!(para.md.write_pdb);
        assert_eq!(para.system.pbc.to_array(), [true; 3]);
        assert_eq!(para.system.resolve_cell(None), *FALLBACK_CELL);
        assert!(para.cp2k.is_none());
    }

    #[test]
    fn single_device_string_becomes_a_list()
    {
        let para: Para = Para::from_yaml_str("initial_structures: s\nmace:\n  devices: cuda:0\n  model: lennard_jones\n").unwrap();
        assert_eq!(para.mace.devices.to_vec(), vec![String::from("cuda:0")]);
    }

    #[test]
    fn cell_and_pbc_forms()
    {
        let para: Para = Para::from_yaml_str("initial_structures: s\nsystem:\n  pbc: [true, true, false]\n  cellvectors: [[12, 0, 0], [0, 13, 0], [1, 0, 14]]\n").unwrap();
        assert_eq!(para.system.pbc.to_array(), [true, true, false]);
        let cell: Array2<f64> = para.system.resolve_cell(None);
        assert_eq!(cell[[1, 1]], 13.0);
        assert_eq!(cell[[2, 0]], 1.0);

        let para: Para = Para::from_yaml_str("initial_structures: s\nsystem: {pbc: false, cellvectors: [8, 9, 10]}\n").unwrap();
        assert_eq!(para.system.pbc.to_array(), [false; 3]);
        assert_eq!(para.system.resolve_cell(None)[[2, 2]], 10.0);
    }

    #[test]
    fn temperature_null_falls_back_to_room_temperature()
    {
        let para: Para = Para::from_yaml_str("initial_structures: s\nmd:\n  temperature_K: null\n").unwrap();
        assert_eq!(para.md.temperature_k, None);
        assert_eq!(para.md.initial_temperature(), 300.0);

        let para: Para = Para::from_yaml_str("initial_structures: s\nmd:\n  temperature_K: 0\n").unwrap();
        assert_eq!(para.md.initial_temperature(), 0.0);
    }

    #[test]
    fn missing_structures_names_the_key()
    {
        match Para::from_yaml_str("md: {nsteps: 10}\n")
        {
            Err(MdError::Config { key, .. }) => assert_eq!(key, "initial_structures"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_values_name_the_key()
    {
        let cases: [(&str, &str); 5] =
        [
            ("initial_structures: s\nmd: {stride: 0}\n", "md.stride"),
            ("initial_structures: s\nmd: {dynamics: {timestep: -1.0}}\n", "md.dynamics.timestep"),
            ("initial_structures: s\nmace: {devices: []}\n", "mace.devices"),
            ("initial_structures: s\ncp2k: {exe: cp2k.sopt}\n", "cp2k.input_str"),
            ("initial_structures: s\nsystem: {cellvectors: [[1, 0, 0], [2, 0, 0], [0, 0, 1]]}\n", "system.cellvectors"),
        ];
        for (text, expected) in cases
        {
            match Para::from_yaml_str(text)
            {
                Err(MdError::Config { key, .. }) => assert_eq!(key, expected, "for {}", text),
                other => panic!("unexpected {:?} for {}", other, text),
            }
        }
    }

    #[test]
    fn unknown_kinds_are_rejected()
    {
        assert!(matches!(Para::from_yaml_str("initial_structures: s\nmace: {model: mace_xl}\n"), Err(MdError::UnsupportedKind { .. })));
        assert!(matches!(Para::from_yaml_str("initial_structures: s\nmd: {dynamics: {class: NPT}}\n"), Err(MdError::UnsupportedKind { .. })));
    }

    #[test]
    fn structures_are_discovered_in_name_order()
    {
        let dir: TempDir = TempDir::new().unwrap();
        for name in ["b.xyz", "a.xyz", "notes.txt", "c.xyz"]
        {
            fs::write(dir.path().join(name), "1\n\nH 0 0 0\n").unwrap();
        }
        let text: String = format!("initial_structures: {}\n", dir.path().display());
        let para: Para = Para::from_yaml_str(&text).unwrap();
        let found: Vec<PathBuf> = para.discover_structures().unwrap();
        let names: Vec<String> = found.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.xyz", "b.xyz", "c.xyz"]);
    }

    #[test]
    fn cp2k_section_defaults()
    {
        let para: Para = Para::from_yaml_str("initial_structures: s\ncp2k:\n  input_str: \"&GLOBAL\\n&END GLOBAL\\n\"\n").unwrap();
        let qm: QmPara = para.cp2k.unwrap();
        assert_eq!(qm.backend, QmBackend::Command);
        assert_eq!(qm.exe, "cp2k.psmp");
        assert_eq!(qm.nprocs, 1);
        assert_eq!(qm.mpi_launcher.as_deref(), Some("mpirun"));
        assert_eq!(qm.on_failure, QmFailurePolicy::KeepMl);
        assert!(qm.input_text().unwrap().starts_with("&GLOBAL"));
    }
}
