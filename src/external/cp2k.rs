//! An interface to CP2K, which provides the QM reference energy and atomic forces for the validation hook.
//!
//! By default CP2K runs as a subprocess in the `cp2k_files` directory of the job;
//! with the crate feature `libcp2k` it may be evaluated in-process through libcp2k.
use crate::common::constants::{HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM, HARTREE_TO_EV};
use crate::common::error::*;
use crate::io::input::{QmBackend, QmPara};
use crate::io::output::create_output_path;
use crate::io::trajectory::SnapshotRecord;
use crate::md::system::System;
use crate::md::traits::PES;
use log::{debug, info};
use ndarray::Array2;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};





/// Build the QM engine of one job
///
/// # Parameters
/// ```text
/// para: the CP2K settings
/// workdir: the directory of the CP2K input and output files
/// s: the initial structure of the job
/// ```
pub fn build_qm_engine(para: &QmPara, workdir: &Path, s: &System) -> Result<Box<dyn PES + Send>>
{
    match para.backend
    {
        QmBackend::Command => Ok(Box::new(Cp2kCommandPES::new(para, workdir)?)),
        #[cfg(feature = "libcp2k")]
        QmBackend::Library => Ok(Box::new(library::Cp2kLibraryPES::new(para, workdir, s)?)),
        #[cfg(not(feature = "libcp2k"))]
        QmBackend::Library =>
        {
            let _ = s;
            Err(error_config("cp2k.backend", "the library backend needs the crate feature 'libcp2k'"))
        },
    }
}

/// The command line of one CP2K run: `[<launcher> -np <nprocs>] <exe> -i cp2k.in -o cp2k.out`.
/// The exe may carry leading words, e.g. "env OMP_NUM_THREADS=4 cp2k.psmp".
pub fn command_line(para: &QmPara) -> Vec<String>
{
    let mut words: Vec<String> = Vec::new();
    if let Some(launcher) = &para.mpi_launcher
    {
        words.push(launcher.clone());
        words.push(String::from("-np"));
        words.push(para.nprocs.to_string());
    }
    words.extend(para.exe.split_whitespace().map(String::from));
    words.extend(["-i", "cp2k.in", "-o", "cp2k.out"].iter().map(|x| x.to_string()));
    words
}



/// Write the structure in the XYZ format read by CP2K (Unit: Angstrom)
fn write_coord(path: &Path, s: &System) -> Result<()>
{
    let record: SnapshotRecord = SnapshotRecord
    {
        step: None,
        species: s.species.clone(),
        positions: s.coord.clone(),
        velocities: None,
        cell: s.cell.clone(),
        pbc: s.pbc,
        energy: None,
        forces: None,
    };
    fs::write(path, record.to_xyz_string()).map_err(error_file("writing", path))
}

/// Read the comment line and the three columns of the last frame of a CP2K XYZ trajectory
fn read_last_frame(path: &Path) -> Result<(String, Array2<f64>)>
{
    let content: String = fs::read_to_string(path).map_err(error_file("reading", path))?;
    let lines: Vec<&str> = content.lines().collect();
    let mut last: Option<(String, Array2<f64>)> = None;
    let mut cursor: usize = 0;
    while cursor < lines.len()
    {
        if lines[cursor].trim().is_empty()
        {
            cursor += 1;
            continue;
        }
        let natom: usize = lines[cursor].trim().parse().map_err(|_| error_read(path, format!("illegal atom count '{}'", lines[cursor].trim())))?;
        if cursor + natom + 2 > lines.len()
        {
            return Err(error_read(path, "the last frame is incomplete"));
        }
        let mut values: Array2<f64> = Array2::zeros((natom, 3));
        for i in 0..natom
        {
            let words: Vec<&str> = lines[cursor + 2 + i].split_whitespace().collect();
            if words.len() < 4
            {
                return Err(error_read(path, format!("expected a symbol and 3 numbers, found '{}'", lines[cursor + 2 + i])));
            }
            for k in 0..3
            {
                values[[i, k]] = words[k + 1].parse().map_err(|_| error_read(path, format!("illegal number '{}'", words[k + 1])))?;
            }
        }
        last = Some((lines[cursor + 1].to_string(), values));
        cursor += natom + 2;
    }
    last.ok_or_else(|| error_read(path, "no frame found"))
}

/// The energy in a CP2K comment line, e.g. " i =        0, E =      -17.1463232152" (Unit: Hartree)
fn energy_from_comment(comment: &str) -> Option<f64>
{
    for field in comment.split(',')
    {
        if let Some((key, value)) = field.split_once('=')
        {
            if key.trim() == "E"
            {
                return value.trim().parse().ok();
            }
        }
    }
    None
}



/// CP2K as a subprocess, one run per evaluation.
///
/// # Fields
/// ```text
/// workdir: the directory of the CP2K files
/// input: the CP2K input text
/// command: the command line of one run
/// project_name: prefix of the position and force trajectories written by CP2K
/// coord_file_name: the coordinate file referred to by the input
/// ```
pub struct Cp2kCommandPES
{
    workdir: PathBuf,
    input: String,
    command: Vec<String>,
    project_name: String,
    coord_file_name: String,
}

impl Cp2kCommandPES
{
    pub fn new(para: &QmPara, workdir: &Path) -> Result<Self>
    {
        let command: Vec<String> = command_line(para);
        if para.exe.trim().is_empty()
        {
            return Err(error_config("cp2k.exe", "must not be empty"));
        }
        Ok(Cp2kCommandPES
        {
            workdir: workdir.to_path_buf(),
            input: para.input_text()?,
            command,
            project_name: para.project_name.clone(),
            coord_file_name: para.coord_file_name.clone(),
        })
    }

    fn pos_file(&self) -> PathBuf
    {
        self.workdir.join(format!("{}-pos-1.xyz", self.project_name))
    }

    fn frc_file(&self) -> PathBuf
    {
        self.workdir.join(format!("{}-frc-1.xyz", self.project_name))
    }

    /// Remove the trajectories of the previous run, so that a failed run is never read as a successful one
    fn remove_stale_outputs(&self) -> Result<()>
    {
        for path in [self.pos_file(), self.frc_file()]
        {
            match fs::remove_file(&path)
            {
                Ok(()) => (),
                Err(err) if err.kind() == ErrorKind::NotFound => (),
                Err(err) => return Err(error_file("removing", &path)(err)),
            }
        }
        Ok(())
    }
}

impl PES for Cp2kCommandPES
{
    fn name(&self) -> &str
    {
        "cp2k"
    }

    fn get_energy_force(&mut self, s: &System) -> Result<(f64, Array2<f64>)>
    {
        create_output_path(&self.workdir)?;
        let input_file: PathBuf = self.workdir.join("cp2k.in");
        fs::write(&input_file, &self.input).map_err(error_file("writing", &input_file))?;
        write_coord(&self.workdir.join(&self.coord_file_name), s)?;
        self.remove_stale_outputs()?;

        debug!("Running '{}' in '{}'", self.command.join(" "), self.workdir.display());
        let status: ExitStatus = Command::new(&self.command[0])
            .args(&self.command[1..])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .status()
            .map_err(|err| error_potential("cp2k", format!("cannot start '{}': {}", self.command[0], err)))?;
        if !status.success()
        {
            return Err(error_potential("cp2k", format!("'{}' exited with {}", self.command.join(" "), status)));
        }

        let (comment, _positions): (String, Array2<f64>) = read_last_frame(&self.pos_file())?;
        let energy: f64 = energy_from_comment(&comment).ok_or_else(|| error_read(&self.pos_file(), format!("no energy in the comment line '{}'", comment.trim())))?;
        let (_, forces): (String, Array2<f64>) = read_last_frame(&self.frc_file())?;
        if forces.nrows() != s.natom
        {
            return Err(error_potential("cp2k", format!("{} force rows for {} atoms", forces.nrows(), s.natom)));
        }
        info!("CP2K energy: {:.8} Hartree", energy);

        Ok((energy * HARTREE_TO_EV, forces * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM))
    }
}





/// CP2K in-process through libcp2k.
///
/// libcp2k is not re-entrant: every call goes through one process-wide lock,
/// and the library is initialized once and never finalized.
#[cfg(feature = "libcp2k")]
pub mod library
{
    extern crate libc;

    use super::write_coord;
    use crate::common::constants::{ANGSTROM_TO_BOHR, HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM, HARTREE_TO_EV};
    use crate::common::error::*;
    use crate::io::input::QmPara;
    use crate::io::output::create_output_path;
    use crate::md::system::System;
    use crate::md::traits::PES;
    use lazy_static::lazy_static;
    use ndarray::Array2;
    use std::ffi::CString;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, MutexGuard, Once};

    pub type ForceEnv = libc::c_int;

    extern
    {
        fn __libcp2k_MOD_cp2k_init();
        fn __libcp2k_MOD_cp2k_create_force_env(new_force_env: &mut ForceEnv, input_file: *const libc::c_char, output_file: *const libc::c_char);
        fn __libcp2k_MOD_cp2k_destroy_force_env(force_env: ForceEnv);
        fn __libcp2k_MOD_cp2k_get_natom(force_env: ForceEnv, natom: &mut libc::c_int);
        fn __libcp2k_MOD_cp2k_get_potential_energy(force_env: ForceEnv, e_pot: &mut libc::c_double);
        fn __libcp2k_MOD_cp2k_get_forces(force_env: ForceEnv, force: *mut libc::c_double, n_el: libc::c_int);
        fn __libcp2k_MOD_cp2k_set_positions(force_env: ForceEnv, new_pos: *const libc::c_double, n_el: libc::c_int);
        fn __libcp2k_MOD_cp2k_set_cell(force_env: ForceEnv, new_cell: *const libc::c_double);
        fn __libcp2k_MOD_cp2k_calc_energy_force(force_env: ForceEnv);
    }

    static INIT: Once = Once::new();

    lazy_static!
    {
        static ref LIBCP2K_LOCK: Mutex<()> = Mutex::new(());
    }

    fn lock() -> MutexGuard<'static, ()>
    {
        // A panic while holding the lock leaves libcp2k untouched by Rust code
        LIBCP2K_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn to_cstring(path: &Path) -> Result<CString>
    {
        CString::new(path.display().to_string()).map_err(|_| error_potential("libcp2k", format!("the path '{}' contains a NUL byte", path.display())))
    }

    /// The structure holding a CP2K force environment.
    ///
    /// # Fields
    /// ```text
    /// force_env: the force environment built in CP2K
    /// natom: the number of atoms of the force environment
    /// ```
    pub struct Cp2kLibraryPES
    {
        force_env: ForceEnv,
        natom: usize,
    }

    impl Cp2kLibraryPES
    {
        /// Write the input and the coordinates of the initial structure in the working directory,
        /// then create the force environment from them. The positions and the cell are set again before every evaluation.
        pub fn new(para: &QmPara, workdir: &Path, s: &System) -> Result<Self>
        {
            create_output_path(workdir)?;
            let input_file: PathBuf = workdir.join("cp2k.in");
            let output_file: PathBuf = workdir.join("cp2k.out");
            fs::write(&input_file, para.input_text()?).map_err(error_file("writing", &input_file))?;
            write_coord(&workdir.join(&para.coord_file_name), s)?;
            let input_c: CString = to_cstring(&input_file)?;
            let output_c: CString = to_cstring(&output_file)?;

            let _guard: MutexGuard<'static, ()> = lock();
            INIT.call_once(|| unsafe { __libcp2k_MOD_cp2k_init() });
            let mut force_env: ForceEnv = 0;
            let mut natom: libc::c_int = 0;
            unsafe
            {
                __libcp2k_MOD_cp2k_create_force_env(&mut force_env, input_c.as_ptr(), output_c.as_ptr());
                __libcp2k_MOD_cp2k_get_natom(force_env, &mut natom);
            }
            Ok(Cp2kLibraryPES
            {
                force_env,
                natom: natom as usize,
            })
        }
    }

    impl PES for Cp2kLibraryPES
    {
        fn name(&self) -> &str
        {
            "libcp2k"
        }

        fn get_energy_force(&mut self, s: &System) -> Result<(f64, Array2<f64>)>
        {
            if s.natom != self.natom
            {
                return Err(error_potential("libcp2k", format!("the force environment has {} atoms, the structure {}", self.natom, s.natom)));
            }
            let n_el: libc::c_int = (s.natom * 3) as libc::c_int;
            let pos: Vec<f64> = s.coord.iter().map(|x| x * ANGSTROM_TO_BOHR).collect();
            let cell: Vec<f64> = s.cell.iter().map(|x| x * ANGSTROM_TO_BOHR).collect();
            let mut energy: f64 = 0.0;
            let mut forces: Vec<f64> = vec![0.0; s.natom * 3];

            let _guard: MutexGuard<'static, ()> = lock();
            unsafe
            {
                __libcp2k_MOD_cp2k_set_cell(self.force_env, cell.as_ptr());
                __libcp2k_MOD_cp2k_set_positions(self.force_env, pos.as_ptr(), n_el);
                __libcp2k_MOD_cp2k_calc_energy_force(self.force_env);
                __libcp2k_MOD_cp2k_get_potential_energy(self.force_env, &mut energy);
                __libcp2k_MOD_cp2k_get_forces(self.force_env, forces.as_mut_ptr(), n_el);
            }

            let forces: Array2<f64> = Array2::from_shape_vec((s.natom, 3), forces)
                .map_err(|err| error_potential("libcp2k", err.to_string()))?;
            Ok((energy * HARTREE_TO_EV, forces * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM))
        }
    }

    impl Drop for Cp2kLibraryPES
    {
        /// Destroy the built force environment in the drop() function
        fn drop(&mut self)
        {
            let _guard: MutexGuard<'static, ()> = lock();
            unsafe
            {
                __libcp2k_MOD_cp2k_destroy_force_env(self.force_env);
            }
        }
    }
}





#[cfg(test)]
mod tests
{
    use super::*;
    use crate::common::constants::Element;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::TempDir;

    fn qm_para(yaml: &str) -> QmPara
    {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn command_line_follows_the_launcher()
    {
        let para: QmPara = qm_para("input_str: x\nnprocs: 4\n");
        assert_eq!(command_line(&para).join(" "), "mpirun -np 4 cp2k.psmp -i cp2k.in -o cp2k.out");

        let para: QmPara = qm_para("input_str: x\nmpi_launcher: null\nexe: env OMP_NUM_THREADS=2 cp2k.ssmp\n");
        assert_eq!(command_line(&para).join(" "), "env OMP_NUM_THREADS=2 cp2k.ssmp -i cp2k.in -o cp2k.out");
    }

    #[test]
    fn energies_are_read_from_the_comment_line()
    {
        assert_eq!(energy_from_comment(" i =        0, E =      -17.1463232152"), Some(-17.1463232152));
        assert_eq!(energy_from_comment(" i = 3, time = 1.500, E = -1.25"), Some(-1.25));
        assert_eq!(energy_from_comment("no energy"), None);
    }

    #[cfg(unix)]
    const FAKE_CP2K: &str = r#"
[ "$1" = "-i" ] && [ "$2" = "cp2k.in" ] && [ "$4" = "cp2k.out" ] || exit 2
n=$(head -n 1 coord.xyz)
{
    for e in -0.5 -1.0; do
        echo "$n"
        echo " i =        0, E =       $e"
        tail -n +3 coord.xyz | while read sym x y z rest; do echo "$sym $x $y $z"; done
    done
} > cp2k-pos-1.xyz
{
    echo "$n"
    echo " i =        0, E =       -1.0"
    tail -n +3 coord.xyz | while read sym rest; do echo "$sym 0.01 0.0 -0.01"; done
} > cp2k-frc-1.xyz
echo "done" > cp2k.out
"#;

    #[cfg(unix)]
    fn fake_cp2k(dir: &TempDir, script: &str) -> QmPara
    {
        let path: PathBuf = dir.path().join("fake_cp2k.sh");
        fs::write(&path, script).unwrap();
        qm_para(&format!("input_str: \"&GLOBAL\\n&END GLOBAL\\n\"\nmpi_launcher: null\nexe: sh {}\n", path.display()))
    }

    fn h2() -> System
    {
        System::new(vec![Element::H, Element::H], array![[5.0, 5.0, 5.0], [5.0, 5.0, 5.74]], Array2::eye(3) * 10.0, [true; 3])
    }

    #[cfg(unix)]
    #[test]
    fn the_last_frame_is_read_and_converted()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let para: QmPara = fake_cp2k(&dir, FAKE_CP2K);
        let workdir: PathBuf = dir.path().join("cp2k_files");
        let mut pes: Box<dyn PES + Send> = build_qm_engine(&para, &workdir, &h2()).unwrap();

        let (energy, forces): (f64, Array2<f64>) = pes.get_energy_force(&h2()).unwrap();
        assert_abs_diff_eq!(energy, -HARTREE_TO_EV, epsilon = 1e-9);
        assert_abs_diff_eq!(forces[[1, 0]], 0.01 * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM, epsilon = 1e-9);
        assert_abs_diff_eq!(forces[[1, 2]], -0.01 * HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM, epsilon = 1e-9);
        assert_eq!(fs::read_to_string(workdir.join("cp2k.in")).unwrap(), "&GLOBAL\n&END GLOBAL\n");
        assert!(workdir.join("coord.xyz").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn a_failed_run_never_reads_old_results()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let para: QmPara = fake_cp2k(&dir, FAKE_CP2K);
        let workdir: PathBuf = dir.path().join("cp2k_files");
        let mut pes: Box<dyn PES + Send> = build_qm_engine(&para, &workdir, &h2()).unwrap();
        pes.get_energy_force(&h2()).unwrap();

        fs::write(dir.path().join("fake_cp2k.sh"), "exit 1\n").unwrap();
        assert!(matches!(pes.get_energy_force(&h2()), Err(MdError::Potential { .. })));
        assert!(!workdir.join("cp2k-frc-1.xyz").exists());
    }

    #[test]
    fn a_truncated_trajectory_is_an_error()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("cp2k-frc-1.xyz");
        fs::write(&path, "2\n i = 0, E = -1.0\nH 0.0 0.0 0.0\n").unwrap();
        assert!(matches!(read_last_frame(&path), Err(MdError::Read { .. })));
    }
}
