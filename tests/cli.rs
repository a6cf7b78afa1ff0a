//! The exit codes of the binary.
use std::fs;
use std::process::Command;
use tempfile::TempDir;





#[test]
fn a_bad_configuration_exits_with_2()
{
    let dir: TempDir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.yaml"), "initial_structures: structures\nmd: {stride: 0}\n").unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_mlmd")).current_dir(dir.path()).status().unwrap();
    assert_eq!(status.code(), Some(2));

    let status = Command::new(env!("CARGO_BIN_EXE_mlmd")).arg("--config").arg(dir.path().join("missing.yaml")).status().unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn a_successful_batch_exits_with_0()
{
    let dir: TempDir = TempDir::new().unwrap();
    fs::write(dir.path().join("dimer.xyz"), "2\nargon dimer\nAr 0.0 0.0 0.0\nAr 3.9 0.0 0.0\n").unwrap();
    fs::write(dir.path().join("run.yaml"), "initial_structures: dimer.xyz\nmace: {model: lennard_jones}\nmd: {nsteps: 20, stride: 5, dynamics: {class: VelocityVerlet}}\n").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_mlmd")).args(["-c", "run.yaml", "--parallel", "1"]).current_dir(dir.path()).status().unwrap();
    assert_eq!(status.code(), Some(0));
    let trajectory: String = fs::read_to_string(dir.path().join("dimer/dimer.trj.xyz")).unwrap();
    assert_eq!(trajectory.lines().filter(|line| line.contains("Lattice=")).count(), 4);

    let status = Command::new(env!("CARGO_BIN_EXE_mlmd")).args(["-c", "run.yaml", "--restart"]).current_dir(dir.path()).status().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn a_failed_job_exits_with_1()
{
    let dir: TempDir = TempDir::new().unwrap();
    fs::write(dir.path().join("dimer.xyz"), "2\nargon dimer\nAr 0.0 0.0 0.0\n").unwrap();
    fs::write(dir.path().join("config.yaml"), "initial_structures: dimer.xyz\nmace: {model: lennard_jones}\nmd: {nsteps: 10, stride: 5}\n").unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_mlmd")).current_dir(dir.path()).status().unwrap();
    assert_eq!(status.code(), Some(1));
}
