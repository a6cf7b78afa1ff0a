//! An interface to the ML potential driver: a long-lived process, one per job, bound to the device of the job.
//!
//! The driver is started as
//! `<driver> <driver_args> --model <kind> --model-path <path> --device <device> --dtype <dtype>`
//! and answers every structure written to its stdin (one XYZ frame, with `Lattice` and `pbc` in the comment line)
//! with `ENERGY <e>` followed by one `fx fy fz` line per atom (Unit: eV and eV/Angstrom), or with `ERROR <message>`.
use crate::common::error::*;
use crate::computing::device::Device;
use crate::io::input::MlpPara;
use crate::io::trajectory::SnapshotRecord;
use crate::md::potential::PotentialKind;
use crate::md::system::System;
use crate::md::traits::PES;
use log::{debug, warn};
use ndarray::Array2;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};





/// The structure holding the driver process of one job.
///
/// # Fields
/// ```text
/// model: the model name, used in the error messages
/// child: the driver process
/// stdin: the request pipe
/// stdout: the response pipe
/// ```
pub struct ModelDriverPES
{
    model: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ModelDriverPES
{
    /// Start the driver in the job directory
    ///
    /// # Parameters
    /// ```text
    /// mlp: the potential settings (driver, model path, precision)
    /// kind: the potential kind
    /// device: the device the job is bound to
    /// workdir: the working directory of the driver
    /// ```
    pub fn spawn(mlp: &MlpPara, kind: PotentialKind, device: &Device, workdir: &Path) -> Result<Self>
    {
        let model: String = kind.model_name().to_string();
        let mut command: Command = Command::new(&mlp.driver);
        command.args(&mlp.driver_args)
            .arg("--model").arg(&model)
            .arg("--model-path").arg(&mlp.model_path)
            .arg("--device").arg(device.to_string())
            .arg("--dtype").arg(mlp.default_dtype.as_str())
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!("Spawning the model driver: {:?}", command);

        let mut child: Child = command.spawn().map_err(|err| error_potential(&model, format!("cannot start the driver '{}': {}", mlp.driver, err)))?;
        let stdin: ChildStdin = child.stdin.take().ok_or_else(|| error_potential(&model, "the stdin of the driver is not piped"))?;
        let stdout: ChildStdout = child.stdout.take().ok_or_else(|| error_potential(&model, "the stdout of the driver is not piped"))?;
        Ok(ModelDriverPES
        {
            model,
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn failure(&self, reason: impl Into<String>) -> MdError
    {
        error_potential(&self.model, reason)
    }

    fn read_line(&mut self) -> Result<String>
    {
        let mut line: String = String::new();
        match self.stdout.read_line(&mut line)
        {
            Ok(0) => Err(self.failure("the driver exited before answering")),
            Ok(_) => Ok(line.trim_end().to_string()),
            Err(err) => Err(self.failure(format!("cannot read the answer of the driver: {}", err))),
        }
    }
}

impl PES for ModelDriverPES
{
    fn name(&self) -> &str
    {
        &self.model
    }

    fn get_energy_force(&mut self, s: &System) -> Result<(f64, Array2<f64>)>
    {
        let request: String = SnapshotRecord
        {
            step: None,
            species: s.species.clone(),
            positions: s.coord.clone(),
            velocities: None,
            cell: s.cell.clone(),
            pbc: s.pbc,
            energy: None,
            forces: None,
        }.to_xyz_string();
        if let Err(err) = self.stdin.write_all(request.as_bytes()).and_then(|_| self.stdin.flush())
        {
            return Err(self.failure(format!("cannot send the structure to the driver: {}", err)));
        }

        let header: String = self.read_line()?;
        let energy: f64 = match header.split_once(' ')
        {
            Some(("ENERGY", value)) => value.trim().parse::<f64>().map_err(|_| self.failure(format!("illegal energy '{}'", value.trim())))?,
            Some(("ERROR", message)) => return Err(self.failure(message.trim().to_string())),
            _ => return Err(self.failure(format!("unexpected answer '{}'", header))),
        };

        let mut forces: Array2<f64> = Array2::zeros((s.natom, 3));
        for i in 0..s.natom
        {
            let line: String = self.read_line()?;
            let values: Vec<f64> = line.split_whitespace().map(|x| x.parse::<f64>()).collect::<std::result::Result<_, _>>()
                .map_err(|_| self.failure(format!("illegal force line '{}'", line)))?;
            if values.len() != 3
            {
                return Err(self.failure(format!("expected 3 force components for atom {}, found '{}'", i, line)));
            }
            for k in 0..3
            {
                forces[[i, k]] = values[k];
            }
        }

        Ok((energy, forces))
    }
}

impl Drop for ModelDriverPES
{
    /// Stop the driver with the job
    fn drop(&mut self)
    {
        if let Err(err) = self.child.kill()
        {
            warn!("Cannot stop the {} driver: {}", self.model, err);
        }
        if let Err(err) = self.child.wait()
        {
            warn!("Cannot wait for the {} driver: {}", self.model, err);
        }
    }
}
