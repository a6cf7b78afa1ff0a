//! About the closed set of potentials a job can run on.
use crate::common::error::*;
use crate::computing::device::Device;
use crate::external::model_driver::ModelDriverPES;
use crate::io::input::{LjPara, MlpPara};
use crate::matrix;
use crate::md::system::System;
use crate::md::traits::PES;
use log::info;
use ndarray::Array2;
use phf::phf_map;
use std::path::Path;





/// The potential kinds. The MACE kinds are served by the external model driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PotentialKind
{
    MaceOff,
    MaceAnicc,
    MaceMp,
    /// A custom MACE model, loaded from model_path
    Mace,
    LennardJones,
}

// 'STR_TO_POTENTIAL' is a static structure of type 'phf::Map', initialized by macro 'phf_map'
static STR_TO_POTENTIAL: phf::Map<&'static str, PotentialKind> = phf_map!
{
    "mace_off" => PotentialKind::MaceOff,
    "mace_anicc" => PotentialKind::MaceAnicc,
    "mace_mp" => PotentialKind::MaceMp,
    "mace" => PotentialKind::Mace,
    "lennard_jones" => PotentialKind::LennardJones,
};

impl PotentialKind
{
    /// Look up a potential name. Hyphens and underscores are interchangeable (e.g. "mace-off").
    pub fn from_name(name: &str) -> Result<Self>
    {
        let key: String = name.trim().replace('-', "_");
        STR_TO_POTENTIAL.get(key.as_str()).cloned().ok_or_else(||
        {
            let mut supported: Vec<&str> = STR_TO_POTENTIAL.keys().cloned().collect();
            supported.sort();
            MdError::UnsupportedKind { category: "potential", name: name.to_string(), supported: supported.join(", ") }
        })
    }

    /// The model name passed to the driver
    pub fn model_name(&self) -> &'static str
    {
        match self
        {
            PotentialKind::MaceOff => "mace_off",
            PotentialKind::MaceAnicc => "mace_anicc",
            PotentialKind::MaceMp => "mace_mp",
            PotentialKind::Mace => "mace",
            PotentialKind::LennardJones => "lennard_jones",
        }
    }
}





/// The truncated and shifted Lennard-Jones potential, with the minimum image convention along periodic directions.
///
/// # Fields
/// ```text
/// epsilon: the depth of the well (Unit: eV)
/// sigma: the distance at which the pair energy crosses zero (Unit: Angstrom)
/// cutoff: the interaction range (Unit: Angstrom)
/// ```
#[derive(Clone, Debug)]
pub struct LennardJonesPES
{
    pub epsilon: f64,
    pub sigma: f64,
    pub cutoff: f64,
}

impl LennardJonesPES
{
    pub fn new(para: &LjPara) -> Self
    {
        LennardJonesPES
        {
            epsilon: para.epsilon,
            sigma: para.sigma,
            cutoff: para.cutoff,
        }
    }

    fn pair_energy(&self, r2: f64) -> f64
    {
        let sr6: f64 = (self.sigma * self.sigma / r2).powi(3);
        4.0 * self.epsilon * (sr6 * sr6 - sr6)
    }
}

impl PES for LennardJonesPES
{
    fn name(&self) -> &str
    {
        "lennard_jones"
    }

    fn get_energy_force(&mut self, s: &System) -> Result<(f64, Array2<f64>)>
    {
        let periodic: bool = s.pbc.iter().any(|p| *p);
        let cell_inv: Option< Array2<f64> > = if periodic { Some(matrix::cell_inverse(&s.cell.view())?) } else { None };
        let rc2: f64 = self.cutoff * self.cutoff;
        let shift: f64 = self.pair_energy(rc2);

        let mut pot: f64 = 0.0;
        let mut force: Array2<f64> = Array2::zeros((s.natom, 3));
        for i in 0..s.natom
        {
            for j in (i+1)..s.natom
            {
                let mut d: [f64; 3] = [0.0; 3];
                for k in 0..3
                {
                    d[k] = s.coord[[j, k]] - s.coord[[i, k]];
                }
                if let Some(inv) = &cell_inv
                {
                    let mut frac: [f64; 3] = [0.0; 3];
                    for k in 0..3
                    {
                        frac[k] = (0..3).map(|l| d[l] * inv[[l, k]]).sum();
                    }
                    matrix::minimum_image(&mut frac, s.pbc);
                    for k in 0..3
                    {
                        d[k] = (0..3).map(|l| frac[l] * s.cell[[l, k]]).sum();
                    }
                }

                let r2: f64 = d.iter().map(|x| x * x).sum();
                if r2 > rc2
                {
                    continue;
                }
                let sr6: f64 = (self.sigma * self.sigma / r2).powi(3);
                pot += self.pair_energy(r2) - shift;
                let f_over_r: f64 = 24.0 * self.epsilon * (2.0 * sr6 * sr6 - sr6) / r2;            // -dE/dr / r
                for k in 0..3
                {
                    force[[j, k]] += f_over_r * d[k];
                    force[[i, k]] -= f_over_r * d[k];
                }
            }
        }

        Ok((pot, force))
    }
}





/// Build the calculator of one job on its device
///
/// # Parameters
/// ```text
/// mlp: the potential settings
/// device: the device the job is bound to
/// workdir: the job directory, where the driver runs
/// ```
pub fn build_potential(mlp: &MlpPara, device: &Device, workdir: &Path) -> Result<Box<dyn PES + Send>>
{
    let kind: PotentialKind = PotentialKind::from_name(&mlp.model)?;
    match kind
    {
        PotentialKind::LennardJones =>
        {
            info!("Using the Lennard-Jones potential (epsilon = {} eV, sigma = {} A)", mlp.lennard_jones.epsilon, mlp.lennard_jones.sigma);
            Ok(Box::new(LennardJonesPES::new(&mlp.lennard_jones)))
        },
        _ =>
        {
            info!("Starting the {} model driver on {}", kind.model_name(), device);
            Ok(Box::new(ModelDriverPES::spawn(mlp, kind, device, workdir)?))
        },
    }
}
