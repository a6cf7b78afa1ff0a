//! About the closed set of steppers: velocity Verlet (NVE), Langevin, and Berendsen NVT.
use crate::common::constants::{ACCELERATION_UNIT, BOLTZMANN_EV, DEFAULT_TEMPERATURE_K};
use crate::common::error::*;
use crate::io::input::DynamicsPara;
use crate::md::system::Frame;
use crate::md::traits::{Integrator, PES};
use ndarray::{Array2, Axis};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use phf::phf_map;
use std::collections::BTreeMap;





#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DynamicsClass
{
    VelocityVerlet,
    Langevin,
    NVTBerendsen,
}

// 'STR_TO_DYNAMICS' is a static structure of type 'phf::Map', initialized by macro 'phf_map'
static STR_TO_DYNAMICS: phf::Map<&'static str, DynamicsClass> = phf_map!
{
    "VelocityVerlet" => DynamicsClass::VelocityVerlet,
    "Langevin" => DynamicsClass::Langevin,
    "NVTBerendsen" => DynamicsClass::NVTBerendsen,
};



/// A stepper with its parameters.
///
/// # Variants
/// ```text
/// VelocityVerlet: microcanonical dynamics
/// Langevin: temperature_k (K), friction (Unit: 1/fs)
/// NVTBerendsen: temperature_k (K), taut, the coupling time (Unit: fs)
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DynamicsKind
{
    VelocityVerlet,
    Langevin
    {
        temperature_k: f64,
        friction: f64,
    },
    NVTBerendsen
    {
        temperature_k: f64,
        taut: f64,
    },
}

const DEFAULT_FRICTION: f64 = 0.002;                // 1/fs
const DEFAULT_TAUT: f64 = 100.0;                    // fs

/// Take the allowed parameters out of the map, rejecting any other key
fn take_parameters(parameters: &BTreeMap<String, f64>, allowed: &[&str]) -> Result< BTreeMap<String, f64> >
{
    for key in parameters.keys()
    {
        if !allowed.contains(&key.as_str())
        {
            let reason: String = if allowed.is_empty()
            {
                String::from("this dynamics class takes no parameters")
            }
            else
            {
                format!("allowed parameters are {}", allowed.join(", "))
            };
            return Err(error_config(&format!("md.dynamics.parameters.{}", key), reason));
        }
    }
    Ok(parameters.clone())
}

fn positive(parameters: &BTreeMap<String, f64>, key: &str, default: f64) -> Result<f64>
{
    let value: f64 = parameters.get(key).cloned().unwrap_or(default);
    if value > 0.0
    {
        Ok(value)
    }
    else
    {
        Err(error_config(&format!("md.dynamics.parameters.{}", key), "must be positive"))
    }
}

impl DynamicsKind
{
    pub fn from_para(para: &DynamicsPara) -> Result<Self>
    {
        let class: DynamicsClass = STR_TO_DYNAMICS.get(para.class.trim()).cloned().ok_or_else(||
        {
            let mut supported: Vec<&str> = STR_TO_DYNAMICS.keys().cloned().collect();
            supported.sort();
            MdError::UnsupportedKind { category: "dynamics class", name: para.class.clone(), supported: supported.join(", ") }
        })?;

        match class
        {
            DynamicsClass::VelocityVerlet =>
            {
                take_parameters(&para.parameters, &[])?;
                Ok(DynamicsKind::VelocityVerlet)
            },
            DynamicsClass::Langevin =>
            {
                let p: BTreeMap<String, f64> = take_parameters(&para.parameters, &["temperature_K", "friction"])?;
                Ok(DynamicsKind::Langevin
                {
                    temperature_k: positive(&p, "temperature_K", DEFAULT_TEMPERATURE_K)?,
                    friction: positive(&p, "friction", DEFAULT_FRICTION)?,
                })
            },
            DynamicsClass::NVTBerendsen =>
            {
                let p: BTreeMap<String, f64> = take_parameters(&para.parameters, &["temperature_K", "taut"])?;
                Ok(DynamicsKind::NVTBerendsen
                {
                    temperature_k: positive(&p, "temperature_K", DEFAULT_TEMPERATURE_K)?,
                    taut: positive(&p, "taut", DEFAULT_TAUT)?,
                })
            },
        }
    }
}





/// The stepper of one job.
///
/// # Fields
/// ```text
/// kind: the dynamics and its parameters
/// dt: the time step (Unit: fs)
/// rng: the random number generator of the Langevin noise
/// ```
pub struct Stepper
{
    kind: DynamicsKind,
    dt: f64,
    rng: StdRng,
}

impl Stepper
{
    pub fn new(kind: DynamicsKind, dt: f64, rng: StdRng) -> Self
    {
        Stepper
        {
            kind,
            dt,
            rng,
        }
    }

    pub fn timestep(&self) -> f64
    {
        self.dt
    }
}

/// Acceleration of every atom from the forces (Unit: Angstrom/fs^2)
fn acceleration(frame: &Frame) -> Array2<f64>
{
    let inv_mass: Array2<f64> = frame.system.mass.mapv(|m| ACCELERATION_UNIT / m).insert_axis(Axis(1));
    &frame.forces * &inv_mass
}

impl Integrator for Stepper
{
    fn step(&mut self, frame: &mut Frame, pes: &mut dyn PES) -> Result<()>
    {
        let dt: f64 = self.dt;
        match self.kind
        {
            DynamicsKind::VelocityVerlet | DynamicsKind::NVTBerendsen { .. } =>
            {
                // Velocity Verlet
                let acc: Array2<f64> = acceleration(frame);
                frame.system.vel += &(0.5 * dt * &acc);
                frame.system.coord += &(dt * &frame.system.vel);
                let (pot, force): (f64, Array2<f64>) = pes.get_energy_force(&frame.system)?;
                frame.energy = pot;
                frame.forces = force;
                let acc: Array2<f64> = acceleration(frame);
                frame.system.vel += &(0.5 * dt * &acc);

                // Berendsen thermostat
                if let DynamicsKind::NVTBerendsen { temperature_k, taut } = self.kind
                {
                    let temp: f64 = frame.system.temperature().max(1.0);
                    let lambda: f64 = (1.0 + (dt / taut) * (temperature_k / temp - 1.0)).max(0.0).sqrt();
                    frame.system.vel *= lambda;
                }
            },

            DynamicsKind::Langevin { temperature_k, friction } =>
            {
                // BAOAB splitting
                let c1: f64 = (-friction * dt).exp();
                let kt: f64 = BOLTZMANN_EV * temperature_k;
                let acc: Array2<f64> = acceleration(frame);
                frame.system.vel += &(0.5 * dt * &acc);
                frame.system.coord += &(0.5 * dt * &frame.system.vel);

                let noise: Array2<f64> = Array2::random_using(frame.system.vel.raw_dim(), StandardNormal, &mut self.rng);
                for i in 0..frame.system.natom
                {
                    let sigma: f64 = ((1.0 - c1 * c1) * kt / frame.system.mass[i] * ACCELERATION_UNIT).sqrt();
                    for k in 0..3
                    {
                        frame.system.vel[[i, k]] = c1 * frame.system.vel[[i, k]] + sigma * noise[[i, k]];
                    }
                }

                frame.system.coord += &(0.5 * dt * &frame.system.vel);
                let (pot, force): (f64, Array2<f64>) = pes.get_energy_force(&frame.system)?;
                frame.energy = pot;
                frame.forces = force;
                let acc: Array2<f64> = acceleration(frame);
                frame.system.vel += &(0.5 * dt * &acc);
            },
        }

        Ok(())
    }
}
