//! About the traits at the seams of a job: the energy/force calculator, the stepper, and the periodic hooks.
use crate::common::error::Result;
use crate::md::system::{Frame, System};
use ndarray::Array2;





/// A potential energy surface: energy (Unit: eV) and atomic forces (natom*3, Unit: eV/Angstrom)
pub trait PES
{
    fn name(&self) -> &str;

    fn get_energy_force(&mut self, s: &System) -> Result<(f64, Array2<f64>)>;

    fn get_energy(&mut self, s: &System) -> Result<f64>
    {
        Ok(self.get_energy_force(s)?.0)
    }
}



/// Advances the frame by one time step.
///
/// On entry the frame holds the forces of its current positions; on exit it holds the forces of the new positions.
pub trait Integrator
{
    fn step(&mut self, frame: &mut Frame, pes: &mut dyn PES) -> Result<()>;
}



/// A side effect fired every stride steps with the global step index and the shared frame
pub trait Hook
{
    fn name(&self) -> &'static str;

    fn call(&mut self, step: usize, frame: &mut Frame) -> Result<()>;
}
