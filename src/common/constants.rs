//! Contains mathematical, physical, and chemical constants.
//!
//! Internal units follow the trajectory files: Angstrom, femtosecond, eV, and atomic mass unit.
use crate::common::error::{MdError, Result};
use lazy_static::lazy_static;
use ndarray::{arr1, Array2};
use phf::phf_map;
use std::fmt;
use std::str::FromStr;










// Physical

pub const BOLTZMANN_EV: f64 = 8.617333262E-5;               // eV/K

pub const BOHR_TO_ANGSTROM: f64 = 0.52917720859;
pub const ANGSTROM_TO_BOHR: f64 = 1.0 / BOHR_TO_ANGSTROM;

pub const HARTREE_TO_EV: f64 = 27.211386245988;
pub const HARTREE_PER_BOHR_TO_EV_PER_ANGSTROM: f64 = HARTREE_TO_EV / BOHR_TO_ANGSTROM;

// (eV/Angstrom)/amu expressed in Angstrom/fs^2, i.e. the acceleration of 1 amu under 1 eV/Angstrom
pub const ACCELERATION_UNIT: f64 = 9.648533212331E-3;

pub const FEMTOSECOND_TO_PICOSECOND: f64 = 1.0E-3;





// Simulation defaults

pub const DEFAULT_TEMPERATURE_K: f64 = 300.0;
pub const FALLBACK_CELL_LENGTH: f64 = 10.0;                 // Angstrom

lazy_static!
{
    /// The cubic cell used when the structure or the configuration does not specify one
    pub static ref FALLBACK_CELL: Array2<f64> = Array2::from_diag(&arr1(&[FALLBACK_CELL_LENGTH; 3]));
}










// Chemical

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Element
{
    H, He,
    Li, Be, B, C, N, O, F, Ne,
    Na, Mg, Al, Si, P, S, Cl, Ar,
    K, Ca, Sc, Ti, V, Cr, Mn, Fe, Co, Ni, Cu, Zn, Ga, Ge, As, Se, Br, Kr,
    Rb, Sr, Y, Zr, Nb, Mo, Tc, Ru, Rh, Pd, Ag, Cd, In, Sn, Sb, Te, I, Xe,
    Cs, Ba, W, Pt, Au, Hg, Pb, Bi,
}

// 'STR_TO_ELEMENT' is a static structure of type 'phf::Map', initialized by macro 'phf_map'
static STR_TO_ELEMENT: phf::Map<&'static str, Element> = phf_map!
{
    "H" => Element::H,
    "He" => Element::He,

    "Li" => Element::Li,
    "Be" => Element::Be,
    "B" => Element::B,
    "C" => Element::C,
    "N" => Element::N,
    "O" => Element::O,
    "F" => Element::F,
    "Ne" => Element::Ne,

    "Na" => Element::Na,
    "Mg" => Element::Mg,
    "Al" => Element::Al,
    "Si" => Element::Si,
    "P" => Element::P,
    "S" => Element::S,
    "Cl" => Element::Cl,
    "Ar" => Element::Ar,

    "K" => Element::K,
    "Ca" => Element::Ca,
    "Sc" => Element::Sc,
    "Ti" => Element::Ti,
    "V" => Element::V,
    "Cr" => Element::Cr,
    "Mn" => Element::Mn,
    "Fe" => Element::Fe,
    "Co" => Element::Co,
    "Ni" => Element::Ni,
    "Cu" => Element::Cu,
    "Zn" => Element::Zn,
    "Ga" => Element::Ga,
    "Ge" => Element::Ge,
    "As" => Element::As,
    "Se" => Element::Se,
    "Br" => Element::Br,
    "Kr" => Element::Kr,

    "Rb" => Element::Rb,
    "Sr" => Element::Sr,
    "Y" => Element::Y,
    "Zr" => Element::Zr,
    "Nb" => Element::Nb,
    "Mo" => Element::Mo,
    "Tc" => Element::Tc,
    "Ru" => Element::Ru,
    "Rh" => Element::Rh,
    "Pd" => Element::Pd,
    "Ag" => Element::Ag,
    "Cd" => Element::Cd,
    "In" => Element::In,
    "Sn" => Element::Sn,
    "Sb" => Element::Sb,
    "Te" => Element::Te,
    "I" => Element::I,
    "Xe" => Element::Xe,

    "Cs" => Element::Cs,
    "Ba" => Element::Ba,
    "W" => Element::W,
    "Pt" => Element::Pt,
    "Au" => Element::Au,
    "Hg" => Element::Hg,
    "Pb" => Element::Pb,
    "Bi" => Element::Bi,
};

// 'STR_TO_ATOMIC_MASS' is a static structure of type 'phf::Map', initialized by macro 'phf_map' (Unit: amu)
static STR_TO_ATOMIC_MASS: phf::Map<&'static str, f64> = phf_map!
{
    "H" => 1.00794,
    "He" => 4.002602,

    "Li" => 6.941,
    "Be" => 9.012182,
    "B" => 10.811,
    "C" => 12.0107,
    "N" => 14.0067,
    "O" => 15.9994,
    "F" => 18.9984032,
    "Ne" => 20.1797,

    "Na" => 22.98976928,
    "Mg" => 24.305,
    "Al" => 26.9815386,
    "Si" => 28.0855,
    "P" => 30.973762,
    "S" => 32.065,
    "Cl" => 35.453,
    "Ar" => 39.948,

    "K" => 39.0983,
    "Ca" => 40.078,
    "Sc" => 44.955912,
    "Ti" => 47.867,
    "V" => 50.9415,
    "Cr" => 51.9961,
    "Mn" => 54.938045,
    "Fe" => 55.845,
    "Co" => 58.933195,
    "Ni" => 58.6934,
    "Cu" => 63.546,
    "Zn" => 65.38,
    "Ga" => 69.723,
    "Ge" => 72.64,
    "As" => 74.9216,
    "Se" => 78.96,
    "Br" => 79.904,
    "Kr" => 83.798,

    "Rb" => 85.4678,
    "Sr" => 87.62,
    "Y" => 88.90585,
    "Zr" => 91.224,
    "Nb" => 92.90638,
    "Mo" => 95.96,
    "Tc" => 97.9072,
    "Ru" => 101.07,
    "Rh" => 102.9055,
    "Pd" => 106.42,
    "Ag" => 107.8682,
    "Cd" => 112.411,
    "In" => 114.818,
    "Sn" => 118.71,
    "Sb" => 121.76,
    "Te" => 127.6,
    "I" => 126.90447,
    "Xe" => 131.293,

    "Cs" => 132.9054519,
    "Ba" => 137.327,
    "W" => 183.84,
    "Pt" => 195.084,
    "Au" => 196.966569,
    "Hg" => 200.59,
    "Pb" => 207.2,
    "Bi" => 208.9804,
};

impl Element
{
    pub fn symbol(&self) -> String
    {
        format!("{:?}", self)
    }

    pub fn get_atomic_mass(&self) -> f64
    {
        // Every variant has an entry in the mass table
        STR_TO_ATOMIC_MASS.get(self.symbol().as_str()).cloned().unwrap_or(0.0)
    }
}

impl FromStr for Element
{
    type Err = MdError;

    /// Accept the symbol in any letter case (e.g. "CL", "cl", "Cl")
    fn from_str(element: &str) -> Result<Self>
    {
        let element: &str = element.trim();
        let mut chars = element.chars();
        let normalized: String = match chars.next()
        {
            Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
            None => String::new(),
        };
        STR_TO_ELEMENT.get(normalized.as_str()).cloned().ok_or_else(|| MdError::Element(element.to_string()))
    }
}

impl fmt::Display for Element
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:?}", self)
    }
}
