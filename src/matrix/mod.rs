//! About the matrix operations on the simulation cell.
//!
//! The cell is stored as a 3*3 Array whose rows are the lattice vectors, so that a Cartesian position r
//! and its fractional coordinate f satisfy r = f * cell.
use crate::common::error::*;
use nalgebra::Matrix3;
use ndarray::{Array2, ArrayView2};





fn to_matrix3(cell: &ArrayView2<f64>) -> Matrix3<f64>
{
    Matrix3::from_fn(|i, j| cell[[i, j]])
}

fn from_matrix3(m: &Matrix3<f64>) -> Array2<f64>
{
    Array2::from_shape_fn((3, 3), |(i, j)| m[(i, j)])
}



/// Invert the cell matrix
///
/// # Parameters
/// ```text
/// cell: the lattice vectors in rows (3*3 Array, Unit: Angstrom)
/// ```
///
/// # Examples
/// ```text
/// let inv: Array2<f64> = cell_inverse(&s.cell.view())?;
/// ```
pub fn cell_inverse(cell: &ArrayView2<f64>) -> Result<Array2<f64>>
{
    if cell.dim() != (3, 3)
    {
        return Err(error_config("system.cellvectors", format!("expected a 3x3 cell, found {:?}", cell.dim())));
    }
    match to_matrix3(cell).try_inverse()
    {
        Some(inv) => Ok(from_matrix3(&inv)),
        None => Err(error_config("system.cellvectors", "the cell vectors are linearly dependent")),
    }
}

/// Transform the Cartesian coordinates (natom*3) into fractional coordinates of the cell
pub fn to_fractional(coord: &ArrayView2<f64>, cell_inv: &ArrayView2<f64>) -> Array2<f64>
{
    coord.dot(cell_inv)
}

/// Transform the fractional coordinates (natom*3) back into Cartesian coordinates
pub fn to_cartesian(frac: &ArrayView2<f64>, cell: &ArrayView2<f64>) -> Array2<f64>
{
    frac.dot(cell)
}



/// Wrap the atoms into the cell along the periodic directions
///
/// # Parameters
/// ```text
/// coord: the atomic coordinates to be wrapped in place (natom*3 Array, Unit: Angstrom)
/// cell: the lattice vectors in rows
/// pbc: whether each of the three lattice directions is periodic
/// ```
pub fn wrap_positions(coord: &mut Array2<f64>, cell: &ArrayView2<f64>, pbc: [bool; 3]) -> Result<()>
{
    if !pbc.iter().any(|p| *p)
    {
        return Ok(());
    }
    let cell_inv: Array2<f64> = cell_inverse(cell)?;
    let mut frac: Array2<f64> = to_fractional(&coord.view(), &cell_inv.view());
    for mut row in frac.rows_mut()
    {
        for k in 0..3
        {
            if pbc[k]
            {
                row[k] -= row[k].floor();
            }
        }
    }
    *coord = to_cartesian(&frac.view(), cell);
    Ok(())
}

/// Apply the minimum image convention to a single displacement vector given in fractional coordinates
pub fn minimum_image(frac_disp: &mut [f64; 3], pbc: [bool; 3])
{
    for k in 0..3
    {
        if pbc[k]
        {
            frac_disp[k] -= frac_disp[k].round();
        }
    }
}
