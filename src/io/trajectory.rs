//! About the snapshot trajectories: the append-only extended XYZ store of one job, its truncation repair,
//! and the PDB trajectory written beside it for visualization.
//!
//! Every frame of the store occupies exactly N+2 lines:
//! ```text
//! <N>
//! Lattice="ax ay az bx by bz cx cy cz" Properties=species:S:1:pos:R:3[:velocities:R:3][:forces:R:3] [energy=<E>] pbc="T T T" [step=<k>]
//! <symbol> x y z [vx vy vz] [fx fy fz]
//! ```
//! Units: Angstrom, Angstrom/fs, eV, eV/Angstrom.
use crate::common::constants::{Element, FALLBACK_CELL};
use crate::common::error::*;
use log::{debug, warn};
use ndarray::{Array2, ArrayView2};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};





/// One persisted frame.
///
/// # Fields
/// ```text
/// step: the global MD step at which the frame was taken
/// species: the element of each atom (natom Vec)
/// positions: the atomic coordinates (natom*3 Array, Unit: Angstrom)
/// velocities: the atomic velocities (natom*3 Array, Unit: Angstrom/fs)
/// cell: the lattice vectors in rows (3*3 Array, Unit: Angstrom)
/// pbc: whether each lattice direction is periodic
/// energy: the potential energy (Unit: eV)
/// forces: the atomic forces (natom*3 Array, Unit: eV/Angstrom)
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotRecord
{
    pub step: Option<usize>,
    pub species: Vec<Element>,
    pub positions: Array2<f64>,
    pub velocities: Option< Array2<f64> >,
    pub cell: Array2<f64>,
    pub pbc: [bool; 3],
    pub energy: Option<f64>,
    pub forces: Option< Array2<f64> >,
}

impl SnapshotRecord
{
    pub fn natom(&self) -> usize
    {
        self.species.len()
    }

    /// Format the whole frame in memory (N+2 lines, each terminated by a newline)
    pub fn to_xyz_string(&self) -> String
    {
        let natom: usize = self.natom();
        let mut out: String = String::with_capacity((natom + 2) * 96);

        out.push_str(&format!("{}\n", natom));

        let mut properties: String = String::from("species:S:1:pos:R:3");
        if self.velocities.is_some()
        {
            properties.push_str(":velocities:R:3");
        }
        if self.forces.is_some()
        {
            properties.push_str(":forces:R:3");
        }
        let lattice: Vec<String> = self.cell.iter().map(|x| format!("{:.10}", x)).collect();
        out.push_str(&format!("Lattice=\"{}\" Properties={}", lattice.join(" "), properties));
        if let Some(energy) = self.energy
        {
            out.push_str(&format!(" energy={:.10}", energy));
        }
        let pbc: Vec<&str> = self.pbc.iter().map(|p| if *p { "T" } else { "F" }).collect();
        out.push_str(&format!(" pbc=\"{}\"", pbc.join(" ")));
        if let Some(step) = self.step
        {
            out.push_str(&format!(" step={}", step));
        }
        out.push('\n');

        for i in 0..natom
        {
            out.push_str(&format!("{:<2} {:20.10} {:20.10} {:20.10}", self.species[i], self.positions[[i, 0]], self.positions[[i, 1]], self.positions[[i, 2]]));
            if let Some(vel) = &self.velocities
            {
                out.push_str(&format!(" {:20.10} {:20.10} {:20.10}", vel[[i, 0]], vel[[i, 1]], vel[[i, 2]]));
            }
            if let Some(force) = &self.forces
            {
                out.push_str(&format!(" {:20.10} {:20.10} {:20.10}", force[[i, 0]], force[[i, 1]], force[[i, 2]]));
            }
            out.push('\n');
        }

        out
    }
}





/// Split the comment line of an extended XYZ frame into key/value pairs. Tokens without '=' are ignored.
fn parse_comment(comment: &str) -> Vec<(String, String)>
{
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut chars = comment.chars().peekable();
    loop
    {
        while chars.peek().map_or(false, |c| c.is_whitespace())
        {
            chars.next();
        }
        if chars.peek().is_none()
        {
            break;
        }

        let mut key: String = String::new();
        while let Some(&c) = chars.peek()
        {
            if c == '=' || c.is_whitespace()
            {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.peek() != Some(&'=')
        {
            continue;               // A bare word, e.g. a plain XYZ title
        }
        chars.next();

        let mut value: String = String::new();
        if chars.peek() == Some(&'"')
        {
            chars.next();
            while let Some(c) = chars.next()
            {
                if c == '"'
                {
                    break;
                }
                value.push(c);
            }
        }
        else
        {
            while let Some(&c) = chars.peek()
            {
                if c.is_whitespace()
                {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        pairs.push((key, value));
    }
    pairs
}

fn lookup_key<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str>
{
    pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

fn parse_bool(token: &str) -> std::result::Result<bool, String>
{
    match token
    {
        "T" | "t" | "True" | "true" | "1" => Ok(true),
        "F" | "f" | "False" | "false" | "0" => Ok(false),
        _ => Err(format!("'{}' is not a periodic flag", token)),
    }
}

fn parse_f64(token: &str) -> std::result::Result<f64, String>
{
    token.parse::<f64>().map_err(|_| format!("'{}' is not a number", token))
}

/// The layout of the per-atom columns, taken from the Properties key
struct Columns
{
    vel: Option<usize>,
    force: Option<usize>,
    width: usize,
}

fn parse_properties(properties: Option<&str>) -> std::result::Result<Columns, String>
{
    let properties: &str = match properties
    {
        Some(p) => p,
        None => return Ok(Columns { vel: None, force: None, width: 4 }),
    };

    let fields: Vec<&str> = properties.split(':').collect();
    if fields.len() % 3 != 0
    {
        return Err(format!("malformed Properties '{}'", properties));
    }

    let mut columns: Columns = Columns { vel: None, force: None, width: 0 };
    let mut has_pos: bool = false;
    for (index, chunk) in fields.chunks(3).enumerate()
    {
        let count: usize = chunk[2].parse().map_err(|_| format!("malformed Properties '{}'", properties))?;
        match (index, chunk[0])
        {
            (0, "species") => (),
            (0, name) => return Err(format!("the first property must be species, found '{}'", name)),
            (_, "pos") => has_pos = columns.width == 1,
            (_, "velocities") | (_, "vel") => columns.vel = Some(columns.width),
            (_, "forces") | (_, "force") => columns.force = Some(columns.width),
            _ => (),
        }
        columns.width += count;
    }
    if !has_pos
    {
        return Err(String::from("pos must directly follow species in Properties"));
    }
    Ok(columns)
}

/// Parse one frame from its comment line and its N atom lines
fn parse_frame(natom: usize, comment: &str, atom_lines: &[&str]) -> std::result::Result<SnapshotRecord, String>
{
    let pairs: Vec<(String, String)> = parse_comment(comment);
    let lookup = |name: &str| lookup_key(&pairs, name);

    let cell: Option< Array2<f64> > = match lookup("Lattice")
    {
        Some(lattice) =>
        {
            let values: Vec<f64> = lattice.split_whitespace().map(parse_f64).collect::<std::result::Result<_, _>>()?;
            if values.len() != 9
            {
                return Err(format!("Lattice holds {} numbers instead of 9", values.len()));
            }
            Some(Array2::from_shape_vec((3, 3), values).map_err(|e| e.to_string())?)
        },
        None => None,
    };
    let pbc: [bool; 3] = match lookup("pbc")
    {
        Some(flags) =>
        {
            let flags: Vec<bool> = flags.split_whitespace().map(parse_bool).collect::<std::result::Result<_, _>>()?;
            if flags.len() != 3
            {
                return Err(format!("pbc holds {} flags instead of 3", flags.len()));
            }
            [flags[0], flags[1], flags[2]]
        },
        None => [cell.is_some(); 3],
    };
    let energy: Option<f64> = lookup("energy").map(parse_f64).transpose()?;
    let step: Option<usize> = lookup("step").map(|s| s.parse::<usize>().map_err(|_| format!("'{}' is not a step index", s))).transpose()?;
    let columns: Columns = parse_properties(lookup("Properties"))?;

    let mut species: Vec<Element> = Vec::with_capacity(natom);
    let mut positions: Array2<f64> = Array2::zeros((natom, 3));
    let mut velocities: Option< Array2<f64> > = columns.vel.map(|_| Array2::zeros((natom, 3)));
    let mut forces: Option< Array2<f64> > = columns.force.map(|_| Array2::zeros((natom, 3)));
    for (i, line) in atom_lines.iter().enumerate()
    {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < columns.width
        {
            return Err(format!("atom line {} has {} columns, expected {}", i + 1, tokens.len(), columns.width));
        }
        species.push(tokens[0].parse::<Element>().map_err(|e| e.to_string())?);
        for k in 0..3
        {
            positions[[i, k]] = parse_f64(tokens[1 + k])?;
        }
        if let (Some(vel), Some(offset)) = (velocities.as_mut(), columns.vel)
        {
            for k in 0..3
            {
                vel[[i, k]] = parse_f64(tokens[offset + k])?;
            }
        }
        if let (Some(force), Some(offset)) = (forces.as_mut(), columns.force)
        {
            for k in 0..3
            {
                force[[i, k]] = parse_f64(tokens[offset + k])?;
            }
        }
    }

    Ok(SnapshotRecord
    {
        step,
        species,
        positions,
        velocities,
        cell: cell.unwrap_or_else(|| FALLBACK_CELL.clone()),
        pbc,
        energy,
        forces,
    })
}

/// Parse a sequence of frames from the whole content of an XYZ file.
///
/// Every frame must be complete and hold the same atoms, in the same order, as the first one.
pub fn parse_frames(content: &str) -> std::result::Result<Vec<SnapshotRecord>, String>
{
    let lines: Vec<&str> = content.lines().collect();
    let mut frames: Vec<SnapshotRecord> = Vec::new();
    let mut first_natom: Option<usize> = None;
    let mut i: usize = 0;
    while i < lines.len()
    {
        // Tolerate blank lines after the last frame only
        if lines[i..].iter().all(|l| l.trim().is_empty())
        {
            break;
        }

        let natom: usize = lines[i].trim().parse().map_err(|_| format!("line {} should declare the atom count, found '{}'", i + 1, lines[i].trim()))?;
        if let Some(first) = first_natom
        {
            if natom != first
            {
                return Err(format!("frame {} declares {} atoms, but the first frame declares {}", frames.len() + 1, natom, first));
            }
        }
        first_natom = Some(natom);

        if i + natom + 2 > lines.len()
        {
            return Err(format!("frame {} is short: {} of {} lines present", frames.len() + 1, lines.len() - i, natom + 2));
        }
        let record: SnapshotRecord = parse_frame(natom, lines[i + 1], &lines[(i + 2)..(i + 2 + natom)]).map_err(|reason| format!("frame {}: {}", frames.len() + 1, reason))?;
        if let Some(first) = frames.first()
        {
            if let Some(atom) = (0..natom).find(|&j| record.species[j] != first.species[j])
            {
                return Err(format!("frame {} holds {} as atom {}, but the first frame holds {}", frames.len() + 1, record.species[atom], atom, first.species[atom]));
            }
        }
        frames.push(record);
        i += natom + 2;
    }
    Ok(frames)
}





/// The outcome of a truncation repair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepairReport
{
    pub kept_frames: usize,
    pub discarded_lines: usize,
}



/// The append-only snapshot trajectory of one job.
#[derive(Clone, Debug)]
pub struct SnapshotStore
{
    path: PathBuf,
}

impl SnapshotStore
{
    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        SnapshotStore
        {
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn exists(&self) -> bool
    {
        self.path.is_file()
    }

    /// Append one frame. The frame is written by a single write and flushed to the disk,
    /// so that an interruption leaves at most one partial frame at the tail.
    ///
    /// # Examples
    /// ```text
    /// store.append(&frame.to_record(step))?;
    /// ```
    pub fn append(&self, record: &SnapshotRecord) -> Result<()>
    {
        let buffer: String = record.to_xyz_string();
        let mut file: File = File::options().create(true).append(true).open(&self.path).map_err(error_file("opening", &self.path))?;
        file.write_all(buffer.as_bytes()).map_err(error_file("writing", &self.path))?;
        file.sync_data().map_err(error_file("syncing", &self.path))?;
        Ok(())
    }

    /// Read all the frames in order. A missing store holds no frames.
    pub fn read_all(&self) -> Result<Vec<SnapshotRecord>>
    {
        let content: String = match fs::read_to_string(&self.path)
        {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) if err.kind() == ErrorKind::InvalidData => return Err(self.corrupt("the file is not valid UTF-8")),
            Err(err) => return Err(error_file("reading", &self.path)(err)),
        };
        if !content.is_empty() && !content.ends_with('\n')
        {
            return Err(self.corrupt("the last line is not terminated"));
        }
        parse_frames(&content).map_err(|reason| self.corrupt(reason))
    }

    pub fn frame_count(&self) -> Result<usize>
    {
        Ok(self.read_all()?.len())
    }

    /// Truncate the store to its complete frames.
    ///
    /// Only newline-terminated lines are complete. The first line declares the atom count N,
    /// and the store keeps floor(complete lines / (N+2)) frames. Every kept frame header must declare N.
    /// The truncated store must read back cleanly, otherwise it is unrepairable.
    pub fn repair(&self) -> Result<RepairReport>
    {
        let bytes: Vec<u8> = match fs::read(&self.path)
        {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(RepairReport { kept_frames: 0, discarded_lines: 0 }),
            Err(err) => return Err(error_file("reading", &self.path)(err)),
        };

        let complete_len: usize = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        let partial_line: usize = if complete_len < bytes.len() { 1 } else { 0 };
        let complete: &str = std::str::from_utf8(&bytes[..complete_len]).map_err(|_| self.unrepairable("the complete lines are not valid UTF-8"))?;
        let lines: Vec<&str> = complete.split_inclusive('\n').collect();

        let (kept_frames, kept_lines): (usize, usize) = match lines.first()
        {
            None => (0, 0),
            Some(first) =>
            {
                let natom: usize = first.trim().parse().map_err(|_| self.unrepairable(format!("the first line should declare the atom count, found '{}'", first.trim())))?;
                let frame_size: usize = natom + 2;
                let frames: usize = lines.len() / frame_size;
                for f in 0..frames
                {
                    let header: &str = lines[f * frame_size].trim();
                    if header.parse::<usize>().ok() != Some(natom)
                    {
                        return Err(self.unrepairable(format!("frame {} declares '{}' atoms, but the first frame declares {}", f + 1, header, natom)));
                    }
                }
                (frames, frames * frame_size)
            },
        };

        let kept_len: usize = lines[..kept_lines].iter().map(|l| l.len()).sum();
        let file: File = File::options().write(true).open(&self.path).map_err(error_file("opening", &self.path))?;
        file.set_len(kept_len as u64).map_err(error_file("truncating", &self.path))?;
        file.sync_data().map_err(error_file("syncing", &self.path))?;

        let report: RepairReport = RepairReport
        {
            kept_frames,
            discarded_lines: lines.len() - kept_lines + partial_line,
        };
        debug!("Truncated '{}' to {} bytes", self.path.display(), kept_len);

        // The repaired store must parse
        match self.read_all()
        {
            Ok(frames) if frames.len() == kept_frames => Ok(report),
            Ok(frames) => Err(self.unrepairable(format!("{} frames read back after keeping {}", frames.len(), kept_frames))),
            Err(MdError::CorruptStore { reason, .. }) => Err(self.unrepairable(reason)),
            Err(err) => Err(err),
        }
    }

    /// Remove the store, e.g. at the start of a fresh run
    pub fn reset(&self) -> Result<()>
    {
        match fs::remove_file(&self.path)
        {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) =>
            {
                warn!("Could not remove '{}'", self.path.display());
                Err(error_file("removing", &self.path)(err))
            },
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> MdError
    {
        MdError::CorruptStore { path: self.path.clone(), reason: reason.into() }
    }

    fn unrepairable(&self, reason: impl Into<String>) -> MdError
    {
        MdError::UnrepairableStore { path: self.path.clone(), reason: reason.into() }
    }
}





/// The lattice constants (a, b, c, alpha, beta, gamma) of a cell, for the PDB CRYST1 record
fn lattice_constants(cell: &ArrayView2<f64>) -> [f64; 6]
{
    let norm = |i: usize| -> f64 { (0..3).map(|k| cell[[i, k]].powi(2)).sum::<f64>().sqrt() };
    let dot = |i: usize, j: usize| -> f64 { (0..3).map(|k| cell[[i, k]] * cell[[j, k]]).sum::<f64>() };
    let angle = |i: usize, j: usize| -> f64
    {
        let denom: f64 = norm(i) * norm(j);
        if denom == 0.0
        {
            90.0
        }
        else
        {
            (dot(i, j) / denom).clamp(-1.0, 1.0).acos().to_degrees()
        }
    };
    [norm(0), norm(1), norm(2), angle(1, 2), angle(0, 2), angle(0, 1)]
}

/// The PDB trajectory, written for visualization and never read back.
#[derive(Clone, Debug)]
pub struct PdbTrajectory
{
    path: PathBuf,
}

impl PdbTrajectory
{
    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        PdbTrajectory
        {
            path: path.into(),
        }
    }

    /// Open the PDB trajectory (creating it with a TITLE if it does not exist) and append one model
    ///
    /// # Parameters
    /// ```text
    /// record: the frame to be written (positions in Angstrom)
    /// ```
    pub fn append(&self, record: &SnapshotRecord) -> Result<()>
    {
        let mut buffer: String = String::new();
        if !self.path.is_file()
        {
            buffer.push_str("TITLE     PDB file created by mlmd\n");
        }

        let step: usize = record.step.unwrap_or(0);
        buffer.push_str(&format!("REMARK    , Step = {:8}, E = {:15.8}\n", step, record.energy.unwrap_or(0.0)));
        if record.pbc.iter().any(|p| *p)
        {
            let c: [f64; 6] = lattice_constants(&record.cell.view());
            buffer.push_str(&format!("CRYST1{:9.3}{:9.3}{:9.3}{:7.2}{:7.2}{:7.2} P 1           1\n", c[0], c[1], c[2], c[3], c[4], c[5]));
        }
        for i in 0..record.natom()
        {
            let symbol: String = record.species[i].symbol();
            buffer.push_str(&format!("ATOM  {:>5} {:>4}              {:8.3}{:8.3}{:8.3}  1.00  0.00          {:>2}\n", (i+1)%100000, symbol, record.positions[[i,0]], record.positions[[i,1]], record.positions[[i,2]], symbol));
        }
        buffer.push_str("END\n");

        let mut pdb: File = File::options().create(true).append(true).open(&self.path).map_err(error_file("opening", &self.path))?;
        pdb.write_all(buffer.as_bytes()).map_err(error_file("writing", &self.path))?;
        Ok(())
    }
}





#[cfg(test)]
mod tests
{
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::TempDir;

    fn water(step: usize) -> SnapshotRecord
    {
        SnapshotRecord
        {
            step: Some(step),
            species: vec![Element::O, Element::H, Element::H],
            positions: array![[5.0, 5.0, 5.0], [5.757, 5.586, 5.0], [4.243, 5.586, 5.0 + step as f64 * 0.01]],
            velocities: Some(array![[0.001, -0.002, 0.0], [0.01, 0.0, -0.005], [0.0, 0.003, 0.004]]),
            cell: array![[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]],
            pbc: [true, true, true],
            energy: Some(-14.2345 - step as f64 * 1e-3),
            forces: Some(array![[0.1, 0.2, -0.3], [-0.05, -0.1, 0.15], [-0.05, -0.1, 0.15]]),
        }
    }

    fn store_with_frames(dir: &TempDir, k: usize) -> SnapshotStore
    {
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("water.trj.xyz"));
        for i in 1..=k
        {
            store.append(&water(10 * i)).unwrap();
        }
        store
    }

    fn append_raw(store: &SnapshotStore, text: &str)
    {
        let mut file: File = File::options().append(true).open(store.path()).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn missing_store_is_empty()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("none.trj.xyz"));
        assert!(store.read_all().unwrap().is_empty());
        assert_eq!(store.frame_count().unwrap(), 0);
        assert_eq!(store.repair().unwrap(), RepairReport { kept_frames: 0, discarded_lines: 0 });
        store.reset().unwrap();
    }

    #[test]
    fn appended_frames_read_back_in_order()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 3);
        let frames: Vec<SnapshotRecord> = store.read_all().unwrap();
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate()
        {
            let expected: SnapshotRecord = water(10 * (i + 1));
            assert_eq!(frame.step, expected.step);
            assert_eq!(frame.species, expected.species);
            assert_eq!(frame.pbc, expected.pbc);
            assert_abs_diff_eq!(frame.energy.unwrap(), expected.energy.unwrap(), epsilon = 1e-9);
            for (a, b) in frame.positions.iter().zip(expected.positions.iter())
            {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
            for (a, b) in frame.velocities.as_ref().unwrap().iter().zip(expected.velocities.as_ref().unwrap().iter())
            {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
            for (a, b) in frame.forces.as_ref().unwrap().iter().zip(expected.forces.as_ref().unwrap().iter())
            {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
            assert_eq!(frame.cell, expected.cell);
        }
    }

    #[test]
    fn frame_without_optional_columns()
    {
        let mut record: SnapshotRecord = water(0);
        record.velocities = None;
        record.forces = None;
        record.energy = None;
        record.step = None;
        record.pbc = [true, false, true];
        let frames: Vec<SnapshotRecord> = parse_frames(&record.to_xyz_string()).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].velocities.is_none());
        assert!(frames[0].forces.is_none());
        assert!(frames[0].energy.is_none());
        assert_eq!(frames[0].pbc, [true, false, true]);
    }

    #[test]
    fn plain_xyz_gets_the_fallback_cell()
    {
        let frames: Vec<SnapshotRecord> = parse_frames("2\nhydrogen molecule\nH 0.0 0.0 0.0\nH 0.0 0.0 0.74\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cell, *FALLBACK_CELL);
        assert_eq!(frames[0].pbc, [false; 3]);
        assert_abs_diff_eq!(frames[0].positions[[1, 2]], 0.74);
    }

    #[test]
    fn partial_trailing_line_is_corrupt()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 2);
        append_raw(&store, "3\nLattice=\"10 0 0 0 1");
        assert!(matches!(store.read_all(), Err(MdError::CorruptStore { .. })));
    }

    #[test]
    fn short_frame_and_varying_atom_count_are_corrupt()
    {
        assert!(parse_frames("3\ncomment\nO 0 0 0\nH 1 0 0\n").is_err());
        assert!(parse_frames("1\nc\nH 0 0 0\n2\nc\nH 0 0 0\nH 1 0 0\n").is_err());
        assert!(parse_frames("1\nc\nH 0 zero 0\n").is_err());
    }

    #[test]
    fn reordered_atoms_are_corrupt()
    {
        assert_eq!(parse_frames("2\nc\nO 0 0 0\nH 1 0 0\n2\nc\nO 0 0 0\nH 1 0 0\n").unwrap().len(), 2);
        let err: String = parse_frames("2\nc\nO 0 0 0\nH 1 0 0\n2\nc\nH 1 0 0\nO 0 0 0\n").unwrap_err();
        assert!(err.contains("frame 2"));

        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 2);
        let mut swapped: SnapshotRecord = water(3);
        swapped.species.swap(0, 1);
        append_raw(&store, &swapped.to_xyz_string());
        assert!(matches!(store.read_all(), Err(MdError::CorruptStore { .. })));
    }

    #[test]
    fn repair_keeps_the_complete_frames()
    {
        for (k, partial) in [(0, "3\nLatt"), (4, "3\n"), (4, "3\nLattice=\"10 0 0 0 10 0 0 0 10\" pbc=\"T T T\"\nO 5.0 5.0 5.0\nH 5.7"), (2, "")]
        {
            let dir: TempDir = TempDir::new().unwrap();
            let store: SnapshotStore = store_with_frames(&dir, k);
            if k == 0
            {
                File::create(store.path()).unwrap();
            }
            append_raw(&store, partial);

            let report: RepairReport = store.repair().unwrap();
            assert_eq!(report.kept_frames, k);
            assert_eq!(store.frame_count().unwrap(), k);
            let frames: Vec<SnapshotRecord> = store.read_all().unwrap();
            if k > 0
            {
                assert_eq!(frames.last().unwrap().step, Some(10 * k));
            }
        }
    }

    #[test]
    fn repair_counts_discarded_lines()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 2);
        append_raw(&store, "3\ncomment\nO 5.0 5.0 5.0\nH 5.7");
        let report: RepairReport = store.repair().unwrap();
        assert_eq!(report, RepairReport { kept_frames: 2, discarded_lines: 4 });
    }

    #[test]
    fn repair_is_stable_on_a_healthy_store()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 3);
        let before: Vec<u8> = fs::read(store.path()).unwrap();
        assert_eq!(store.repair().unwrap(), RepairReport { kept_frames: 3, discarded_lines: 0 });
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn inconsistent_framing_is_unrepairable()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = SnapshotStore::new(dir.path().join("mixed.trj.xyz"));
        fs::write(store.path(), "1\nc\nH 0 0 0\n2\nc\nH 0 0 0\nH 1 0 0\n").unwrap();
        assert!(matches!(store.repair(), Err(MdError::UnrepairableStore { .. })));

        fs::write(store.path(), "three\nc\nH 0 0 0\n").unwrap();
        assert!(matches!(store.repair(), Err(MdError::UnrepairableStore { .. })));
    }

    #[test]
    fn reset_removes_the_store()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let store: SnapshotStore = store_with_frames(&dir, 1);
        store.reset().unwrap();
        assert!(!store.exists());
        assert_eq!(store.frame_count().unwrap(), 0);
    }

    #[test]
    fn pdb_trajectory_has_one_model_per_append()
    {
        let dir: TempDir = TempDir::new().unwrap();
        let pdb: PdbTrajectory = PdbTrajectory::new(dir.path().join("water.trj.pdb"));
        pdb.append(&water(1)).unwrap();
        pdb.append(&water(2)).unwrap();
        let content: String = fs::read_to_string(dir.path().join("water.trj.pdb")).unwrap();
        assert_eq!(content.matches("TITLE").count(), 1);
        assert_eq!(content.matches("END\n").count(), 2);
        assert_eq!(content.matches("ATOM  ").count(), 6);
        assert!(content.contains("CRYST1   10.000   10.000   10.000  90.00  90.00  90.00"));
    }
}
