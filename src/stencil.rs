//! Discrete velocity sets.
//!
//! Velocities are drawn from a fixed per-dimension catalogue and addressed
//! by their catalogue number:
//!
//! * 1-D: `0` is rest, then `+1, -1, +2, -2, ...`
//! * 2-D: `0` is rest, then rings of Chebyshev radius `r = 1, 2, ...`, each
//!   ordered by length then by angle from the `+x` axis. Ring 1 is the usual
//!   D2Q9 numbering.
//! ```text
//!   6   2   5
//!    \  |  /
//!   3 - 0 - 1
//!    /  |  \
//!   7   4   8
//! ```
//! * 3-D: the 27 velocities of the D3Q27 lattice (rest, 6 faces, 12 edges,
//!   8 corners).

use log::debug;

use crate::error::{LbmError, Result};

/// D3Q27 catalogue.
const D3Q27: [[i32; 3]; 27] = [
    // Center
    [0, 0, 0],
    // Face neighbors (6)
    [1, 0, 0], [-1, 0, 0], [0, 1, 0], [0, -1, 0], [0, 0, 1], [0, 0, -1],
    // Edge neighbors (12)
    [1, 1, 0], [1, -1, 0], [-1, 1, 0], [-1, -1, 0],
    [1, 0, 1], [1, 0, -1], [-1, 0, 1], [-1, 0, -1],
    [0, 1, 1], [0, 1, -1], [0, -1, 1], [0, -1, -1],
    // Corner neighbors (8)
    [1, 1, 1], [1, 1, -1], [1, -1, 1], [1, -1, -1],
    [-1, 1, 1], [-1, 1, -1], [-1, -1, 1], [-1, -1, -1],
];

/// One discrete velocity: its catalogue number and integer displacement.
/// Unused trailing components are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Velocity {
    pub num: usize,
    pub v: [i32; 3],
}

impl Velocity {
    /// Looks `num` up in the catalogue of dimension `dim`.
    pub fn from_num(dim: usize, num: usize) -> Result<Self> {
        let v = match dim {
            1 => {
                let k = i32::try_from(num.div_ceil(2))
                    .map_err(|_| LbmError::UndefinedVelocity { index: num, dim })?;
                let vx = if num % 2 == 1 { k } else { -k };
                [vx, 0, 0]
            }
            2 => ring_velocity_2d(num),
            3 => *D3Q27
                .get(num)
                .ok_or(LbmError::UndefinedVelocity { index: num, dim })?,
            _ => return Err(LbmError::UndefinedVelocity { index: num, dim }),
        };
        Ok(Self { num, v })
    }

    pub fn reversed(&self) -> [i32; 3] {
        [-self.v[0], -self.v[1], -self.v[2]]
    }

    /// Largest absolute component.
    pub fn norm_inf(&self) -> usize {
        self.v.iter().map(|c| c.unsigned_abs() as usize).max().unwrap_or(0)
    }

    pub fn as_float(&self) -> [f64; 3] {
        [self.v[0] as f64, self.v[1] as f64, self.v[2] as f64]
    }
}

fn ring_velocity_2d(num: usize) -> [i32; 3] {
    if num == 0 {
        return [0, 0, 0];
    }
    // ring r holds 8r velocities starting at (2r-1)^2
    let mut r = 1usize;
    while (2 * r + 1) * (2 * r + 1) <= num {
        r += 1;
    }
    let ri = r as i32;
    let mut ring: Vec<(i32, i32)> = (-ri..=ri)
        .flat_map(|x| (-ri..=ri).map(move |y| (x, y)))
        .filter(|&(x, y)| x.abs().max(y.abs()) == ri)
        .collect();
    ring.sort_by(|a, b| {
        let na = a.0 * a.0 + a.1 * a.1;
        let nb = b.0 * b.0 + b.1 * b.1;
        na.cmp(&nb).then_with(|| angle(*a).total_cmp(&angle(*b)))
    });
    let (x, y) = ring[num - (2 * r - 1) * (2 * r - 1)];
    [x, y, 0]
}

fn angle((x, y): (i32, i32)) -> f64 {
    (y as f64).atan2(x as f64).rem_euclid(std::f64::consts::TAU)
}

/// Velocity request for one sub-scheme.
#[derive(Debug, Clone)]
pub struct StencilSpec {
    pub dim: usize,
    pub velocities: Vec<usize>,
}

/// Velocity sets of all sub-schemes packed into one state vector.
#[derive(Debug, Clone)]
pub struct Stencil {
    pub dim: usize,
    pub velocities: Vec<Vec<Velocity>>,
    /// Number of velocities per sub-scheme.
    pub nv: Vec<usize>,
    /// Prefix sums of `nv`; sub-scheme `k` occupies slots `nv_ptr[k]..nv_ptr[k + 1]`.
    pub nv_ptr: Vec<usize>,
    /// Index (within the same sub-scheme) of the reversed velocity, if present.
    pub opposite: Vec<Vec<Option<usize>>>,
    /// Largest absolute displacement per axis over all sub-schemes.
    pub vmax: [usize; 3],
}

impl Stencil {
    pub fn new(specs: &[StencilSpec]) -> Result<Self> {
        let first = specs
            .first()
            .ok_or_else(|| LbmError::config("at least one scheme is required"))?;
        let dim = first.dim;
        if !(1..=3).contains(&dim) {
            return Err(LbmError::config(format!("unsupported dimension {dim}")));
        }

        let mut velocities = Vec::with_capacity(specs.len());
        for (k, spec) in specs.iter().enumerate() {
            if spec.dim != dim {
                return Err(LbmError::config(format!(
                    "scheme {k} is {}-D but scheme 0 is {dim}-D",
                    spec.dim
                )));
            }
            if spec.velocities.is_empty() {
                return Err(LbmError::config(format!("scheme {k} has no velocities")));
            }
            let mut vs: Vec<Velocity> = Vec::with_capacity(spec.velocities.len());
            for &num in &spec.velocities {
                if vs.iter().any(|v| v.num == num) {
                    return Err(LbmError::config(format!(
                        "scheme {k} lists velocity {num} twice"
                    )));
                }
                vs.push(Velocity::from_num(dim, num)?);
            }
            velocities.push(vs);
        }

        let nv: Vec<usize> = velocities.iter().map(Vec::len).collect();
        let mut nv_ptr = Vec::with_capacity(nv.len() + 1);
        nv_ptr.push(0);
        for n in &nv {
            nv_ptr.push(nv_ptr[nv_ptr.len() - 1] + n);
        }

        let opposite = velocities
            .iter()
            .map(|vs| {
                vs.iter()
                    .map(|v| vs.iter().position(|w| w.v == v.reversed()))
                    .collect()
            })
            .collect();

        let mut vmax = [0usize; 3];
        for v in velocities.iter().flatten() {
            for (axis, c) in v.v.iter().enumerate() {
                vmax[axis] = vmax[axis].max(c.unsigned_abs() as usize);
            }
        }

        debug!("stencil: dim {dim}, nv {nv:?}, vmax {vmax:?}");

        Ok(Self { dim, velocities, nv, nv_ptr, opposite, vmax })
    }

    pub fn nschemes(&self) -> usize {
        self.nv.len()
    }

    /// Total number of slots in the packed state vector.
    pub fn nv_total(&self) -> usize {
        self.nv_ptr[self.nv.len()]
    }

    /// Halo width: largest displacement magnitude over every axis.
    pub fn halo(&self) -> usize {
        self.vmax.iter().copied().max().unwrap_or(0)
    }

    /// Distinct displacement vectors over all sub-schemes, in first-seen order.
    pub fn unique_velocities(&self) -> Vec<[i32; 3]> {
        let mut out: Vec<[i32; 3]> = Vec::new();
        for v in self.velocities.iter().flatten() {
            if !out.contains(&v.v) {
                out.push(v.v);
            }
        }
        out
    }
}
