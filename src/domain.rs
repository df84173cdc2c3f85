//! The discretized grid owned by one rank.
//!
//! Nodes sit at cell centres, `x_i = xmin + (i + 1/2) dx`, and the local
//! grid is the rank's sub-box surrounded by `halo` ghost layers on every
//! used axis. Buffers over the grid are x-fastest:
//! `index = i + nx * (j + ny * k)` with `nx, ny` including the halo.

use log::{debug, info};
use nalgebra::Vector3;

use crate::error::{LbmError, Result};
use crate::geometry::Geometry;
use crate::partition::{HaloChannel, HaloLayers, Side, Topology};
use crate::Float;

/// Per-node classification, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTag {
    Fluid,
    Solid,
    /// Interior fluid node with at least one upstream neighbour in solid;
    /// carries the label of the nearest such neighbour.
    Edge(i32),
}

impl NodeTag {
    pub fn is_fluid(self) -> bool {
        !matches!(self, NodeTag::Solid)
    }
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub dim: usize,
    pub dx: Float,
    pub geometry: Geometry,
    /// Ghost layers per axis (0 on unused axes).
    pub halo: [usize; 3],
    /// Interior cells of the whole box.
    pub global_n: [usize; 3],
    /// Interior cells of this rank.
    pub n: [usize; 3],
    /// Global index of this rank's first interior cell.
    pub offset: [usize; 3],
    /// Local extent including the halo.
    pub shape: [usize; 3],
    pub tags: Vec<NodeTag>,
    pub rank: usize,
    pub topology: Topology,
}

impl Domain {
    /// Builds the local grid of `rank` and classifies every node against the
    /// geometry. `velocities` are the distinct displacements of the stencil.
    pub fn build(
        geometry: Geometry,
        dx: Float,
        halo: usize,
        velocities: &[[i32; 3]],
        topology: &Topology,
        rank: usize,
    ) -> Result<Self> {
        let dim = geometry.dim;
        if !(dx.is_finite() && dx > 0.0) {
            return Err(LbmError::config(format!("space step must be positive, got {dx}")));
        }
        if rank >= topology.size {
            return Err(LbmError::config(format!(
                "rank {rank} outside a group of {}",
                topology.size
            )));
        }
        if topology.periodic[..dim] != geometry.periodic[..dim] {
            return Err(LbmError::config(
                "process topology periodicity disagrees with the box labels",
            ));
        }
        if topology.dims[dim..].iter().any(|&d| d != 1) {
            return Err(LbmError::config(format!(
                "process topology {:?} splits axes unused by a {dim}-D box",
                topology.dims
            )));
        }

        let coords = topology.coords(rank);
        let mut global_n = [1usize; 3];
        let mut n = [1usize; 3];
        let mut offset = [0usize; 3];
        let mut halo_w = [0usize; 3];
        let mut shape = [1usize; 3];
        for axis in 0..dim {
            let [lo, hi] = geometry.bounds[axis];
            global_n[axis] = ((hi - lo) / dx - 1e-10).ceil().max(1.0) as usize;
            let parts = topology.dims[axis];
            let base = global_n[axis] / parts;
            let rem = global_n[axis] % parts;
            let c = coords[axis];
            n[axis] = base + usize::from(c < rem);
            offset[axis] = c * base + c.min(rem);
            if n[axis] == 0 || n[axis] < halo {
                return Err(LbmError::config(format!(
                    "axis {axis}: {} cells on rank {rank} cannot feed a halo of {halo}",
                    n[axis]
                )));
            }
            halo_w[axis] = halo;
            shape[axis] = n[axis] + 2 * halo;
        }

        let mut domain = Self {
            dim,
            dx,
            geometry,
            halo: halo_w,
            global_n,
            n,
            offset,
            shape,
            tags: Vec::new(),
            rank,
            topology: topology.clone(),
        };
        domain.classify(velocities);

        let count = |pred: fn(&NodeTag) -> bool| domain.tags.iter().filter(|t| pred(t)).count();
        info!(
            "rank {rank}: local grid {:?} (global {:?}), {} fluid, {} edge, {} solid nodes",
            &domain.shape[..dim],
            &domain.global_n[..dim],
            count(|t| *t == NodeTag::Fluid),
            count(|t| matches!(t, NodeTag::Edge(_))),
            count(|t| *t == NodeTag::Solid),
        );
        Ok(domain)
    }

    fn classify(&mut self, velocities: &[[i32; 3]]) {
        let len = self.len();
        self.tags = (0..len)
            .map(|idx| match self.geometry.classify(&self.coords(idx)) {
                None => NodeTag::Fluid,
                Some(_) => NodeTag::Solid,
            })
            .collect();

        let mut by_length: Vec<[i32; 3]> = velocities.to_vec();
        by_length.sort_by_key(|v| v.iter().map(|c| c * c).sum::<i32>());
        for idx in self.interior_indices() {
            if self.tags[idx] != NodeTag::Fluid {
                continue;
            }
            // shortest velocity with a solid upstream node names the edge
            let label = by_length.iter().find_map(|v| {
                let up = self.shift(idx, [-v[0], -v[1], -v[2]])?;
                if self.tags[up] == NodeTag::Solid {
                    self.geometry.classify(&self.coords(up))
                } else {
                    None
                }
            });
            if let Some(label) = label {
                self.tags[idx] = NodeTag::Edge(label);
            }
        }
    }

    /// Number of nodes including the halo.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.shape[0] * (j + self.shape[1] * k)
    }

    #[inline]
    pub fn unravel(&self, idx: usize) -> [usize; 3] {
        [
            idx % self.shape[0],
            (idx / self.shape[0]) % self.shape[1],
            idx / (self.shape[0] * self.shape[1]),
        ]
    }

    /// Node reached from `idx` by displacement `v`, if it lies in grid+halo.
    #[inline]
    pub fn shift(&self, idx: usize, v: [i32; 3]) -> Option<usize> {
        let p = self.unravel(idx);
        let mut q = [0usize; 3];
        for axis in 0..3 {
            let c = p[axis] as i64 + v[axis] as i64;
            if c < 0 || c >= self.shape[axis] as i64 {
                return None;
            }
            q[axis] = c as usize;
        }
        Some(self.index(q[0], q[1], q[2]))
    }

    /// Global (unwrapped) coordinates of local node `idx`.
    pub fn coords(&self, idx: usize) -> Vector3<Float> {
        let p = self.unravel(idx);
        let mut x = Vector3::zeros();
        for axis in 0..self.dim {
            let g = self.offset[axis] as Float + p[axis] as Float - self.halo[axis] as Float;
            x[axis] = self.geometry.bounds[axis][0] + (g + 0.5) * self.dx;
        }
        x
    }

    /// Node coordinates along `axis`, halo included.
    pub fn axis_coords(&self, axis: usize) -> Vec<Float> {
        let lo = self.geometry.bounds[axis][0];
        (0..self.shape[axis])
            .map(|i| {
                let g = self.offset[axis] as Float + i as Float - self.halo[axis] as Float;
                lo + (g + 0.5) * self.dx
            })
            .collect()
    }

    pub fn is_interior(&self, idx: usize) -> bool {
        let p = self.unravel(idx);
        (0..3).all(|a| p[a] >= self.halo[a] && p[a] < self.halo[a] + self.n[a])
    }

    /// Indices of the nodes this rank owns, halo excluded.
    pub fn interior_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.n.iter().product());
        for k in self.halo[2]..self.halo[2] + self.n[2] {
            for j in self.halo[1]..self.halo[1] + self.n[1] {
                for i in self.halo[0]..self.halo[0] + self.n[0] {
                    out.push(self.index(i, j, k));
                }
            }
        }
        out
    }

    fn layer(&self, axis: usize, range: std::ops::Range<usize>) -> Vec<usize> {
        let mut ranges = [0..self.shape[0], 0..self.shape[1], 0..self.shape[2]];
        ranges[axis] = range;
        let mut out = Vec::new();
        for k in ranges[2].clone() {
            for j in ranges[1].clone() {
                for i in ranges[0].clone() {
                    out.push(self.index(i, j, k));
                }
            }
        }
        out
    }

    /// Refreshes the halo of a slot-major buffer (`nslots` fields of
    /// `len()` values) from the neighbouring ranks. Axes are swept in order
    /// over the full extent of the others, which also fills the corners.
    pub fn exchange_halo(
        &self,
        buf: &mut [Float],
        nslots: usize,
        channel: &mut dyn HaloChannel,
    ) -> Result<()> {
        let len = self.len();
        for axis in 0..self.dim {
            let h = self.halo[axis];
            if h == 0 {
                continue;
            }
            let n = self.n[axis];
            let send_nodes = [self.layer(axis, h..2 * h), self.layer(axis, n..n + h)];
            let recv_nodes = [self.layer(axis, 0..h), self.layer(axis, n + h..n + 2 * h)];

            let mut outgoing = HaloLayers::default();
            for side in Side::BOTH {
                if self.topology.neighbor(self.rank, axis, side).is_none() {
                    continue;
                }
                let nodes = &send_nodes[side as usize];
                let mut layer = Vec::with_capacity(nodes.len() * nslots);
                for slot in 0..nslots {
                    layer.extend(nodes.iter().map(|&idx| buf[slot * len + idx]));
                }
                outgoing.set(side, layer);
            }

            let incoming = channel.exchange(axis, outgoing)?;
            for side in Side::BOTH {
                if self.topology.neighbor(self.rank, axis, side).is_none() {
                    continue;
                }
                let nodes = &recv_nodes[side as usize];
                let expected = nodes.len() * nslots;
                let layer = incoming.get(side).ok_or_else(|| {
                    LbmError::Channel(format!("no layer received on axis {axis} ({side:?})"))
                })?;
                if layer.len() != expected {
                    return Err(LbmError::HaloMismatch { expected, got: layer.len() });
                }
                for slot in 0..nslots {
                    for (&idx, &value) in nodes.iter().zip(&layer[slot * nodes.len()..]) {
                        buf[slot * len + idx] = value;
                    }
                }
            }
        }
        debug!("rank {}: halo refreshed", self.rank);
        Ok(())
    }
}
