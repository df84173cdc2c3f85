//! Cartesian process tiling and the halo-exchange channel.
//!
//! The global box is split into a near-balanced grid of sub-boxes, one per
//! rank. Each step every rank swaps its boundary layers with its neighbours
//! through a [`HaloChannel`]; the exchange is a blocking collective.

use std::sync::mpsc::{channel, Receiver, Sender};

use log::debug;

use crate::error::{LbmError, Result};
use crate::Float;

/// Side of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower = 0,
    Upper = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Lower, Side::Upper];

    pub fn opposite(self) -> Side {
        match self {
            Side::Lower => Side::Upper,
            Side::Upper => Side::Lower,
        }
    }
}

/// Factors `size` into `dim` per-axis counts, as balanced as possible and
/// non-increasing (the `MPI_Dims_create` convention).
pub fn balanced_dims(size: usize, dim: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut n = size.max(1);
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.sort_unstable_by(|a, b| b.cmp(a));

    let mut dims = vec![1usize; dim];
    for f in factors {
        // give the next factor to the axis with the fewest ranks so far
        if let Some(slot) = dims.iter_mut().min_by_key(|d| **d) {
            *slot *= f;
        }
    }
    dims.sort_unstable_by(|a, b| b.cmp(a));
    dims
}

/// Cartesian arrangement of a process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub size: usize,
    /// Ranks per axis (1 on unused axes).
    pub dims: [usize; 3],
    pub periodic: [bool; 3],
}

impl Topology {
    pub fn new(size: usize, dim: usize, periodic: [bool; 3]) -> Result<Self> {
        if size == 0 {
            return Err(LbmError::config("process group must not be empty"));
        }
        if !(1..=3).contains(&dim) {
            return Err(LbmError::config(format!("unsupported dimension {dim}")));
        }
        let mut dims = [1usize; 3];
        dims[..dim].copy_from_slice(&balanced_dims(size, dim));
        debug!("topology: {size} ranks as {dims:?}");
        Ok(Self { size, dims, periodic })
    }

    /// Single rank.
    pub fn serial(periodic: [bool; 3]) -> Self {
        Self { size: 1, dims: [1, 1, 1], periodic }
    }

    /// Grid coordinates of `rank`, x fastest.
    pub fn coords(&self, rank: usize) -> [usize; 3] {
        [
            rank % self.dims[0],
            (rank / self.dims[0]) % self.dims[1],
            rank / (self.dims[0] * self.dims[1]),
        ]
    }

    pub fn rank_of(&self, coords: [usize; 3]) -> usize {
        coords[0] + self.dims[0] * (coords[1] + self.dims[1] * coords[2])
    }

    /// Rank adjacent to `rank` on `side` of `axis`, if any.
    pub fn neighbor(&self, rank: usize, axis: usize, side: Side) -> Option<usize> {
        let mut c = self.coords(rank);
        let n = self.dims[axis];
        match side {
            Side::Lower if c[axis] > 0 => c[axis] -= 1,
            Side::Lower if self.periodic[axis] => c[axis] = n - 1,
            Side::Upper if c[axis] + 1 < n => c[axis] += 1,
            Side::Upper if self.periodic[axis] => c[axis] = 0,
            _ => return None,
        }
        Some(self.rank_of(c))
    }
}

/// Boundary layers travelling in one direction along an axis. `None` on a
/// side without a neighbour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaloLayers {
    pub lower: Option<Vec<Float>>,
    pub upper: Option<Vec<Float>>,
}

impl HaloLayers {
    pub fn get(&self, side: Side) -> Option<&Vec<Float>> {
        match side {
            Side::Lower => self.lower.as_ref(),
            Side::Upper => self.upper.as_ref(),
        }
    }

    pub fn set(&mut self, side: Side, layer: Vec<Float>) {
        match side {
            Side::Lower => self.lower = Some(layer),
            Side::Upper => self.upper = Some(layer),
        }
    }
}

/// Message-passing seam for the per-step halo exchange.
///
/// `exchange` sends `outgoing.lower` to the lower neighbour along `axis` and
/// `outgoing.upper` to the upper one, and returns what those neighbours sent
/// back. It blocks until both layers have arrived.
pub trait HaloChannel: Send {
    fn rank(&self) -> usize;
    fn topology(&self) -> &Topology;
    fn exchange(&mut self, axis: usize, outgoing: HaloLayers) -> Result<HaloLayers>;
}

type Link = [[Option<Sender<Vec<Float>>>; 2]; 3];
type Inbox = [[Option<Receiver<Vec<Float>>>; 2]; 3];

/// In-process channel wired with `std::sync::mpsc`; one endpoint per rank.
pub struct MeshChannel {
    rank: usize,
    topology: Topology,
    send: Link,
    recv: Inbox,
}

impl MeshChannel {
    fn lost_peer(&self, axis: usize) -> LbmError {
        LbmError::Channel(format!("rank {} lost its peer on axis {axis}", self.rank))
    }

    /// Builds one connected endpoint per rank of `topology`.
    pub fn group(topology: &Topology) -> Vec<MeshChannel> {
        let mut endpoints: Vec<MeshChannel> = (0..topology.size)
            .map(|rank| MeshChannel {
                rank,
                topology: topology.clone(),
                send: Default::default(),
                recv: Default::default(),
            })
            .collect();

        for rank in 0..topology.size {
            for axis in 0..3 {
                for side in Side::BOTH {
                    if let Some(peer) = topology.neighbor(rank, axis, side) {
                        let (tx, rx) = channel();
                        endpoints[rank].send[axis][side as usize] = Some(tx);
                        endpoints[peer].recv[axis][side.opposite() as usize] = Some(rx);
                    }
                }
            }
        }
        endpoints
    }

    /// Single-rank endpoint; periodic axes exchange with itself.
    pub fn serial(periodic: [bool; 3]) -> MeshChannel {
        let mut group = Self::group(&Topology::serial(periodic));
        group.remove(0)
    }
}

impl HaloChannel for MeshChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn exchange(&mut self, axis: usize, outgoing: HaloLayers) -> Result<HaloLayers> {
        for side in Side::BOTH {
            if let (Some(tx), Some(layer)) = (&self.send[axis][side as usize], outgoing.get(side)) {
                tx.send(layer.clone()).map_err(|_| self.lost_peer(axis))?;
            }
        }
        let mut incoming = HaloLayers::default();
        for side in Side::BOTH {
            if let Some(rx) = &self.recv[axis][side as usize] {
                let layer = rx.recv().map_err(|_| self.lost_peer(axis))?;
                incoming.set(side, layer);
            }
        }
        Ok(incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_dims() {
        assert_eq!(balanced_dims(1, 2), vec![1, 1]);
        assert_eq!(balanced_dims(4, 2), vec![2, 2]);
        assert_eq!(balanced_dims(6, 2), vec![3, 2]);
        assert_eq!(balanced_dims(12, 3), vec![3, 2, 2]);
        assert_eq!(balanced_dims(7, 2), vec![7, 1]);
        for size in 1..=32 {
            assert_eq!(balanced_dims(size, 3).iter().product::<usize>(), size);
        }
    }

    #[test]
    fn test_neighbors() {
        let topo = Topology::new(4, 2, [true, false, false]).unwrap();
        assert_eq!(topo.dims, [2, 2, 1]);
        // rank 0 sits at (0, 0)
        assert_eq!(topo.neighbor(0, 0, Side::Lower), Some(1));
        assert_eq!(topo.neighbor(0, 0, Side::Upper), Some(1));
        assert_eq!(topo.neighbor(0, 1, Side::Lower), None);
        assert_eq!(topo.neighbor(0, 1, Side::Upper), Some(2));
        for rank in 0..4 {
            assert_eq!(topo.rank_of(topo.coords(rank)), rank);
        }
    }

    #[test]
    fn test_serial_periodic_swaps_layers() {
        let mut ch = MeshChannel::serial([true, false, false]);
        let out = HaloLayers { lower: Some(vec![1.0]), upper: Some(vec![2.0]) };
        let got = ch.exchange(0, out).unwrap();
        // what we sent up comes back from below
        assert_eq!(got.lower, Some(vec![2.0]));
        assert_eq!(got.upper, Some(vec![1.0]));
        let none = ch.exchange(1, HaloLayers::default()).unwrap();
        assert_eq!(none, HaloLayers::default());
    }

    #[test]
    fn test_group_exchange_across_threads() {
        let topo = Topology::new(2, 1, [false, false, false]).unwrap();
        let handles: Vec<_> = MeshChannel::group(&topo)
            .into_iter()
            .map(|mut ch| {
                std::thread::spawn(move || {
                    let r = ch.rank() as Float;
                    let out = HaloLayers { lower: Some(vec![r, -1.0]), upper: Some(vec![r, 1.0]) };
                    ch.exchange(0, out).unwrap()
                })
            })
            .collect();
        let results: Vec<HaloLayers> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].lower, None);
        assert_eq!(results[0].upper, Some(vec![1.0, -1.0]));
        assert_eq!(results[1].lower, Some(vec![0.0, 1.0]));
        assert_eq!(results[1].upper, None);
    }
}
