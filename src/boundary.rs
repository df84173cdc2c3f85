//! Interface-fitted reflection at domain and obstacle edges (Bouzidi).
//!
//! A link joins a fluid node `b` to the solid node `g = b - v_j` that feeds
//! slot `j` of `b` during the gather transport. The fraction `q` of the
//! link between `b` and the wall is found once, by intersecting the segment
//! with the geometry. Every step the reflected value is written into `g`
//! so that the ordinary transport pulls it into `b`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::BoundaryConfig;
use crate::domain::{Domain, NodeTag};
use crate::error::{LbmError, Result};
use crate::scheme::Scheme;
use crate::stencil::Stencil;
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMethod {
    /// No-penetration wall; with a value, a moving wall.
    BounceBack,
    /// Dirichlet condition on the even moments.
    AntiBounceBack,
    /// Zero gradient across the wall.
    Neumann,
}

impl BoundaryMethod {
    fn sign(self) -> Float {
        match self {
            BoundaryMethod::BounceBack => 1.0,
            BoundaryMethod::AntiBounceBack => -1.0,
            BoundaryMethod::Neumann => 0.0,
        }
    }
}

/// Writes target moments at a wall point: `(x, t, moments)`. `moments` is
/// the packed moment vector of the boundary node and the callback only
/// overwrites the slots it prescribes.
pub type ValueFn = dyn Fn(&[Float; 3], Float, &mut [Float]) + Send + Sync;

#[derive(Clone)]
pub struct BoundaryValue(Arc<ValueFn>);

impl BoundaryValue {
    pub fn new(f: impl Fn(&[Float; 3], Float, &mut [Float]) + Send + Sync + 'static) -> Self {
        BoundaryValue(Arc::new(f))
    }

    fn eval(&self, x: &[Float; 3], t: Float, moments: &mut [Float]) {
        (self.0)(x, t, moments)
    }
}

impl fmt::Debug for BoundaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoundaryValue(..)")
    }
}

#[derive(Debug, Clone)]
struct Link {
    scheme: usize,
    /// Local velocity index pulled into `node` from `ghost`.
    j: usize,
    /// Local index of the reversed velocity.
    k: usize,
    node: usize,
    ghost: usize,
    /// Next fluid node away from the wall, or `node` itself.
    inner: usize,
    q: Float,
    method: BoundaryMethod,
    label: i32,
    /// Intersection point on the wall.
    wall: [Float; 3],
}

/// Links of one rank, computed once from the fixed geometry.
#[derive(Debug, Clone)]
pub struct Boundary {
    links: Vec<Link>,
    values: BTreeMap<i32, BoundaryValue>,
    nv_ptr: Vec<usize>,
    len: usize,
}

impl Boundary {
    pub fn new(
        domain: &Domain,
        stencil: &Stencil,
        conditions: &BTreeMap<i32, BoundaryConfig>,
    ) -> Result<Self> {
        let mut links = Vec::new();
        let mut degenerate = 0usize;

        for node in domain.interior_indices() {
            if !domain.tags[node].is_fluid() {
                continue;
            }
            let p = domain.coords(node);
            for (scheme, velocities) in stencil.velocities.iter().enumerate() {
                for (j, v) in velocities.iter().enumerate() {
                    let Some(ghost) = domain.shift(node, v.reversed()) else {
                        continue;
                    };
                    if domain.tags[ghost] != NodeTag::Solid {
                        continue;
                    }

                    let step = domain.coords(ghost) - p;
                    let (q, label) = match domain.geometry.first_wall(&p, &step) {
                        Some(hit) => hit,
                        None => {
                            // tangential or round-off miss: plain node bounce-back
                            degenerate += 1;
                            match domain.geometry.classify(&domain.coords(ghost)) {
                                Some(label) => (0.0, label),
                                None => continue,
                            }
                        }
                    };

                    let method = conditions
                        .get(&label)
                        .and_then(|bc| bc.method.get(&scheme))
                        .copied()
                        .ok_or(LbmError::UnlabeledBoundary { label, scheme })?;
                    let k = match method {
                        BoundaryMethod::Neumann => j,
                        _ => stencil.opposite[scheme][j].ok_or_else(|| {
                            LbmError::config(format!(
                                "label {label}: scheme {scheme} has no velocity opposite to {}",
                                v.num
                            ))
                        })?,
                    };
                    let inner = domain
                        .shift(node, v.v)
                        .filter(|&n| domain.tags[n].is_fluid())
                        .unwrap_or(node);
                    let w = p + step * q;

                    links.push(Link {
                        scheme,
                        j,
                        k,
                        node,
                        ghost,
                        inner,
                        q,
                        method,
                        label,
                        wall: [w.x, w.y, w.z],
                    });
                }
            }
        }

        if degenerate > 0 {
            warn!("{degenerate} boundary link(s) without a wall intersection fall back to q = 0");
        }
        info!("rank {}: {} boundary link(s)", domain.rank, links.len());

        let values = conditions
            .iter()
            .filter_map(|(label, bc)| bc.value.clone().map(|v| (*label, v)))
            .collect();
        Ok(Self { links, values, nv_ptr: stencil.nv_ptr.clone(), len: domain.len() })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Writes the reflected distributions into the ghost nodes of every
    /// link. `f` and `m` are slot-major buffers over grid+halo.
    pub fn apply(&self, scheme: &Scheme, f: &mut [Float], m: &[Float], t: Float) {
        let len = self.len;
        let mut moments = vec![0.0; scheme.nv_total()];
        for link in &self.links {
            let base = self.nv_ptr[link.scheme];
            let fj = |node: usize| f[(base + link.j) * len + node];
            let fk = |node: usize| f[(base + link.k) * len + node];

            let value = match link.method {
                BoundaryMethod::Neumann => fj(link.node),
                method => {
                    let sigma = method.sign();
                    let two_q = 2.0 * link.q;
                    let rhs = self.source(link, scheme, m, t, &mut moments);
                    if link.q < 0.5 {
                        sigma * (two_q * fk(link.node) + (1.0 - two_q) * fk(link.inner)) + rhs
                    } else {
                        let reflected = (sigma * fk(link.node) + rhs) / two_q;
                        reflected + (two_q - 1.0) / two_q * fj(link.node)
                    }
                }
            };
            f[(base + link.j) * len + link.ghost] = value;
        }
    }

    /// Contribution of the prescribed wall value, zero without a callback.
    fn source(
        &self,
        link: &Link,
        scheme: &Scheme,
        m: &[Float],
        t: Float,
        moments: &mut [Float],
    ) -> Float {
        let Some(value) = self.values.get(&link.label) else {
            return 0.0;
        };
        for (slot, v) in moments.iter_mut().enumerate() {
            *v = m[slot * self.len + link.node];
        }
        value.eval(&link.wall, t, moments);
        let feq = scheme.feq(link.scheme, moments);
        match link.method {
            BoundaryMethod::BounceBack => feq[link.j] - feq[link.k],
            BoundaryMethod::AntiBounceBack => feq[link.j] + feq[link.k],
            BoundaryMethod::Neumann => 0.0,
        }
    }

    /// `(node, ghost, q)` of every link, in construction order.
    pub fn links(&self) -> impl Iterator<Item = (usize, usize, Float)> + '_ {
        self.links.iter().map(|l| (l.node, l.ghost, l.q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemeConfig;
    use crate::geometry::{Element, Geometry, Shape, PERIODIC};
    use crate::kernel::NumericCompiler;
    use crate::partition::Topology;
    use crate::stencil::StencilSpec;
    use crate::symbolic::Expr;
    use approx::assert_abs_diff_eq;

    fn d1q2() -> Stencil {
        Stencil::new(&[StencilSpec { dim: 1, velocities: vec![1, 2] }]).unwrap()
    }

    /// `u` conserved, second moment relaxing to 0: `feq = [u/2, u/2]`.
    fn d1q2_scheme() -> Scheme {
        let cfg = SchemeConfig::new(
            vec![1, 2],
            vec![Expr::constant(1.0), Expr::la() * Expr::x()],
            vec![0.0, 1.0],
            vec![Expr::symbol("u"), Expr::constant(0.0)],
        )
        .conserved(&["u"]);
        Scheme::new(d1q2(), &[cfg], 1.0, &BTreeMap::new(), &NumericCompiler).unwrap()
    }

    fn walls(labels: &[i32], dx: Float) -> Domain {
        let g = Geometry::new(&[[0.0, 1.0]], labels, vec![]).unwrap();
        let topo = Topology::serial([false; 3]);
        Domain::build(g, dx, 1, &[[1, 0, 0], [-1, 0, 0]], &topo, 0).unwrap()
    }

    /// Periodic line of ten cells with a solid interval labelled 7.
    fn obstacle(lo: Float, hi: Float) -> Domain {
        let interval = Element::solid(Shape::Interval { lo, hi }, 7);
        let g = Geometry::new(&[[0.0, 1.0]], &[PERIODIC], vec![interval]).unwrap();
        let topo = Topology::serial([true, false, false]);
        Domain::build(g, 0.1, 1, &[[1, 0, 0], [-1, 0, 0]], &topo, 0).unwrap()
    }

    fn uniform(method: BoundaryMethod) -> BTreeMap<i32, BoundaryConfig> {
        BTreeMap::from([(7, BoundaryConfig::uniform(method, 1))])
    }

    fn seeded(len: usize) -> Vec<Float> {
        (0..2 * len).map(|i| 1.0 + 0.1 * i as Float).collect()
    }

    #[test]
    fn test_box_walls_sit_half_way() {
        let domain = walls(&[0], 0.125);
        let bcs = BTreeMap::from([(0, BoundaryConfig::uniform(BoundaryMethod::BounceBack, 1))]);
        let bc = Boundary::new(&domain, &d1q2(), &bcs).unwrap();
        let links: Vec<_> = bc.links().collect();
        let pairs: Vec<(usize, usize)> = links.iter().map(|&(b, g, _)| (b, g)).collect();
        assert_eq!(pairs, vec![(1, 0), (8, 9)]);
        for (_, _, q) in links {
            assert_abs_diff_eq!(q, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_missing_method_is_fatal() {
        let domain = walls(&[3, 4], 0.125);
        let bcs = BTreeMap::from([(3, BoundaryConfig::uniform(BoundaryMethod::BounceBack, 1))]);
        let err = Boundary::new(&domain, &d1q2(), &bcs).unwrap_err();
        assert!(matches!(err, LbmError::UnlabeledBoundary { label: 4, scheme: 0 }));
    }

    #[test]
    fn test_reflection_needs_opposite_velocity() {
        // +1 and +2 have no reversed partner
        let stencil = Stencil::new(&[StencilSpec { dim: 1, velocities: vec![1, 3] }]).unwrap();
        let g = Geometry::new(&[[0.0, 1.0]], &[0], vec![]).unwrap();
        let topo = Topology::serial([false; 3]);
        let domain = Domain::build(g, 0.125, 2, &stencil.unique_velocities(), &topo, 0).unwrap();
        let bcs = BTreeMap::from([(0, BoundaryConfig::uniform(BoundaryMethod::AntiBounceBack, 1))]);
        let err = Boundary::new(&domain, &stencil, &bcs).unwrap_err();
        assert!(matches!(err, LbmError::Config(_)));

        let neumann = BTreeMap::from([(0, BoundaryConfig::uniform(BoundaryMethod::Neumann, 1))]);
        assert!(Boundary::new(&domain, &stencil, &neumann).is_ok());
    }

    #[test]
    fn test_obstacle_fractions() {
        let bcs = uniform(BoundaryMethod::BounceBack);

        // walls at 0.3 and 0.6, half way between nodes
        let domain = obstacle(0.3, 0.6);
        let bc = Boundary::new(&domain, &d1q2(), &bcs).unwrap();
        assert_eq!(bc.len(), 2);
        for (_, _, q) in bc.links() {
            assert_abs_diff_eq!(q, 0.5, epsilon = 1e-9);
        }

        // wall at 0.33 seen from the node at 0.25
        let domain = obstacle(0.33, 0.6);
        let bc = Boundary::new(&domain, &d1q2(), &bcs).unwrap();
        let (node, ghost, q) = bc.links().next().unwrap();
        assert_abs_diff_eq!(domain.coords(node).x, 0.25, epsilon = 1e-12);
        assert_eq!(ghost, node + 1);
        assert_abs_diff_eq!(q, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_obstacle_across_periodic_edge() {
        let domain = obstacle(-0.13, 0.22);
        // cells at 0.05, 0.15 and 0.95 lie in the wall
        let solid: Vec<usize> = domain
            .interior_indices()
            .into_iter()
            .filter(|&x| domain.tags[x] == NodeTag::Solid)
            .collect();
        assert_eq!(solid, vec![1, 2, 10]);

        let bc = Boundary::new(&domain, &d1q2(), &uniform(BoundaryMethod::BounceBack)).unwrap();
        let links: Vec<_> = bc.links().collect();
        assert_eq!(links.len(), 2);
        // 0.25 -> 0.15 meets the wall at 0.22
        assert_eq!((links[0].0, links[0].1), (3, 2));
        assert_abs_diff_eq!(links[0].2, 0.3, epsilon = 1e-9);
        // 0.85 -> 0.95 meets the copy of -0.13 at 0.87
        assert_eq!((links[1].0, links[1].1), (9, 10));
        assert_abs_diff_eq!(links[1].2, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_bounce_back_on_both_sides_of_half_way() {
        let domain = obstacle(0.33, 0.63);
        let len = domain.len();
        assert_eq!(len, 12);
        let bc = Boundary::new(&domain, &d1q2(), &uniform(BoundaryMethod::BounceBack)).unwrap();
        let links: Vec<_> = bc.links().collect();
        let pairs: Vec<(usize, usize)> = links.iter().map(|&(b, g, _)| (b, g)).collect();
        assert_eq!(pairs, vec![(3, 4), (7, 6)]);
        let (far, near) = (links[0].2, links[1].2);
        assert_abs_diff_eq!(far, 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(near, 0.2, epsilon = 1e-9);

        let mut f = seeded(len);
        let before = f.clone();
        bc.apply(&d1q2_scheme(), &mut f, &vec![0.0; 2 * len], 0.0);

        // slot 1 (v = -1) of node 3 comes from 4; its reverse is slot 0
        let expected = before[3] / (2.0 * far) + (2.0 * far - 1.0) / (2.0 * far) * before[len + 3];
        assert_abs_diff_eq!(f[len + 4], expected, epsilon = 1e-12);
        // slot 0 (v = +1) of node 7 comes from 6, interpolated towards node 8
        let expected = 2.0 * near * before[len + 7] + (1.0 - 2.0 * near) * before[len + 8];
        assert_abs_diff_eq!(f[6], expected, epsilon = 1e-12);

        for (i, (a, b)) in f.iter().zip(&before).enumerate() {
            if i != len + 4 && i != 6 {
                assert_eq!(a, b, "slot entry {i}");
            }
        }
    }

    #[test]
    fn test_anti_bounce_back_adds_wall_equilibrium() {
        let domain = obstacle(0.33, 0.63);
        let len = domain.len();
        let wall =
            BoundaryValue::new(|x: &[Float; 3], _t: Float, m: &mut [Float]| m[0] = 10.0 * x[0]);
        let bcs = BTreeMap::from([(
            7,
            BoundaryConfig::uniform(BoundaryMethod::AntiBounceBack, 1).with_value(wall),
        )]);
        let bc = Boundary::new(&domain, &d1q2(), &bcs).unwrap();
        let q: Vec<Float> = bc.links().map(|(_, _, q)| q).collect();

        let mut f = seeded(len);
        let before = f.clone();
        bc.apply(&d1q2_scheme(), &mut f, &vec![0.0; 2 * len], 0.0);

        // feq_j + feq_k = u = 10 x at the wall point
        let two_q = 2.0 * q[0];
        let expected = (-before[3] + 3.3) / two_q + (two_q - 1.0) / two_q * before[len + 3];
        assert_abs_diff_eq!(f[len + 4], expected, epsilon = 1e-9);
        let two_q = 2.0 * q[1];
        let expected = -(two_q * before[len + 7] + (1.0 - two_q) * before[len + 8]) + 6.3;
        assert_abs_diff_eq!(f[6], expected, epsilon = 1e-9);
    }

    #[test]
    fn test_missed_wall_falls_back_to_node_bounce_back() {
        let mut domain = obstacle(0.33, 0.63);
        let len = domain.len();
        // 0.35 lies inside the interval; tagged fluid, its search towards
        // 0.45 never crosses the surface
        domain.tags[4] = NodeTag::Fluid;
        let bc = Boundary::new(&domain, &d1q2(), &uniform(BoundaryMethod::BounceBack)).unwrap();
        let links: Vec<_> = bc.links().collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], (4, 5, 0.0));

        let mut f = seeded(len);
        let before = f.clone();
        bc.apply(&d1q2_scheme(), &mut f, &vec![0.0; 2 * len], 0.0);
        // q = 0: the reversed value of the next node in is sent straight back
        assert_eq!(f[len + 5], before[3]);
    }
}
