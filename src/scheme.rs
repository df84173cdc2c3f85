//! Moment/distribution algebra of the packed sub-schemes.
//!
//! Buffers are slot-major: slot `s` of node `x` lives at `s * len + x`, where
//! slot `nv_ptr[k] + j` is velocity (or moment) `j` of sub-scheme `k`.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::DVector;

use crate::boundary::Boundary;
use crate::config::SchemeConfig;
use crate::domain::Domain;
use crate::error::Result;
use crate::kernel::{CompiledKernel, KernelCompiler, SchemeDescriptor};
use crate::stencil::Stencil;
use crate::Float;

#[derive(Debug, Clone)]
pub struct Scheme {
    pub stencil: Stencil,
    /// Lattice speed.
    pub la: Float,
    pub kernel: CompiledKernel,
}

impl Scheme {
    /// Compiles the symbolic descriptor once; nothing symbolic survives.
    pub fn new(
        stencil: Stencil,
        schemes: &[SchemeConfig],
        la: Float,
        parameters: &BTreeMap<String, Float>,
        compiler: &dyn KernelCompiler,
    ) -> Result<Self> {
        let descriptor = SchemeDescriptor { stencil: &stencil, schemes, la, parameters };
        let kernel = compiler.compile(&descriptor)?;
        Ok(Self { stencil, la, kernel })
    }

    pub fn nschemes(&self) -> usize {
        self.stencil.nschemes()
    }

    pub fn nv_total(&self) -> usize {
        self.stencil.nv_total()
    }

    /// Applies one block matrix per sub-scheme at every node of `nodes`.
    fn change_basis(&self, src: &[Float], dst: &mut [Float], nodes: &[usize], inverse: bool) {
        let len = src.len() / self.nv_total();
        for (k, t) in self.kernel.transforms.iter().enumerate() {
            let base = self.stencil.nv_ptr[k];
            let nv = self.stencil.nv[k];
            let matrix = if inverse { &t.inverse } else { &t.matrix };
            for &x in nodes {
                for i in 0..nv {
                    let mut acc = 0.0;
                    for j in 0..nv {
                        acc += matrix[(i, j)] * src[(base + j) * len + x];
                    }
                    dst[(base + i) * len + x] = acc;
                }
            }
        }
    }

    /// `m_k = M_k F_k` at every node of `nodes`.
    pub fn f2m(&self, f: &[Float], m: &mut [Float], nodes: &[usize]) {
        self.change_basis(f, m, nodes, false);
    }

    /// `F_k = M_k^-1 m_k` at every node of `nodes`.
    pub fn m2f(&self, m: &[Float], f: &mut [Float], nodes: &[usize]) {
        self.change_basis(m, f, nodes, true);
    }

    /// Equilibrium of every slot for one node's packed moment vector.
    pub fn equilibrium_at(&self, moments: &[Float]) -> Vec<Float> {
        self.kernel.equilibrium.iter().map(|e| e.eval(moments)).collect()
    }

    /// Equilibrium distributions of sub-scheme `k` for a packed moment vector.
    pub fn feq(&self, k: usize, moments: &[Float]) -> DVector<Float> {
        let base = self.stencil.nv_ptr[k];
        let nv = self.stencil.nv[k];
        let eq = self.kernel.equilibrium[base..base + nv].iter().map(|e| e.eval(moments));
        let eq = DVector::from_iterator(nv, eq);
        &self.kernel.transforms[k].inverse * eq
    }

    /// Overwrites the slots of `m` not listed in `given` with their
    /// equilibrium, evaluated from the listed ones.
    pub fn equilibrium(&self, m: &mut [Float], nodes: &[usize], given: &[bool]) {
        let nv = self.nv_total();
        let len = m.len() / nv;
        let mut local = vec![0.0; nv];
        for &x in nodes {
            for (s, v) in local.iter_mut().enumerate() {
                *v = m[s * len + x];
            }
            // conserved slots first: the others may depend on them
            for s in 0..nv {
                if !given[s] && self.kernel.rates[s] == 0.0 {
                    local[s] = self.kernel.equilibrium[s].eval(&local);
                }
            }
            for s in 0..nv {
                if !given[s] && self.kernel.rates[s] != 0.0 {
                    local[s] = self.kernel.equilibrium[s].eval(&local);
                }
            }
            for (s, v) in local.iter().enumerate() {
                m[s * len + x] = *v;
            }
        }
    }

    /// BGK collision in moment space. The equilibrium is taken from the
    /// pre-relaxation moments of the node; rate-0 slots are left untouched.
    pub fn relaxation(&self, m: &mut [Float], nodes: &[usize]) {
        let nv = self.nv_total();
        let len = m.len() / nv;
        let rates = &self.kernel.rates;
        let mut local = vec![0.0; nv];
        let mut eq = vec![0.0; nv];
        for &x in nodes {
            for (s, v) in local.iter_mut().enumerate() {
                *v = m[s * len + x];
            }
            for (s, e) in eq.iter_mut().enumerate() {
                if rates[s] != 0.0 {
                    *e = self.kernel.equilibrium[s].eval(&local);
                }
            }
            for s in 0..nv {
                if rates[s] != 0.0 {
                    m[s * len + x] = local[s] + rates[s] * (eq[s] - local[s]);
                }
            }
        }
    }

    /// Gather streaming: `F_new[x] = F[x - v]` for every slot. Nodes whose
    /// source falls outside grid+halo keep their value. Buffers are swapped
    /// afterwards so `f` holds the result.
    pub fn transport(&self, f: &mut Vec<Float>, scratch: &mut Vec<Float>, domain: &Domain) {
        let len = domain.len();
        scratch.clone_from(f);
        for (k, velocities) in self.stencil.velocities.iter().enumerate() {
            let base = self.stencil.nv_ptr[k];
            for (j, v) in velocities.iter().enumerate() {
                let offset = (base + j) * len;
                let back = v.reversed();
                for x in 0..len {
                    if let Some(src) = domain.shift(x, back) {
                        scratch[offset + x] = f[offset + src];
                    }
                }
            }
        }
        std::mem::swap(f, scratch);
        debug!("transported {} slot(s)", self.nv_total());
    }

    /// Writes the wall values into the ghost nodes ahead of transport.
    pub fn set_boundary_conditions(
        &self,
        boundary: &Boundary,
        f: &mut [Float],
        m: &[Float],
        t: Float,
    ) {
        boundary.apply(self, f, m, t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, PERIODIC};
    use crate::kernel::NumericCompiler;
    use crate::partition::Topology;
    use crate::stencil::StencilSpec;
    use crate::symbolic::Expr;
    use approx::assert_abs_diff_eq;

    fn d1q2(rates: [Float; 2], eq1: Expr) -> Scheme {
        let stencil = Stencil::new(&[StencilSpec { dim: 1, velocities: vec![1, 2] }]).unwrap();
        let cfg = SchemeConfig::new(
            vec![1, 2],
            vec![Expr::constant(1.0), Expr::la() * Expr::x()],
            rates.to_vec(),
            vec![Expr::symbol("u"), eq1],
        )
        .conserved(&["u"]);
        Scheme::new(stencil, &[cfg], 1.0, &BTreeMap::new(), &NumericCompiler).unwrap()
    }

    fn d2q9() -> Scheme {
        let stencil = Stencil::new(&[StencilSpec { dim: 2, velocities: (0..9).collect() }])
            .unwrap();
        let x = Expr::x;
        let y = Expr::y;
        let r2 = || x() * x() + y() * y();
        let polys = vec![
            Expr::constant(1.0),
            Expr::la() * x(),
            Expr::la() * y(),
            3.0 * r2() - 4.0,
            0.5 * (9.0 * r2() * r2() - 21.0 * r2() + 8.0),
            3.0 * x() * r2() - 5.0 * x(),
            3.0 * y() * r2() - 5.0 * y(),
            x() * x() - y() * y(),
            x() * y(),
        ];
        let rho = || Expr::symbol("rho");
        let qx = || Expr::symbol("qx");
        let qy = || Expr::symbol("qy");
        let eq = vec![
            rho(),
            qx(),
            qy(),
            -2.0 * rho() + 3.0 * (qx() * qx() + qy() * qy()),
            rho() - 3.0 * (qx() * qx() + qy() * qy()),
            -qx(),
            -qy(),
            qx() * qx() - qy() * qy(),
            qx() * qy(),
        ];
        let rates = vec![0.0, 0.0, 0.0, 1.1, 1.1, 1.1, 1.1, 1.8, 1.8];
        let cfg = SchemeConfig::new((0..9).collect(), polys, rates, eq)
            .conserved(&["rho", "qx", "qy"]);
        Scheme::new(stencil, &[cfg], 1.0, &BTreeMap::new(), &NumericCompiler).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let scheme = d2q9();
        let len = 5;
        let nodes: Vec<usize> = (0..len).collect();
        let f: Vec<Float> = (0..9 * len).map(|i| ((i * 37 % 11) as Float) * 0.1 - 0.3).collect();
        let mut m = vec![0.0; f.len()];
        let mut back = vec![0.0; f.len()];
        scheme.f2m(&f, &mut m, &nodes);
        scheme.m2f(&m, &mut back, &nodes);
        for (a, b) in f.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        let mut again = vec![0.0; f.len()];
        scheme.f2m(&back, &mut again, &nodes);
        for (a, b) in m.iter().zip(&again) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_conserved_moments_untouched() {
        let scheme = d2q9();
        let mut m: Vec<Float> = (0..9).map(|i| 0.3 + i as Float).collect();
        let before = m.clone();
        scheme.relaxation(&mut m, &[0]);
        assert_eq!(&m[..3], &before[..3]);
        assert_ne!(m[3], before[3]);
    }

    #[test]
    fn test_equilibrium_is_fixed_point() {
        let scheme = d1q2([1.0, 1.0], 0.5 * Expr::symbol("u"));
        // moments [u, eq(u)] at two nodes
        let mut m = vec![2.0, -1.0, 1.0, -0.5];
        let before = m.clone();
        scheme.relaxation(&mut m, &[0, 1]);
        assert_eq!(m, before);
    }

    #[test]
    fn test_equilibrium_uses_pre_relaxation_moments() {
        // eq of slot 1 reads slot 1 itself
        let scheme = d1q2([0.0, 1.5], 2.0 * Expr::moment(0, 1));
        let mut m = vec![1.0, 4.0];
        scheme.relaxation(&mut m, &[0]);
        // 4 + 1.5 * (8 - 4)
        assert_eq!(m, vec![1.0, 10.0]);
    }

    #[test]
    fn test_fill_equilibrium() {
        let scheme = d2q9();
        let mut m = vec![0.0; 9];
        m[0] = 1.0;
        m[1] = 0.1;
        let mut given = vec![false; 9];
        given[..3].fill(true);
        scheme.equilibrium(&mut m, &[0], &given);
        assert_abs_diff_eq!(m[3], -2.0 + 0.03, epsilon = 1e-14);
        assert_abs_diff_eq!(m[5], -0.1, epsilon = 1e-14);
        let feq = scheme.feq(0, &m);
        assert_abs_diff_eq!(feq.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_periodic_transport_impulse() {
        let scheme = d1q2([0.0, 0.0], Expr::constant(0.0));
        let g = Geometry::new(&[[0.0, 1.0]], &[PERIODIC], vec![]).unwrap();
        let topo = Topology::serial([true, false, false]);
        let domain = Domain::build(g, 0.25, 1, &[[1, 0, 0], [-1, 0, 0]], &topo, 0).unwrap();
        let len = domain.len();
        let mut f = vec![0.0; 2 * len];
        let mut scratch = Vec::new();
        f[2] = 1.0;
        scheme.transport(&mut f, &mut scratch, &domain);
        assert_eq!(f[3], 1.0);
        assert_eq!(f[2], 0.0);
        assert_eq!(scratch.len(), f.len());
    }
}
