use std::sync::Arc;

use log::{debug, info};

use crate::boundary::Boundary;
use crate::config::{Config, InitFn, InitType, Initializer};
use crate::domain::Domain;
use crate::error::{LbmError, Result};
use crate::kernel::{KernelCompiler, NumericCompiler};
use crate::partition::{HaloChannel, MeshChannel};
use crate::scheme::Scheme;
use crate::stencil::{Stencil, StencilSpec};
use crate::symbolic::{coordinate_resolver, CompiledExpr};
use crate::Float;

/// Initializer ready to evaluate at node coordinates.
enum NodeInit {
    Constant(Float),
    Expr(CompiledExpr),
    Function(Arc<InitFn>),
}

impl NodeInit {
    fn eval(&self, x: &[Float; 3]) -> Float {
        match self {
            NodeInit::Constant(v) => *v,
            NodeInit::Expr(e) => e.eval(x),
            NodeInit::Function(f) => f(x),
        }
    }
}

/// One rank's running simulation: the schemes, the local grid, the wall
/// links and the `m`/`F` buffers.
pub struct Simulation {
    config: Config,
    scheme: Scheme,
    domain: Domain,
    boundary: Boundary,
    channel: Box<dyn HaloChannel>,
    f: Vec<Float>,
    m: Vec<Float>,
    scratch: Vec<Float>,
    /// Interior fluid nodes, where the collision runs.
    fluid: Vec<usize>,
    t: Float,
    nt: usize,
    dt: Float,
}

impl Simulation {
    /// Single-process run.
    pub fn new(config: Config) -> Result<Self> {
        let periodic = config.build_geometry()?.periodic;
        Self::with_channel(config, Box::new(MeshChannel::serial(periodic)))
    }

    /// One rank of a process group connected through `channel`.
    pub fn with_channel(config: Config, channel: Box<dyn HaloChannel>) -> Result<Self> {
        Self::build(config, channel, &NumericCompiler)
    }

    pub fn build(
        config: Config,
        channel: Box<dyn HaloChannel>,
        compiler: &dyn KernelCompiler,
    ) -> Result<Self> {
        config.validate()?;
        let dim = config.dim();

        let specs: Vec<StencilSpec> = config
            .schemes
            .iter()
            .map(|s| StencilSpec { dim: s.dim.unwrap_or(dim), velocities: s.velocities.clone() })
            .collect();
        let stencil = Stencil::new(&specs)?;
        if stencil.dim != dim {
            return Err(LbmError::DimensionMismatch { domain: dim, scheme: stencil.dim });
        }
        let velocities = stencil.unique_velocities();
        let halo = stencil.halo();

        let scheme = Scheme::new(
            stencil,
            &config.schemes,
            config.scheme_velocity,
            &config.parameters,
            compiler,
        )?;
        let inits = Self::compile_inits(&config)?;

        let geometry = config.build_geometry()?;
        let domain = Domain::build(
            geometry,
            config.space_step,
            halo,
            &velocities,
            channel.topology(),
            channel.rank(),
        )?;
        let boundary = Boundary::new(&domain, &scheme.stencil, &config.boundary_conditions)?;

        let nv = scheme.nv_total();
        let len = domain.len();
        let fluid: Vec<usize> = domain
            .interior_indices()
            .into_iter()
            .filter(|&x| domain.tags[x].is_fluid())
            .collect();
        let dt = config.dt();
        info!(
            "rank {}: {} slot(s) over {} nodes, dt = {dt}",
            channel.rank(),
            nv,
            len
        );

        let mut sim = Self {
            config,
            scheme,
            domain,
            boundary,
            channel,
            f: vec![0.0; nv * len],
            m: vec![0.0; nv * len],
            scratch: vec![0.0; nv * len],
            fluid,
            t: 0.0,
            nt: 0,
            dt,
        };
        sim.initialize(&inits);
        Ok(sim)
    }

    /// Initializers per packed slot.
    fn compile_inits(config: &Config) -> Result<Vec<(usize, NodeInit)>> {
        let resolve = coordinate_resolver(config.scheme_velocity, &config.parameters);
        let mut out = Vec::new();
        let mut base = 0;
        for scheme in &config.schemes {
            for (&index, init) in &scheme.init {
                let init = match init {
                    Initializer::Constant(v) => NodeInit::Constant(*v),
                    Initializer::Expr(e) => NodeInit::Expr(e.compile(&resolve)?),
                    Initializer::Function(f) => NodeInit::Function(f.clone()),
                };
                out.push((base + index, init));
            }
            base += scheme.velocities.len();
        }
        Ok(out)
    }

    fn initialize(&mut self, inits: &[(usize, NodeInit)]) {
        let len = self.domain.len();
        let nodes: Vec<usize> = (0..len).filter(|&x| self.domain.tags[x].is_fluid()).collect();
        let mut given = vec![false; self.scheme.nv_total()];
        let target = match self.config.init_type {
            InitType::Moments => &mut self.m,
            InitType::Distributions => &mut self.f,
        };
        for (slot, init) in inits {
            given[*slot] = true;
            for &x in &nodes {
                let c = self.domain.coords(x);
                target[slot * len + x] = init.eval(&[c.x, c.y, c.z]);
            }
        }
        match self.config.init_type {
            InitType::Moments => {
                self.scheme.equilibrium(&mut self.m, &nodes, &given);
                self.scheme.m2f(&self.m, &mut self.f, &nodes);
            }
            InitType::Distributions => self.scheme.f2m(&self.f, &mut self.m, &nodes),
        }
        debug!("initialized {} node(s) from {:?}", nodes.len(), self.config.init_type);
    }

    /// Halo exchange, wall reflection, transport, then collision in moment
    /// space; advances the clock by `dt`.
    pub fn advance_one_step(&mut self) -> Result<()> {
        let nv = self.scheme.nv_total();
        self.domain.exchange_halo(&mut self.f, nv, self.channel.as_mut())?;
        self.scheme.set_boundary_conditions(&self.boundary, &mut self.f, &self.m, self.t);
        self.scheme.transport(&mut self.f, &mut self.scratch, &self.domain);
        self.scheme.f2m(&self.f, &mut self.m, &self.fluid);
        self.scheme.relaxation(&mut self.m, &self.fluid);
        self.scheme.m2f(&self.m, &mut self.f, &self.fluid);
        self.nt += 1;
        self.t = self.nt as Float * self.dt;
        Ok(())
    }

    /// Steps until `t` reaches `t_final` (to within half a step).
    pub fn run_until(&mut self, t_final: Float) -> Result<usize> {
        let start = self.nt;
        while self.t < t_final - 0.5 * self.dt {
            self.advance_one_step()?;
        }
        Ok(self.nt - start)
    }

    fn slot(&self, k: usize, j: usize) -> std::ops::Range<usize> {
        let len = self.domain.len();
        let s = self.scheme.stencil.nv_ptr[k] + j;
        s * len..(s + 1) * len
    }

    /// Moment `j` of sub-scheme `k` over grid+halo, x fastest.
    pub fn m(&self, k: usize, j: usize) -> &[Float] {
        &self.m[self.slot(k, j)]
    }

    pub fn m_mut(&mut self, k: usize, j: usize) -> &mut [Float] {
        let r = self.slot(k, j);
        &mut self.m[r]
    }

    /// Distribution `j` of sub-scheme `k` over grid+halo, x fastest.
    pub fn f(&self, k: usize, j: usize) -> &[Float] {
        &self.f[self.slot(k, j)]
    }

    pub fn f_mut(&mut self, k: usize, j: usize) -> &mut [Float] {
        let r = self.slot(k, j);
        &mut self.f[r]
    }

    /// Recomputes `F` from `m` on the interior fluid nodes, after editing
    /// moments by hand.
    pub fn sync_distributions(&mut self) {
        self.scheme.m2f(&self.m, &mut self.f, &self.fluid);
    }

    pub fn t(&self) -> Float {
        self.t
    }

    pub fn nt(&self) -> usize {
        self.nt
    }

    pub fn dt(&self) -> Float {
        self.dt
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Nodes owned by this rank; use these to skip the halo.
    pub fn interior_indices(&self) -> Vec<usize> {
        self.domain.interior_indices()
    }
}
