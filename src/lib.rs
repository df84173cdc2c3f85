pub mod boundary;
pub mod config;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod kernel;
pub mod partition;
pub mod scheme;
pub mod simulation;
pub mod stencil;
pub mod symbolic;

pub use boundary::{Boundary, BoundaryMethod, BoundaryValue};
pub use config::{BoundaryConfig, Config, GeometryConfig, InitType, Initializer, SchemeConfig};
pub use domain::{Domain, NodeTag};
pub use error::{LbmError, Result};
pub use geometry::{Element, Geometry, Shape, PERIODIC};
pub use kernel::{CompiledKernel, KernelCompiler, NumericCompiler, SchemeDescriptor};
pub use partition::{HaloChannel, MeshChannel, Topology};
pub use scheme::Scheme;
pub use simulation::Simulation;
pub use stencil::{Stencil, StencilSpec, Velocity};
pub use symbolic::Expr;

pub type Float = f64;
