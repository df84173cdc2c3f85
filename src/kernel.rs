//! Compilation of a symbolic scheme descriptor into numeric kernels.
//!
//! This is the only place polynomial bases and equilibria are looked at
//! symbolically. The output, a [`CompiledKernel`], is plain matrices and
//! [`CompiledExpr`] trees over the packed moment vector of a node.

use std::collections::BTreeMap;

use log::{debug, info};
use nalgebra::DMatrix;

use crate::config::SchemeConfig;
use crate::error::{LbmError, Result};
use crate::stencil::Stencil;
use crate::symbolic::{coordinate_resolver, CompiledExpr, Expr, Leaf};
use crate::Float;

/// Everything the compiler needs to know about the schemes.
#[derive(Debug, Clone, Copy)]
pub struct SchemeDescriptor<'a> {
    pub stencil: &'a Stencil,
    pub schemes: &'a [SchemeConfig],
    pub la: Float,
    pub parameters: &'a BTreeMap<String, Float>,
}

/// Change of basis of one sub-scheme: `m = matrix * f`, `f = inverse * m`.
#[derive(Debug, Clone)]
pub struct Transform {
    pub matrix: DMatrix<Float>,
    pub inverse: DMatrix<Float>,
}

#[derive(Debug, Clone)]
pub struct CompiledKernel {
    pub transforms: Vec<Transform>,
    /// Equilibrium of every packed moment slot, as a function of the packed
    /// moment vector of a node.
    pub equilibrium: Vec<CompiledExpr>,
    /// Relaxation rate of every packed moment slot.
    pub rates: Vec<Float>,
}

/// Turns a descriptor into callable numeric routines.
pub trait KernelCompiler {
    fn compile(&self, descriptor: &SchemeDescriptor<'_>) -> Result<CompiledKernel>;
}

/// Default compiler: dense `nalgebra` matrices and folded expression trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericCompiler;

impl NumericCompiler {
    fn moment_matrix(
        k: usize,
        polynomials: &[Expr],
        descriptor: &SchemeDescriptor<'_>,
    ) -> Result<DMatrix<Float>> {
        let velocities = &descriptor.stencil.velocities[k];
        let resolve = coordinate_resolver(descriptor.la, descriptor.parameters);
        let compiled = polynomials
            .iter()
            .map(|p| p.compile(&resolve))
            .collect::<Result<Vec<_>>>()?;
        Ok(DMatrix::from_fn(velocities.len(), velocities.len(), |i, j| {
            compiled[i].eval(&velocities[j].as_float())
        }))
    }

    /// Numerical rank test on the singular values, then an LU inverse.
    fn invert(k: usize, matrix: &DMatrix<Float>) -> Result<DMatrix<Float>> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(LbmError::SingularBasis { scheme: k });
        }
        let sigma = matrix.clone().svd(false, false).singular_values;
        let max = sigma.max();
        let min = sigma.min();
        if max == 0.0 || min <= matrix.nrows() as Float * Float::EPSILON * max {
            return Err(LbmError::SingularBasis { scheme: k });
        }
        debug!("scheme {k}: moment matrix condition number {:.3e}", max / min);
        let inverse = matrix
            .clone()
            .lu()
            .try_inverse()
            .ok_or(LbmError::SingularBasis { scheme: k })?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(LbmError::SingularBasis { scheme: k });
        }
        Ok(inverse)
    }

    /// Binds conserved-moment names, `m[k][j]`, `LA` and parameters.
    fn equilibrium_resolver<'a>(
        descriptor: &'a SchemeDescriptor<'a>,
    ) -> Result<impl Fn(&Expr) -> Result<Leaf> + 'a> {
        let stencil = descriptor.stencil;
        let mut names: BTreeMap<&'a str, usize> = BTreeMap::new();
        for (k, s) in descriptor.schemes.iter().enumerate() {
            for (i, name) in s.conserved_moments.iter().enumerate() {
                if names.insert(name.as_str(), stencil.nv_ptr[k] + i).is_some() {
                    return Err(LbmError::config(format!(
                        "conserved moment {name:?} declared twice"
                    )));
                }
            }
        }
        Ok(move |atom: &Expr| match atom {
            Expr::Symbol(name) => {
                if let Some(&slot) = names.get(name.as_str()) {
                    return Ok(Leaf::Slot(slot));
                }
                if let Some(&v) = descriptor.parameters.get(name) {
                    return Ok(Leaf::Value(v));
                }
                if name == "LA" {
                    return Ok(Leaf::Value(descriptor.la));
                }
                Err(LbmError::UnboundSymbol(name.clone()))
            }
            Expr::Moment { scheme, index } => {
                if *scheme < stencil.nschemes() && *index < stencil.nv[*scheme] {
                    Ok(Leaf::Slot(stencil.nv_ptr[*scheme] + index))
                } else {
                    Err(LbmError::config(format!("moment m[{scheme}][{index}] does not exist")))
                }
            }
            other => Err(LbmError::UnboundSymbol(other.to_string())),
        })
    }
}

impl KernelCompiler for NumericCompiler {
    fn compile(&self, descriptor: &SchemeDescriptor<'_>) -> Result<CompiledKernel> {
        let stencil = descriptor.stencil;
        if descriptor.schemes.len() != stencil.nschemes() {
            return Err(LbmError::config("stencil and scheme list disagree"));
        }

        let mut transforms = Vec::with_capacity(stencil.nschemes());
        for (k, scheme) in descriptor.schemes.iter().enumerate() {
            if scheme.polynomials.len() != stencil.nv[k] {
                return Err(LbmError::config(format!(
                    "scheme {k}: {} polynomials for {} velocities",
                    scheme.polynomials.len(),
                    stencil.nv[k]
                )));
            }
            let matrix = Self::moment_matrix(k, &scheme.polynomials, descriptor)?;
            let inverse = Self::invert(k, &matrix)?;
            debug!("scheme {k}: moment matrix {matrix}");
            transforms.push(Transform { matrix, inverse });
        }

        let resolve = Self::equilibrium_resolver(descriptor)?;
        let mut equilibrium = Vec::with_capacity(stencil.nv_total());
        let mut rates = Vec::with_capacity(stencil.nv_total());
        for (k, scheme) in descriptor.schemes.iter().enumerate() {
            let nv = stencil.nv[k];
            if scheme.equilibrium.len() != nv || scheme.relaxation_parameters.len() != nv {
                return Err(LbmError::config(format!(
                    "scheme {k}: equilibrium and relaxation_parameters need {nv} entries"
                )));
            }
            for eq in &scheme.equilibrium {
                equilibrium.push(eq.compile(&resolve)?);
            }
            rates.extend_from_slice(&scheme.relaxation_parameters);
        }

        info!(
            "compiled {} scheme(s), {} moments in total",
            stencil.nschemes(),
            stencil.nv_total()
        );
        Ok(CompiledKernel { transforms, equilibrium, rates })
    }
}
