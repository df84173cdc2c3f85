//! Symbolic descriptions of polynomials and equilibria.
//!
//! An [`Expr`] is only ever *compiled*: at construction time every symbol is
//! resolved to either a number or a slot of a flat value vector, constants are
//! folded, and the result is a [`CompiledExpr`] evaluated per node during the
//! simulation. Nothing symbolic survives past construction.
//!
//! Reserved symbol names: `X`, `Y`, `Z` (velocity components inside a
//! polynomial basis, node coordinates inside an initializer) and `LA` (the
//! scheme velocity).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::{LbmError, Result};
use crate::Float;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Float),
    Symbol(String),
    /// Moment `j` of sub-scheme `k`, written `m[k][j]`.
    Moment { scheme: usize, index: usize },
    Sum(Vec<Expr>),
    Product(Vec<Expr>),
    Pow(Box<Expr>, Float),
}

impl Expr {
    pub fn constant(value: Float) -> Self {
        Expr::Const(value)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn x() -> Self {
        Expr::symbol("X")
    }

    pub fn y() -> Self {
        Expr::symbol("Y")
    }

    pub fn z() -> Self {
        Expr::symbol("Z")
    }

    pub fn la() -> Self {
        Expr::symbol("LA")
    }

    pub fn moment(scheme: usize, index: usize) -> Self {
        Expr::Moment { scheme, index }
    }

    pub fn powf(self, exponent: Float) -> Self {
        Expr::Pow(Box::new(self), exponent)
    }

    pub fn powi(self, exponent: i32) -> Self {
        Expr::Pow(Box::new(self), exponent as Float)
    }

    /// Resolves every symbol and moment reference through `resolve` and
    /// folds constant subtrees.
    pub fn compile(&self, resolve: &dyn Fn(&Expr) -> Result<Leaf>) -> Result<CompiledExpr> {
        match self {
            Expr::Const(v) => Ok(CompiledExpr::Const(*v)),
            Expr::Symbol(_) | Expr::Moment { .. } => Ok(match resolve(self)? {
                Leaf::Value(v) => CompiledExpr::Const(v),
                Leaf::Slot(s) => CompiledExpr::Slot(s),
            }),
            Expr::Sum(terms) => {
                let mut constant = 0.0;
                let mut rest = Vec::new();
                for term in terms {
                    match term.compile(resolve)? {
                        CompiledExpr::Const(v) => constant += v,
                        other => rest.push(other),
                    }
                }
                if rest.is_empty() {
                    return Ok(CompiledExpr::Const(constant));
                }
                if constant != 0.0 {
                    rest.push(CompiledExpr::Const(constant));
                }
                Ok(if rest.len() == 1 {
                    rest.remove(0)
                } else {
                    CompiledExpr::Sum(rest)
                })
            }
            Expr::Product(factors) => {
                let mut constant = 1.0;
                let mut rest = Vec::new();
                for factor in factors {
                    match factor.compile(resolve)? {
                        CompiledExpr::Const(v) => constant *= v,
                        other => rest.push(other),
                    }
                }
                if rest.is_empty() || constant == 0.0 {
                    return Ok(CompiledExpr::Const(constant));
                }
                if constant != 1.0 {
                    rest.insert(0, CompiledExpr::Const(constant));
                }
                Ok(if rest.len() == 1 {
                    rest.remove(0)
                } else {
                    CompiledExpr::Product(rest)
                })
            }
            Expr::Pow(base, exponent) => match base.compile(resolve)? {
                CompiledExpr::Const(v) => Ok(CompiledExpr::Const(v.powf(*exponent))),
                other if *exponent == 1.0 => Ok(other),
                other => Ok(CompiledExpr::Pow(Box::new(other), *exponent)),
            },
        }
    }
}

impl From<Float> for Expr {
    fn from(value: Float) -> Self {
        Expr::Const(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v}"),
            Expr::Symbol(name) => write!(f, "{name}"),
            Expr::Moment { scheme, index } => write!(f, "m[{scheme}][{index}]"),
            Expr::Sum(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Expr::Product(factors) => {
                for (i, t) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    write!(f, "{t}")?;
                }
                Ok(())
            }
            Expr::Pow(base, e) => write!(f, "({base})^{e}"),
        }
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        let mut terms = match self {
            Expr::Sum(terms) => terms,
            other => vec![other],
        };
        match rhs {
            Expr::Sum(more) => terms.extend(more),
            other => terms.push(other),
        }
        Expr::Sum(terms)
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        let mut factors = match self {
            Expr::Product(factors) => factors,
            other => vec![other],
        };
        match rhs {
            Expr::Product(more) => factors.extend(more),
            other => factors.push(other),
        }
        Expr::Product(factors)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Const(-1.0) * self
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        self + (-rhs)
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        self * rhs.powi(-1)
    }
}

macro_rules! float_ops {
    ($($tr:ident $method:ident),*) => {$(
        impl $tr<Float> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Float) -> Expr {
                self.$method(Expr::Const(rhs))
            }
        }

        impl $tr<Expr> for Float {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::Const(self).$method(rhs)
            }
        }
    )*};
}

float_ops!(Add add, Sub sub, Mul mul, Div div);

/// What a symbol resolves to at compile time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Leaf {
    Value(Float),
    Slot(usize),
}

/// Numeric form of an [`Expr`]: slots index into the value vector passed to
/// [`CompiledExpr::eval`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledExpr {
    Const(Float),
    Slot(usize),
    Sum(Vec<CompiledExpr>),
    Product(Vec<CompiledExpr>),
    Pow(Box<CompiledExpr>, Float),
}

impl CompiledExpr {
    #[inline]
    pub fn eval(&self, slots: &[Float]) -> Float {
        match self {
            CompiledExpr::Const(v) => *v,
            CompiledExpr::Slot(s) => slots[*s],
            CompiledExpr::Sum(terms) => terms.iter().map(|t| t.eval(slots)).sum(),
            CompiledExpr::Product(factors) => factors.iter().map(|t| t.eval(slots)).product(),
            CompiledExpr::Pow(base, e) => {
                let b = base.eval(slots);
                if e.fract() == 0.0 && e.abs() <= i32::MAX as Float {
                    b.powi(*e as i32)
                } else {
                    b.powf(*e)
                }
            }
        }
    }

    pub fn as_constant(&self) -> Option<Float> {
        match self {
            CompiledExpr::Const(v) => Some(*v),
            _ => None,
        }
    }
}

/// Resolver binding `X`, `Y`, `Z` to slots 0..3, `LA` to `la`, and any other
/// name through `parameters`.
pub fn coordinate_resolver<'a>(
    la: Float,
    parameters: &'a std::collections::BTreeMap<String, Float>,
) -> impl Fn(&Expr) -> Result<Leaf> + 'a {
    move |atom: &Expr| match atom {
        Expr::Symbol(name) => match name.as_str() {
            "X" => Ok(Leaf::Slot(0)),
            "Y" => Ok(Leaf::Slot(1)),
            "Z" => Ok(Leaf::Slot(2)),
            other => parameters
                .get(other)
                .copied()
                .or(if other == "LA" { Some(la) } else { None })
                .map(Leaf::Value)
                .ok_or_else(|| LbmError::UnboundSymbol(other.to_string())),
        },
        other => Err(LbmError::UnboundSymbol(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_constant_folding() {
        let params = BTreeMap::new();
        let resolve = coordinate_resolver(2.0, &params);
        let e = Expr::la() * Expr::la() + 1.0;
        assert_eq!(e.compile(&resolve).unwrap(), CompiledExpr::Const(5.0));
    }

    #[test]
    fn test_polynomial_eval() {
        let params = BTreeMap::new();
        let resolve = coordinate_resolver(1.0, &params);
        let r2 = Expr::x() * Expr::x() + Expr::y() * Expr::y();
        let e = 3.0 * r2 - 4.0;
        let c = e.compile(&resolve).unwrap();
        assert_eq!(c.eval(&[1.0, 1.0, 0.0]), 2.0);
        assert_eq!(c.eval(&[0.0, 0.0, 0.0]), -4.0);
    }

    #[test]
    fn test_parameter_overrides_la() {
        let mut params = BTreeMap::new();
        params.insert("LA".to_string(), 3.0);
        params.insert("gamma".to_string(), 0.5);
        let resolve = coordinate_resolver(1.0, &params);
        let e = Expr::la() * Expr::symbol("gamma");
        assert_eq!(e.compile(&resolve).unwrap(), CompiledExpr::Const(1.5));
    }

    #[test]
    fn test_unbound_symbol_is_an_error() {
        let params = BTreeMap::new();
        let resolve = coordinate_resolver(1.0, &params);
        let err = (Expr::symbol("rho") + 1.0).compile(&resolve).unwrap_err();
        assert!(matches!(err, LbmError::UnboundSymbol(ref s) if s == "rho"));
    }

    #[test]
    fn test_division_and_fractional_power() {
        let resolve = |atom: &Expr| match atom {
            Expr::Moment { scheme: 0, index: 0 } => Ok(Leaf::Slot(0)),
            other => Err(LbmError::UnboundSymbol(other.to_string())),
        };
        let e = Expr::moment(0, 0).powf(-2.0 / 3.0) / 2.0;
        let c = e.compile(&resolve).unwrap();
        let expected = 8.0_f64.powf(-2.0 / 3.0) / 2.0;
        assert!((c.eval(&[8.0]) - expected).abs() < 1e-14);
    }

    #[test]
    fn test_expr_serde_roundtrip() {
        let e = Expr::la() * Expr::x() - Expr::moment(1, 0);
        let json = serde_json::to_string(&e).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
