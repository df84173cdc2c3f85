use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::boundary::{BoundaryMethod, BoundaryValue};
use crate::error::{LbmError, Result};
use crate::geometry::{Element, Geometry};
use crate::symbolic::Expr;
use crate::Float;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub geometry: GeometryConfig,
    pub space_step: Float,
    /// Lattice speed `la`; the time step is `space_step / la`.
    pub scheme_velocity: Float,
    pub schemes: Vec<SchemeConfig>,
    /// Edge label -> boundary treatment.
    #[serde(default)]
    pub boundary_conditions: BTreeMap<i32, BoundaryConfig>,
    /// Numeric substitutions for symbols used in polynomials and equilibria.
    #[serde(default)]
    pub parameters: BTreeMap<String, Float>,
    #[serde(default)]
    pub init_type: InitType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// `[min, max]` per axis.
    pub bounds: Vec<[Float; 2]>,
    /// One label for every edge, or one per edge ordered `xmin, xmax, ymin, ...`.
    #[serde(default)]
    pub labels: Vec<i32>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeConfig {
    /// Defaults to the dimension of the box.
    #[serde(default)]
    pub dim: Option<usize>,
    /// Catalogue numbers of the velocities.
    pub velocities: Vec<usize>,
    /// Names bound, in order, to the first moments of this scheme.
    #[serde(default)]
    pub conserved_moments: Vec<String>,
    /// One polynomial per velocity, in `X`, `Y`, `Z`, `LA`.
    pub polynomials: Vec<Expr>,
    /// One rate per moment: 0 keeps the moment, (0, 2] relaxes it.
    pub relaxation_parameters: Vec<Float>,
    pub equilibrium: Vec<Expr>,
    /// Moment (or distribution, see [`InitType`]) index -> initial value.
    #[serde(default)]
    pub init: BTreeMap<usize, Initializer>,
}

impl SchemeConfig {
    pub fn new(
        velocities: Vec<usize>,
        polynomials: Vec<Expr>,
        relaxation_parameters: Vec<Float>,
        equilibrium: Vec<Expr>,
    ) -> Self {
        Self {
            dim: None,
            velocities,
            conserved_moments: Vec::new(),
            polynomials,
            relaxation_parameters,
            equilibrium,
            init: BTreeMap::new(),
        }
    }

    pub fn conserved(mut self, names: &[&str]) -> Self {
        self.conserved_moments = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn init(mut self, index: usize, init: Initializer) -> Self {
        self.init.insert(index, init);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitType {
    /// Initializers give moments; the rest start at equilibrium.
    #[default]
    Moments,
    /// Initializers give distribution values.
    Distributions,
}

pub type InitFn = dyn Fn(&[Float; 3]) -> Float + Send + Sync;

/// Initial value of one moment or distribution slot.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    Constant(Float),
    /// Expression in the node coordinates `X`, `Y`, `Z`.
    Expr(Expr),
    #[serde(skip)]
    Function(Arc<InitFn>),
}

impl Initializer {
    pub fn function(f: impl Fn(&[Float; 3]) -> Float + Send + Sync + 'static) -> Self {
        Initializer::Function(Arc::new(f))
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::Constant(v) => write!(f, "Constant({v})"),
            Initializer::Expr(e) => write!(f, "Expr({e})"),
            Initializer::Function(_) => write!(f, "Function(..)"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Scheme index -> method.
    pub method: BTreeMap<usize, BoundaryMethod>,
    /// Target moments on the wall, re-evaluated every step.
    #[serde(skip)]
    pub value: Option<BoundaryValue>,
}

impl BoundaryConfig {
    /// Same method for schemes `0..nschemes`.
    pub fn uniform(method: BoundaryMethod, nschemes: usize) -> Self {
        Self {
            method: (0..nschemes).map(|k| (k, method)).collect(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: BoundaryValue) -> Self {
        self.value = Some(value);
        self
    }
}

impl Config {
    pub fn new(
        geometry: GeometryConfig,
        space_step: Float,
        scheme_velocity: Float,
        schemes: Vec<SchemeConfig>,
    ) -> Self {
        Self {
            geometry,
            space_step,
            scheme_velocity,
            schemes,
            boundary_conditions: BTreeMap::new(),
            parameters: BTreeMap::new(),
            init_type: InitType::default(),
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub fn with_boundary(mut self, label: i32, bc: BoundaryConfig) -> Self {
        self.boundary_conditions.insert(label, bc);
        self
    }

    pub fn with_parameter(mut self, name: &str, value: Float) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_init_type(mut self, init_type: InitType) -> Self {
        self.init_type = init_type;
        self
    }

    pub fn dim(&self) -> usize {
        self.geometry.bounds.len()
    }

    /// Time step `dx / la`.
    pub fn dt(&self) -> Float {
        self.space_step / self.scheme_velocity
    }

    pub fn build_geometry(&self) -> Result<Geometry> {
        Geometry::new(&self.geometry.bounds, &self.geometry.labels, self.geometry.elements.clone())
    }

    /// Checks the whole descriptor in one pass.
    pub fn validate(&self) -> Result<()> {
        if !(self.space_step.is_finite() && self.space_step > 0.0) {
            return Err(LbmError::config(format!(
                "space_step must be positive, got {}",
                self.space_step
            )));
        }
        if !(self.scheme_velocity.is_finite() && self.scheme_velocity > 0.0) {
            return Err(LbmError::config(format!(
                "scheme_velocity must be positive, got {}",
                self.scheme_velocity
            )));
        }
        self.build_geometry()?;

        if self.schemes.is_empty() {
            return Err(LbmError::config("at least one scheme is required"));
        }
        let dim = self.dim();
        let mut names: Vec<&str> = Vec::new();
        for (k, s) in self.schemes.iter().enumerate() {
            let nv = s.velocities.len();
            if nv == 0 {
                return Err(LbmError::config(format!("scheme {k}: no velocities")));
            }
            if let Some(d) = s.dim {
                if d != dim {
                    return Err(LbmError::DimensionMismatch { domain: dim, scheme: d });
                }
            }
            for (field, len) in [
                ("polynomials", s.polynomials.len()),
                ("relaxation_parameters", s.relaxation_parameters.len()),
                ("equilibrium", s.equilibrium.len()),
            ] {
                if len != nv {
                    return Err(LbmError::config(format!(
                        "scheme {k}: {field} has {len} entries for {nv} velocities"
                    )));
                }
            }
            if s.conserved_moments.len() > nv {
                return Err(LbmError::config(format!(
                    "scheme {k}: more conserved moments than velocities"
                )));
            }
            for name in &s.conserved_moments {
                let reserved = ["X", "Y", "Z", "LA"].contains(&name.as_str());
                if reserved || names.contains(&name.as_str()) {
                    return Err(LbmError::config(format!(
                        "conserved moment name {name:?} is already in use"
                    )));
                }
                names.push(name.as_str());
            }
            for (j, rate) in s.relaxation_parameters.iter().enumerate() {
                if !rate.is_finite() {
                    return Err(LbmError::config(format!("scheme {k}: rate {j} is not finite")));
                }
                if !(0.0..=2.0).contains(rate) {
                    warn!("scheme {k}: relaxation rate {rate} for moment {j} is outside [0, 2]");
                }
            }
            if let Some(&index) = s.init.keys().find(|&&i| i >= nv) {
                return Err(LbmError::config(format!(
                    "scheme {k}: initializer for missing slot {index}"
                )));
            }
        }

        for (label, bc) in &self.boundary_conditions {
            if let Some(&k) = bc.method.keys().find(|&&k| k >= self.schemes.len()) {
                return Err(LbmError::config(format!(
                    "boundary {label}: method for missing scheme {k}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "geometry": { "bounds": [[0.0, 1.0]], "labels": [0] },
        "space_step": 0.0625,
        "scheme_velocity": 1.0,
        "schemes": [{
            "velocities": [1, 2],
            "conserved_moments": ["u"],
            "polynomials": [{"Const": 1.0}, {"Product": [{"Symbol": "LA"}, {"Symbol": "X"}]}],
            "relaxation_parameters": [0.0, 1.0],
            "equilibrium": [{"Symbol": "u"}, {"Const": 0.0}],
            "init": { "0": {"constant": 1.0} }
        }],
        "boundary_conditions": { "0": { "method": { "0": "bounce_back" } } }
    }"#;

    #[test]
    fn test_from_json() {
        let config = Config::from_json(JSON).unwrap();
        assert_eq!(config.init_type, InitType::Moments);
        assert!(config.parameters.is_empty());
        assert_eq!(config.boundary_conditions[&0].method[&0], BoundaryMethod::BounceBack);
        assert!(matches!(config.schemes[0].init[&0], Initializer::Constant(v) if v == 1.0));
        config.validate().unwrap();
        assert!((config.dt() - 0.0625).abs() < 1e-15);
    }

    #[test]
    fn test_length_mismatch() {
        let mut config = Config::from_json(JSON).unwrap();
        config.schemes[0].relaxation_parameters.push(1.0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LbmError::Config(msg) if msg.contains("relaxation_parameters")));
    }

    #[test]
    fn test_scheme_dimension_mismatch() {
        let mut config = Config::from_json(JSON).unwrap();
        config.schemes[0].dim = Some(2);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LbmError::DimensionMismatch { domain: 1, scheme: 2 }));
    }

    #[test]
    fn test_missing_required_field() {
        let err = Config::from_json(r#"{ "space_step": 0.1 }"#).unwrap_err();
        assert!(matches!(err, LbmError::Json(_)));
    }

    #[test]
    fn test_unstable_rate_is_accepted() {
        let mut config = Config::from_json(JSON).unwrap();
        config.schemes[0].relaxation_parameters[1] = 2.5;
        config.validate().unwrap();
    }
}
