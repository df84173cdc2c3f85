use nalgebra::{Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{LbmError, Result};
use crate::Float;

/// Label marking a periodic box edge.
pub const PERIODIC: i32 = -1;

/// Region shapes that can be added to or removed from the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    /// 1-D segment `[lo, hi]`.
    Interval { lo: Float, hi: Float },
    Circle { center: [Float; 2], radius: Float },
    /// `point + a*v0 + b*v1` for `a, b` in `[0, 1]`.
    Parallelogram { point: [Float; 2], v0: [Float; 2], v1: [Float; 2] },
    /// Triangle with vertices `point`, `point + v0`, `point + v1`.
    Triangle { point: [Float; 2], v0: [Float; 2], v1: [Float; 2] },
    Sphere { center: [Float; 3], radius: Float },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub shape: Shape,
    #[serde(default)]
    pub label: i32,
    /// `true` adds fluid, `false` (default) carves out a solid obstacle.
    #[serde(default)]
    pub is_fluid: bool,
}

impl Element {
    pub fn solid(shape: Shape, label: i32) -> Self {
        Self { shape, label, is_fluid: false }
    }

    pub fn fluid(shape: Shape, label: i32) -> Self {
        Self { shape, label, is_fluid: true }
    }

    pub fn dim(&self) -> usize {
        match self.shape {
            Shape::Interval { .. } => 1,
            Shape::Circle { .. } | Shape::Parallelogram { .. } | Shape::Triangle { .. } => 2,
            Shape::Sphere { .. } => 3,
        }
    }

    /// Point-in-region test.
    pub fn contains(&self, p: &Vector3<Float>) -> bool {
        match &self.shape {
            Shape::Interval { lo, hi } => p.x >= *lo && p.x <= *hi,
            Shape::Circle { center, radius } => {
                (p.xy() - Vector2::from(*center)).norm_squared() < radius * radius
            }
            Shape::Sphere { center, radius } => {
                (p - Vector3::from(*center)).norm_squared() < radius * radius
            }
            Shape::Parallelogram { point, v0, v1 } => {
                let basis = Matrix2::from_columns(&[Vector2::from(*v0), Vector2::from(*v1)]);
                match basis.try_inverse() {
                    Some(inv) => {
                        let ab = inv * (p.xy() - Vector2::from(*point));
                        (0.0..=1.0).contains(&ab.x) && (0.0..=1.0).contains(&ab.y)
                    }
                    None => false,
                }
            }
            Shape::Triangle { point, v0, v1 } => {
                // Barycentric coordinates
                let e0 = Vector2::from(*v0);
                let e1 = Vector2::from(*v1);
                let e2 = p.xy() - Vector2::from(*point);
                let dot00 = e0.dot(&e0);
                let dot01 = e0.dot(&e1);
                let dot02 = e0.dot(&e2);
                let dot11 = e1.dot(&e1);
                let dot12 = e1.dot(&e2);
                let denom = dot00 * dot11 - dot01 * dot01;
                if denom == 0.0 {
                    return false;
                }
                let u = (dot11 * dot02 - dot01 * dot12) / denom;
                let v = (dot00 * dot12 - dot01 * dot02) / denom;
                u >= 0.0 && v >= 0.0 && u + v <= 1.0
            }
        }
    }

    /// Parameters `t` in `[0, 1]` where the segment `p + t*d` crosses the
    /// element boundary.
    pub fn crossings(&self, p: &Vector3<Float>, d: &Vector3<Float>) -> Vec<Float> {
        let in_unit = |t: &Float| (0.0..=1.0).contains(t);
        match &self.shape {
            Shape::Interval { lo, hi } => {
                if d.x == 0.0 {
                    return Vec::new();
                }
                [(lo - p.x) / d.x, (hi - p.x) / d.x].into_iter().filter(in_unit).collect()
            }
            Shape::Circle { center, radius } => {
                let c = Vector3::new(center[0], center[1], p.z);
                sphere_crossings(p, d, &c, *radius).into_iter().filter(in_unit).collect()
            }
            Shape::Sphere { center, radius } => {
                sphere_crossings(p, d, &Vector3::from(*center), *radius)
                    .into_iter()
                    .filter(in_unit)
                    .collect()
            }
            Shape::Parallelogram { point, v0, v1 } => {
                let o = Vector2::from(*point);
                let a = Vector2::from(*v0);
                let b = Vector2::from(*v1);
                let corners = [o, o + a, o + a + b, o + b];
                polygon_crossings(p, d, &corners)
            }
            Shape::Triangle { point, v0, v1 } => {
                let o = Vector2::from(*point);
                let corners = [o, o + Vector2::from(*v0), o + Vector2::from(*v1)];
                polygon_crossings(p, d, &corners)
            }
        }
    }

    /// Axis-aligned bounding box `(min, max)`; unused axes span everything.
    pub fn bounding_box(&self) -> ([Float; 3], [Float; 3]) {
        let inf = Float::INFINITY;
        match &self.shape {
            Shape::Interval { lo, hi } => ([*lo, -inf, -inf], [*hi, inf, inf]),
            Shape::Circle { center, radius } => (
                [center[0] - radius, center[1] - radius, -inf],
                [center[0] + radius, center[1] + radius, inf],
            ),
            Shape::Sphere { center, radius } => (
                [center[0] - radius, center[1] - radius, center[2] - radius],
                [center[0] + radius, center[1] + radius, center[2] + radius],
            ),
            Shape::Parallelogram { point, v0, v1 } | Shape::Triangle { point, v0, v1 } => {
                let far = if matches!(self.shape, Shape::Parallelogram { .. }) {
                    [point[0] + v0[0] + v1[0], point[1] + v0[1] + v1[1]]
                } else {
                    *point
                };
                let xs = [point[0], point[0] + v0[0], point[0] + v1[0], far[0]];
                let ys = [point[1], point[1] + v0[1], point[1] + v1[1], far[1]];
                let min = |a: &[Float; 4]| a.iter().copied().fold(inf, Float::min);
                let max = |a: &[Float; 4]| a.iter().copied().fold(-inf, Float::max);
                ([min(&xs), min(&ys), -inf], [max(&xs), max(&ys), inf])
            }
        }
    }
}

fn sphere_crossings(
    p: &Vector3<Float>,
    d: &Vector3<Float>,
    c: &Vector3<Float>,
    r: Float,
) -> Vec<Float> {
    let f = p - c;
    let a = d.dot(d);
    let b = 2.0 * f.dot(d);
    let cc = f.dot(&f) - r * r;
    let disc = b * b - 4.0 * a * cc;
    // tangent rays graze the surface without entering it
    if a == 0.0 || disc <= 0.0 {
        return Vec::new();
    }
    let sq = disc.sqrt();
    vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
}

fn polygon_crossings(
    p: &Vector3<Float>,
    d: &Vector3<Float>,
    corners: &[Vector2<Float>],
) -> Vec<Float> {
    let origin = p.xy();
    let dir = d.xy();
    let cross = |u: &Vector2<Float>, v: &Vector2<Float>| u.x * v.y - u.y * v.x;
    let mut out = Vec::new();
    for (i, a) in corners.iter().enumerate() {
        let b = corners[(i + 1) % corners.len()];
        let e = b - a;
        let denom = cross(&dir, &e);
        if denom == 0.0 {
            // parallel: no transversal crossing
            continue;
        }
        let w = a - origin;
        let t = cross(&w, &e) / denom;
        let s = cross(&w, &dir) / denom;
        if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&s) {
            out.push(t);
        }
    }
    out
}

/// The computational box plus its added/removed elements.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub dim: usize,
    /// `[min, max]` per axis; unused axes are `[0, 0]`.
    pub bounds: [[Float; 2]; 3],
    /// Edge labels ordered `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub labels: [i32; 6],
    pub periodic: [bool; 3],
    pub elements: Vec<Element>,
    /// Offsets of the periodic copies of the elements, identity first.
    images: Vec<Vector3<Float>>,
}

impl Geometry {
    /// Validates the box and its elements. `labels` holds either one label
    /// for every edge or one per edge.
    pub fn new(bounds: &[[Float; 2]], labels: &[i32], elements: Vec<Element>) -> Result<Self> {
        let dim = bounds.len();
        if !(1..=3).contains(&dim) {
            return Err(LbmError::config(format!("box must have 1 to 3 axes, got {dim}")));
        }
        let mut b = [[0.0; 2]; 3];
        for (axis, &[lo, hi]) in bounds.iter().enumerate() {
            if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
                return Err(LbmError::config(format!(
                    "degenerate box along axis {axis}: [{lo}, {hi}]"
                )));
            }
            b[axis] = [lo, hi];
        }

        let mut l = [0i32; 6];
        match labels.len() {
            0 => {}
            1 => l[..2 * dim].fill(labels[0]),
            n if n == 2 * dim => l[..n].copy_from_slice(labels),
            n => {
                return Err(LbmError::config(format!(
                    "box needs 1 or {} labels, got {n}",
                    2 * dim
                )));
            }
        }

        let mut periodic = [false; 3];
        for axis in 0..dim {
            let (lo, hi) = (l[2 * axis], l[2 * axis + 1]);
            if (lo == PERIODIC) != (hi == PERIODIC) {
                return Err(LbmError::config(format!(
                    "axis {axis}: a periodic edge must face a periodic edge"
                )));
            }
            periodic[axis] = lo == PERIODIC;
        }

        for (i, elem) in elements.iter().enumerate() {
            if elem.dim() != dim {
                return Err(LbmError::DimensionMismatch { domain: dim, scheme: elem.dim() });
            }
            if elem.label == PERIODIC {
                return Err(LbmError::config(format!("element {i} cannot use the periodic label")));
            }
            let (lo, hi) = elem.bounding_box();
            let outside = (0..dim).any(|a| hi[a] <= b[a][0] || lo[a] >= b[a][1]);
            if outside {
                return Err(LbmError::config(format!("element {i} lies wholly outside the box")));
            }
        }

        let mut images = vec![Vector3::zeros()];
        for axis in (0..dim).filter(|&a| periodic[a]) {
            let period = b[axis][1] - b[axis][0];
            images = images
                .into_iter()
                .flat_map(|s: Vector3<Float>| {
                    [0.0, -period, period].into_iter().map(move |o| {
                        let mut t = s;
                        t[axis] += o;
                        t
                    })
                })
                .collect();
        }

        Ok(Self { dim, bounds: b, labels: l, periodic, elements, images })
    }

    /// Maps a point on a periodic axis back into the box.
    pub fn wrap(&self, mut p: Vector3<Float>) -> Vector3<Float> {
        for axis in 0..self.dim {
            if self.periodic[axis] {
                let [lo, hi] = self.bounds[axis];
                p[axis] = lo + (p[axis] - lo).rem_euclid(hi - lo);
            }
        }
        p
    }

    /// `None` for fluid; `Some(label)` of the region making `p` solid.
    /// Elements apply in declaration order, the last one containing `p` wins.
    pub fn classify(&self, p: &Vector3<Float>) -> Option<i32> {
        let p = self.wrap(*p);
        for axis in 0..self.dim {
            let [lo, hi] = self.bounds[axis];
            if p[axis] < lo {
                return Some(self.labels[2 * axis]);
            }
            if p[axis] > hi {
                return Some(self.labels[2 * axis + 1]);
            }
        }
        let mut state = None;
        for elem in &self.elements {
            // an element may reach across a periodic edge
            if self.images.iter().any(|s| elem.contains(&(p + s))) {
                state = if elem.is_fluid { None } else { Some(elem.label) };
            }
        }
        state
    }

    /// First point along `p + t*d`, `t` in `[0, 1]`, where the segment enters
    /// solid, with the label of the surface crossed there.
    pub fn first_wall(&self, p: &Vector3<Float>, d: &Vector3<Float>) -> Option<(Float, i32)> {
        let mut candidates: Vec<(Float, i32)> = Vec::new();
        for axis in 0..self.dim {
            if self.periodic[axis] || d[axis] == 0.0 {
                continue;
            }
            for (side, wall) in self.bounds[axis].iter().enumerate() {
                let t = (wall - p[axis]) / d[axis];
                if (0.0..=1.0).contains(&t) {
                    candidates.push((t, self.labels[2 * axis + side]));
                }
            }
        }
        for elem in &self.elements {
            for s in &self.images {
                candidates.extend(elem.crossings(&(p + s), d).into_iter().map(|t| (t, elem.label)));
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let eps = 1e-9;
        candidates.into_iter().find_map(|(t, label)| {
            let beyond = p + d * (t + eps).min(1.0);
            self.classify(&beyond).map(|_| (t, label))
        })
    }
}
