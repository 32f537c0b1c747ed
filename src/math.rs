use nalgebra as na;
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

pub fn gauss(x: f32, c: f32) -> f32 {
    (-((x * x) / (2.0 * c * c))).exp()
}

/// Rotates a vector by -90 degrees. For a positively oriented polygon this
/// turns the local tangent into the outward normal.
#[inline(always)]
pub fn perp(v: na::Vector2<f32>) -> na::Vector2<f32> {
    na::Vector2::new(v.y, -v.x)
}

#[inline(always)]
fn cross(a: na::Vector2<f32>, b: na::Vector2<f32>) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Bilinear interpolation with pixel centers at integer coordinates,
/// samples outside the grid are clamped to the border.
pub fn sample_bilinear(field: &Array2<f32>, p: na::Point2<f32>) -> f32 {
    let (h, w) = field.dim();
    if w == 0 || h == 0 {
        return 0.0;
    }

    let x = p.x.clamp(0.0, (w - 1) as f32);
    let y = p.y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);

    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let top = field[[y0, x0]] * (1.0 - dx) + field[[y0, x1]] * dx;
    let bottom = field[[y1, x0]] * (1.0 - dx) + field[[y1, x1]] * dx;

    top * (1.0 - dy) + bottom * dy
}

/// Shoelace area, positive for counter-clockwise vertices in a y-up frame.
pub fn signed_area(points: &[na::Point2<f32>]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        sum += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }

    (sum * 0.5) as f32
}

pub fn perimeter(points: &[na::Point2<f32>]) -> f32 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }

    (0..n)
        .map(|i| na::distance(&points[i], &points[(i + 1) % n]))
        .sum()
}

/// Axis aligned bounding box.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Bounds {
    pub fn from_points(points: &[na::Point2<f32>]) -> Self {
        let mut bounds = Bounds {
            left: f32::INFINITY,
            top: f32::INFINITY,
            right: f32::NEG_INFINITY,
            bottom: f32::NEG_INFINITY,
        };

        for p in points {
            bounds.left = bounds.left.min(p.x);
            bounds.top = bounds.top.min(p.y);
            bounds.right = bounds.right.max(p.x);
            bounds.bottom = bounds.bottom.max(p.y);
        }

        bounds
    }

    #[inline]
    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    #[inline]
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }
}

/// Even-odd point in polygon test.
pub fn in_polygon(p: na::Point2<f32>, poly: &[na::Point2<f32>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut a = poly[n - 1];

    for &b in poly {
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);

            if p.x < x {
                inside = !inside;
            }
        }

        a = b;
    }

    inside
}

/// X coordinates where the horizontal line `y` crosses the polygon edges,
/// in ascending order. Uses the same half-open rule as [`in_polygon`].
pub fn row_crossings(y: f32, poly: &[na::Point2<f32>], out: &mut Vec<f32>) {
    out.clear();

    let n = poly.len();
    if n < 3 {
        return;
    }

    let mut a = poly[n - 1];
    for &b in poly {
        if (a.y > y) != (b.y > y) {
            out.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
        }
        a = b;
    }

    out.sort_by(|a, b| a.total_cmp(b));
}

/// Crossing point of segments `p1 p2` and `q1 q2`, excluding parallel
/// segments and contacts at segment ends.
pub fn segment_crossing(
    p1: na::Point2<f32>,
    p2: na::Point2<f32>,
    q1: na::Point2<f32>,
    q2: na::Point2<f32>,
) -> Option<na::Point2<f32>> {
    const EPS: f32 = 1e-6;

    let r = p2 - p1;
    let s = q2 - q1;
    let denom = cross(r, s);

    if denom.abs() <= EPS * r.norm() * s.norm() || denom == 0.0 {
        return None;
    }

    let qp = q1 - p1;
    let t = cross(qp, s) / denom;
    let u = cross(qp, r) / denom;

    if t > EPS && t < 1.0 - EPS && u > EPS && u < 1.0 - EPS {
        Some(p1 + r * t)
    } else {
        None
    }
}

/// Principal axes of a point cloud as `(major, minor, anisotropy)`, the
/// anisotropy being `1 - minor_variance / major_variance`.
pub fn principal_axes(
    points: &[na::Point2<f32>],
) -> Option<(na::Vector2<f32>, na::Vector2<f32>, f32)> {
    if points.len() < 3 {
        return None;
    }

    let n = points.len() as f32;
    let mean = points.iter().fold(na::Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let cov = points.iter().fold(na::Matrix2::<f32>::zeros(), |acc, p| {
        let d = p.coords - mean;
        acc + d * d.transpose()
    }) / n;

    let eigen = na::SymmetricEigen::new(cov);
    let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };

    let major_var = eigen.eigenvalues[major];
    if major_var <= f32::EPSILON {
        return None;
    }

    let anisotropy = 1.0 - eigen.eigenvalues[minor].max(0.0) / major_var;
    let major_axis = eigen.eigenvectors.column(major).into_owned();
    let minor_axis = eigen.eigenvectors.column(minor).into_owned();

    Some((major_axis, minor_axis, anisotropy))
}
