use crate::math::{perimeter, segment_crossing};
use nalgebra as na;

/// Upper bound on homogenization passes run back to back on one contour.
pub const MAX_RESAMPLE_PASSES: usize = 16;

/// Brings every edge of the closed vertex sequence within
/// `[min_spacing, max_spacing]`: midpoints are inserted into long edges and
/// a vertex too close to its predecessor is merged into it. When that single
/// pass cannot satisfy both bounds, vertices are laid out again at even
/// arc-length spacing along the outline.
///
/// Returns `None` if every edge was already within tolerance.
pub fn homogenize(
    points: &[na::Point2<f32>],
    min_spacing: f32,
    max_spacing: f32,
) -> Option<Vec<na::Point2<f32>>> {
    if points.len() < 3 || within(points, min_spacing, max_spacing) {
        return None;
    }

    let local = midpoint_pass(points, min_spacing, max_spacing);
    if local.len() >= 3 && within(&local, min_spacing, max_spacing) {
        return Some(local);
    }

    // halving an edge in (max, 2 * min) gives two edges below min
    let spacing = 0.5 * (min_spacing + max_spacing);
    let count = ((perimeter(points) / spacing).round() as usize).max(3);

    Some(redistribute(points, count))
}

fn within(points: &[na::Point2<f32>], min_spacing: f32, max_spacing: f32) -> bool {
    let n = points.len();

    (0..n).all(|i| {
        let d = na::distance(&points[i], &points[(i + 1) % n]);
        d >= min_spacing && d <= max_spacing
    })
}

fn midpoint_pass(
    points: &[na::Point2<f32>],
    min_spacing: f32,
    max_spacing: f32,
) -> Vec<na::Point2<f32>> {
    let n = points.len();
    let mut out = Vec::with_capacity(n + n / 4 + 1);
    let mut i = 0;

    while i < n {
        let p = points[i];
        let j = (i + 1) % n;
        let q = points[j];
        let d = na::distance(&p, &q);

        out.push(p);

        if d > max_spacing {
            out.push(na::center(&p, &q));
        } else if d < min_spacing {
            if j == 0 {
                // the closing edge is too short: merge the last vertex into the first one
                out.pop();
            } else {
                i += 1;
            }
        }

        i += 1;
    }

    out
}

/// `count` vertices evenly spaced along the outline, starting at its first vertex.
fn redistribute(points: &[na::Point2<f32>], count: usize) -> Vec<na::Point2<f32>> {
    let n = points.len();
    let lengths: Vec<f32> = (0..n)
        .map(|i| na::distance(&points[i], &points[(i + 1) % n]))
        .collect();

    let step = lengths.iter().sum::<f32>() / count as f32;
    let mut out = Vec::with_capacity(count);
    let mut edge = 0;
    let mut start = 0.0;

    for k in 0..count {
        let arc = k as f32 * step;
        while edge + 1 < n && start + lengths[edge] <= arc {
            start += lengths[edge];
            edge += 1;
        }

        let len = lengths[edge];
        let t = if len > 0.0 {
            ((arc - start) / len).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let p = points[edge];
        out.push(p + (points[(edge + 1) % n] - p) * t);
    }

    out
}

/// First pair of crossing edges `(i, j, crossing)` with `i < j`, edge `k`
/// joining vertex `k` to vertex `k + 1`.
pub fn first_crossing(points: &[na::Point2<f32>]) -> Option<(usize, usize, na::Point2<f32>)> {
    let n = points.len();
    if n < 4 {
        return None;
    }

    for i in 0..n - 2 {
        let (a1, a2) = (points[i], points[i + 1]);
        let (left, right) = (a1.x.min(a2.x), a1.x.max(a2.x));
        let (top, bottom) = (a1.y.min(a2.y), a1.y.max(a2.y));

        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }

            let (b1, b2) = (points[j], points[(j + 1) % n]);

            if b1.x.max(b2.x) < left
                || b1.x.min(b2.x) > right
                || b1.y.max(b2.y) < top
                || b1.y.min(b2.y) > bottom
            {
                continue;
            }

            if let Some(x) = segment_crossing(a1, a2, b1, b2) {
                return Some((i, j, x));
            }
        }
    }

    None
}

/// Cuts a closed vertex sequence at its self-crossings until every loop is
/// simple. The sum of the signed areas of the loops equals the signed area
/// of the input.
pub fn split_loops(points: &[na::Point2<f32>]) -> Vec<Vec<na::Point2<f32>>> {
    let mut pending = vec![points.to_vec()];
    let mut loops = Vec::new();

    while let Some(pts) = pending.pop() {
        if pts.len() < 3 {
            continue;
        }

        match first_crossing(&pts) {
            None => loops.push(pts),
            Some((i, j, x)) => {
                let mut inner = Vec::with_capacity(j - i + 1);
                inner.push(x);
                inner.extend_from_slice(&pts[i + 1..=j]);

                let mut outer = Vec::with_capacity(pts.len() - (j - i) + 1);
                outer.push(x);
                outer.extend_from_slice(&pts[j + 1..]);
                outer.extend_from_slice(&pts[..=i]);

                pending.push(inner);
                pending.push(outer);
            }
        }
    }

    loops
}
