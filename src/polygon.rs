use crate::config::{Config, EPSILON};
use crate::contour::{Deformable, Resample, Shape};
use crate::convergence::SlidingWindow;
use crate::coupling;
use crate::error::GeometryError;
use crate::field::Field;
use crate::math::{self, Bounds};
use crate::resample::{first_crossing, homogenize, split_loops, MAX_RESAMPLE_PASSES};
use nalgebra as na;
use ndarray::Array2;

/// Below this anisotropy a contour has no meaningful principal axis.
const MIN_ANISOTROPY: f32 = 0.05;

/// Distance under which two consecutive vertices are considered coincident.
const COINCIDENT: f32 = 1e-4;

/// Closed outline of a polygon, frozen at the time it was taken.
#[derive(Debug, Clone)]
pub struct Outline {
    points: Vec<na::Point2<f32>>,
    bounds: Bounds,
}

impl Outline {
    pub fn new(points: Vec<na::Point2<f32>>) -> Self {
        let bounds = Bounds::from_points(&points);

        Self { points, bounds }
    }

    #[inline]
    pub fn points(&self) -> &[na::Point2<f32>] {
        &self.points
    }

    #[inline]
    pub fn area(&self) -> f32 {
        math::signed_area(&self.points).abs()
    }
}

impl Shape for Outline {
    #[inline]
    fn bounds(&self) -> Bounds {
        self.bounds
    }

    #[inline]
    fn contains(&self, p: na::Point2<f32>) -> bool {
        self.bounds.contains(p) && math::in_polygon(p, &self.points)
    }

    fn fill_row(&self, y: usize, row: &mut [u8]) {
        let yf = y as f32;
        if yf < self.bounds.top || yf > self.bounds.bottom {
            return;
        }

        let mut xs = Vec::with_capacity(4);
        math::row_crossings(yf, &self.points, &mut xs);

        for pair in xs.chunks_exact(2) {
            // pixel x is inside when pair[0] <= x < pair[1]
            let start = pair[0].ceil().max(0.0) as usize;
            let end = (pair[1].ceil().max(0.0) as usize).min(row.len());

            if start < end {
                row[start..end].iter_mut().for_each(|v| *v = 1);
            }
        }
    }
}

/// 2D active contour: a closed polygon with a per-vertex force accumulator.
#[derive(Debug, Clone)]
pub struct Polygon {
    points: Vec<na::Point2<f32>>,
    forces: Vec<na::Vector2<f32>>,
    resolution: f32,
    min_area: f32,
    target_area: f32,
    t: u32,
    color: [u8; 3],
    convergence: SlidingWindow<f32>,
}

impl Polygon {
    /// Builds a contour from a simple closed outline and brings it to the
    /// configured resolution.
    pub fn from_points(
        points: Vec<na::Point2<f32>>,
        t: u32,
        config: &Config,
    ) -> Result<Self, GeometryError> {
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(GeometryError::NonFinite);
        }

        let mut points = dedup_closed(points);
        if points.len() < 3 {
            return Err(GeometryError::Degenerate(points.len()));
        }

        if first_crossing(&points).is_some() {
            return Err(GeometryError::SelfIntersecting);
        }

        let mut area = math::signed_area(&points);
        if area < 0.0 {
            points.reverse();
            area = -area;
        }

        if area <= f32::EPSILON {
            return Err(GeometryError::Degenerate(points.len()));
        }

        if area < config.min_area {
            return Err(GeometryError::BelowMinArea {
                area,
                min: config.min_area,
            });
        }

        let min_spacing = config.min_spacing_factor * config.resolution;
        let max_spacing = config.max_spacing_factor * config.resolution;

        for _ in 0..MAX_RESAMPLE_PASSES {
            match homogenize(&points, min_spacing, max_spacing) {
                Some(next) => points = next,
                None => break,
            }
        }

        if points.len() < 3 {
            return Err(GeometryError::Degenerate(points.len()));
        }

        Ok(Self {
            forces: vec![na::Vector2::zeros(); points.len()],
            target_area: math::signed_area(&points),
            points,
            resolution: config.resolution,
            min_area: config.min_area,
            t,
            color: [255, 255, 255],
            convergence: SlidingWindow::with_capacity(config.convergence_window),
        })
    }

    /// Regular polygon approximating a circle, handy as a seed.
    pub fn circle(
        center: na::Point2<f32>,
        radius: f32,
        t: u32,
        config: &Config,
    ) -> Result<Self, GeometryError> {
        let n = ((std::f32::consts::TAU * radius / config.resolution).round() as usize).max(3);
        let points = (0..n)
            .map(|i| {
                let a = i as f32 / n as f32 * std::f32::consts::TAU;
                center + na::Vector2::new(a.cos(), a.sin()) * radius
            })
            .collect();

        Self::from_points(points, t, config)
    }

    #[inline]
    pub fn points(&self) -> &[na::Point2<f32>] {
        &self.points
    }

    #[inline]
    pub fn forces(&self) -> &[na::Vector2<f32>] {
        &self.forces
    }

    #[inline]
    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn centroid(&self) -> na::Point2<f32> {
        let sum = self
            .points
            .iter()
            .fold(na::Vector2::zeros(), |acc, p| acc + p.coords);

        (sum / self.points.len().max(1) as f32).into()
    }

    #[inline]
    pub fn area(&self) -> f32 {
        math::signed_area(&self.points)
    }

    #[inline]
    pub fn perimeter(&self) -> f32 {
        math::perimeter(&self.points)
    }

    #[inline]
    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.points)
    }

    /// Outward unit normals, estimated from the two neighbours of each vertex.
    pub fn normals(&self) -> Vec<na::Vector2<f32>> {
        let n = self.points.len();

        (0..n)
            .map(|i| {
                let prev = self.points[(i + n - 1) % n];
                let next = self.points[(i + 1) % n];
                let normal = math::perp(next - prev);
                let norm = normal.norm();

                if norm > f32::EPSILON {
                    normal / norm
                } else {
                    na::Vector2::zeros()
                }
            })
            .collect()
    }

    fn set_points(&mut self, points: Vec<na::Point2<f32>>) {
        self.forces = vec![na::Vector2::zeros(); points.len()];
        self.points = points;
    }

    fn child(&self, points: Vec<na::Point2<f32>>) -> Self {
        Self {
            forces: vec![na::Vector2::zeros(); points.len()],
            target_area: math::signed_area(&points),
            points,
            resolution: self.resolution,
            min_area: self.min_area,
            t: self.t,
            color: self.color,
            convergence: self.convergence.fresh(),
        }
    }
}

impl Deformable for Polygon {
    type Shape = Outline;

    #[inline]
    fn shape(&self) -> Outline {
        Outline::new(self.points.clone())
    }

    fn internal_forces(&mut self, weight: f32) {
        let n = self.points.len();
        let normals = self.normals();

        for i in 0..n {
            let prev = self.points[(i + n - 1) % n];
            let next = self.points[(i + 1) % n];
            let curvature = (prev.coords + next.coords) * 0.5 - self.points[i].coords;

            self.forces[i] += normals[i] * (weight * curvature.dot(&normals[i]));
        }
    }

    fn edge_forces(&mut self, grad_x: &Array2<f32>, grad_y: &Array2<f32>, weight: f32) {
        for (p, f) in self.points.iter().zip(self.forces.iter_mut()) {
            let g = na::Vector2::new(
                math::sample_bilinear(grad_x, *p),
                math::sample_bilinear(grad_y, *p),
            );

            *f += g * weight;
        }
    }

    fn region_forces(
        &mut self,
        intensity: &Array2<f32>,
        weight: f32,
        sensitivity: f32,
        mean_in: f32,
        mean_out: f32,
    ) {
        let normals = self.normals();

        for ((p, n), f) in self.points.iter().zip(&normals).zip(self.forces.iter_mut()) {
            let value = math::sample_bilinear(intensity, *p);
            let inner = value - mean_in;
            let outer = value - mean_out;
            let competition = sensitivity * outer * outer - inner * inner / sensitivity;

            *f += n * (weight * competition);
        }
    }

    fn balloon_forces(&mut self, weight: f32) {
        let normals = self.normals();

        for (f, n) in self.forces.iter_mut().zip(&normals) {
            *f += n * weight;
        }
    }

    fn axis_forces(&mut self, weight: f32) {
        let damping = weight.clamp(0.0, 1.0);
        if damping <= EPSILON {
            return;
        }

        let minor = match math::principal_axes(&self.points) {
            Some((_, minor, anisotropy)) if anisotropy >= MIN_ANISOTROPY => minor,
            _ => return,
        };

        for f in self.forces.iter_mut() {
            let off_axis = f.dot(&minor);
            *f -= minor * (off_axis * damping);
        }
    }

    fn volume_constraint(&mut self, target: f32) {
        let perimeter = self.perimeter();
        if perimeter <= f32::EPSILON {
            return;
        }

        let correction = (target - self.area()) / perimeter;
        let normals = self.normals();

        for (f, n) in self.forces.iter_mut().zip(&normals) {
            *f += n * correction;
        }
    }

    fn feedback_forces(&mut self, other: &Outline) {
        if !self.bounds().intersects(&other.bounds()) {
            return;
        }

        let normals = self.normals();
        coupling::repel(&self.points, &normals, &mut self.forces, other);
    }

    fn clear_forces(&mut self) {
        self.forces
            .iter_mut()
            .for_each(|f| *f = na::Vector2::zeros());
    }

    fn displace(&mut self, field: &Field, time_step: f32) -> Result<(), GeometryError> {
        for (p, f) in self.points.iter_mut().zip(self.forces.iter_mut()) {
            *p = field.clip(*p, *p + *f * time_step);
            *f = na::Vector2::zeros();
        }

        let n = self.points.len();
        let distinct = (0..n)
            .filter(|&i| na::distance(&self.points[i], &self.points[(i + 1) % n]) > COINCIDENT)
            .count();

        if distinct < 3 {
            return Err(GeometryError::Degenerate(distinct));
        }

        let area = self.area();
        if !area.is_finite() || area <= f32::EPSILON {
            return Err(GeometryError::Degenerate(distinct));
        }

        self.convergence.push(area);

        Ok(())
    }

    fn resample(
        &mut self,
        min_factor: f32,
        max_factor: f32,
    ) -> Result<Resample<Self>, GeometryError> {
        if self.points.len() < 3 {
            return Err(GeometryError::Degenerate(self.points.len()));
        }

        if first_crossing(&self.points).is_some() {
            // inverted loops are pinched-off slivers, never objects
            let floor = self.min_area.max(f32::EPSILON);
            let mut children: Vec<Polygon> = split_loops(&self.points)
                .into_iter()
                .filter(|l| math::signed_area(l) >= floor)
                .map(|l| self.child(l))
                .collect();

            if children.len() == 1 {
                if let Some(survivor) = children.pop() {
                    self.set_points(survivor.points);
                }

                return Ok(Resample::Resampled);
            }

            return Ok(Resample::Split(children));
        }

        let area = self.area();
        if area < self.min_area {
            return Err(GeometryError::BelowMinArea {
                area,
                min: self.min_area,
            });
        }

        match homogenize(
            &self.points,
            min_factor * self.resolution,
            max_factor * self.resolution,
        ) {
            Some(next) if next.len() < 3 => Err(GeometryError::Degenerate(next.len())),
            Some(next) => {
                self.set_points(next);
                Ok(Resample::Resampled)
            }
            None => Ok(Resample::Unchanged),
        }
    }

    fn dimension(&self, order: u32) -> f32 {
        match order {
            1 => self.perimeter(),
            _ => self.area().abs(),
        }
    }

    #[inline]
    fn convergence(&self) -> &SlidingWindow<f32> {
        &self.convergence
    }

    #[inline]
    fn target_volume(&self) -> f32 {
        self.target_area
    }

    #[inline]
    fn time(&self) -> u32 {
        self.t
    }

    #[inline]
    fn set_color(&mut self, color: [u8; 3]) {
        self.color = color;
    }

    fn next_frame(&self, t: u32) -> Self {
        Self {
            points: self.points.clone(),
            forces: vec![na::Vector2::zeros(); self.points.len()],
            resolution: self.resolution,
            min_area: self.min_area,
            target_area: self.area(),
            t,
            color: self.color,
            convergence: self.convergence.fresh(),
        }
    }
}

fn dedup_closed(mut points: Vec<na::Point2<f32>>) -> Vec<na::Point2<f32>> {
    points.dedup_by(|a, b| na::distance(a, b) <= COINCIDENT);

    while points.len() > 1 && na::distance(&points[0], &points[points.len() - 1]) <= COINCIDENT {
        points.pop();
    }

    points
}
