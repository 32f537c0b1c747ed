//! Capabilities shared by every contour variant.
//!
//! The scheduler only talks to contours through [`Deformable`]; the 2D
//! [`Polygon`](crate::polygon::Polygon) is the variant implemented here.

use crate::convergence::SlidingWindow;
use crate::error::GeometryError;
use crate::field::Field;
use crate::math::Bounds;
use nalgebra as na;
use ndarray::Array2;

/// Immutable derived shape of a contour, used for interior tests and
/// rasterization while the contour itself is being deformed.
pub trait Shape: Send + Sync {
    fn bounds(&self) -> Bounds;

    fn contains(&self, p: na::Point2<f32>) -> bool;

    /// Marks the pixels of image row `y` that lie inside the shape.
    fn fill_row(&self, y: usize, row: &mut [u8]);
}

/// Outcome of a resampling pass.
#[derive(Debug)]
pub enum Resample<C> {
    Unchanged,
    Resampled,
    /// The contour crossed itself and was cut into these children. The
    /// parent must be retired, an empty list means nothing worth keeping.
    Split(Vec<C>),
}

impl<C> Resample<C> {
    #[inline]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Resample::Unchanged)
    }
}

/// Force accumulation and motion of a deformable contour.
///
/// Force terms only add to a per-vertex accumulator, geometry changes in
/// [`Deformable::displace`] and [`Deformable::resample`] only.
pub trait Deformable: Sized + Send + Sync {
    type Shape: Shape;

    fn shape(&self) -> Self::Shape;

    fn internal_forces(&mut self, weight: f32);

    fn edge_forces(&mut self, grad_x: &Array2<f32>, grad_y: &Array2<f32>, weight: f32);

    fn region_forces(
        &mut self,
        intensity: &Array2<f32>,
        weight: f32,
        sensitivity: f32,
        mean_in: f32,
        mean_out: f32,
    );

    fn balloon_forces(&mut self, weight: f32);

    fn axis_forces(&mut self, weight: f32);

    fn volume_constraint(&mut self, target: f32);

    fn feedback_forces(&mut self, other: &Self::Shape);

    fn clear_forces(&mut self);

    /// Moves every vertex by `time_step` times its accumulated force, keeps
    /// it inside `field`, resets the forces and samples the convergence
    /// metric.
    fn displace(&mut self, field: &Field, time_step: f32) -> Result<(), GeometryError>;

    fn resample(
        &mut self,
        min_factor: f32,
        max_factor: f32,
    ) -> Result<Resample<Self>, GeometryError>;

    /// Length for `order == 1`, enclosed area otherwise.
    fn dimension(&self, order: u32) -> f32;

    fn convergence(&self) -> &SlidingWindow<f32>;

    fn target_volume(&self) -> f32;

    fn time(&self) -> u32;

    fn set_color(&mut self, color: [u8; 3]);

    /// Copy of this contour placed at time `t`, with an empty convergence
    /// window.
    fn next_frame(&self, t: u32) -> Self;
}
