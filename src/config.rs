use crate::convergence::Operation;
use crate::error::Error;
use serde_derive::{Deserialize, Serialize};

/// Weights below this magnitude switch the corresponding force term off.
pub const EPSILON: f32 = 0.000_000_1;

/// Tunables of the evolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Contour smoothness
    pub regularization_weight: f32,

    /// Positive values push contours toward increasing intensities,
    /// negative values toward decreasing ones
    pub edge_weight: f32,
    pub edge_channel: usize,

    pub region_weight: f32,
    pub region_sensitivity: f32,
    pub region_channel: usize,

    /// Positive values inflate, negative values deflate
    pub balloon_weight: f32,

    /// Restricts the evolution to the principal axis, in [0, 1]
    pub axis_weight: f32,

    /// Prevents contours from overlapping
    pub coupling: bool,

    /// Keeps the enclosed area close to the one the contour started the frame with
    pub volume_constraint: bool,

    /// Distance in pixels between control points
    pub resolution: f32,

    /// Contours enclosing fewer pixels are removed
    pub min_area: f32,

    pub time_step: f32,

    pub convergence_window: usize,
    pub convergence_operation: Operation,

    /// A contour has converged once its windowed criterion is at or below this value
    pub convergence_threshold: f32,

    pub max_iterations: usize,

    /// Iterations between two refreshes of the region means, `None` means a
    /// third of the convergence window
    pub region_refresh_period: Option<usize>,

    pub min_spacing_factor: f32,
    pub max_spacing_factor: f32,

    /// Worker threads, `None` means the available hardware parallelism
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regularization_weight: 0.05,
            edge_weight: 0.0,
            edge_channel: 0,
            region_weight: 1.0,
            region_sensitivity: 1.0,
            region_channel: 0,
            balloon_weight: 0.0,
            axis_weight: 0.0,
            coupling: true,
            volume_constraint: false,
            resolution: 2.0,
            min_area: 10.0,
            time_step: 0.1,
            convergence_window: 50,
            convergence_operation: Operation::VarCoeff,
            convergence_threshold: 0.001,
            max_iterations: 10_000,
            region_refresh_period: None,
            min_spacing_factor: 0.8,
            max_spacing_factor: 1.4,
            workers: None,
        }
    }
}

impl Config {
    /// Sets the contour resolution together with a matching convergence window.
    pub fn with_resolution(mut self, resolution: f32) -> Self {
        self.resolution = resolution;
        if resolution > 0.0 {
            self.convergence_window = ((100.0 / resolution) as usize).max(2);
        }

        self
    }

    #[inline]
    pub fn uses_edges(&self) -> bool {
        self.edge_weight.abs() > EPSILON
    }

    #[inline]
    pub fn uses_regions(&self) -> bool {
        self.region_weight > EPSILON
    }

    #[inline]
    pub fn region_refresh_period(&self) -> usize {
        self.region_refresh_period
            .unwrap_or(self.convergence_window / 3)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let finite = [
            ("regularization_weight", self.regularization_weight),
            ("edge_weight", self.edge_weight),
            ("region_weight", self.region_weight),
            ("region_sensitivity", self.region_sensitivity),
            ("balloon_weight", self.balloon_weight),
            ("axis_weight", self.axis_weight),
            ("resolution", self.resolution),
            ("min_area", self.min_area),
            ("time_step", self.time_step),
            ("convergence_threshold", self.convergence_threshold),
            ("min_spacing_factor", self.min_spacing_factor),
            ("max_spacing_factor", self.max_spacing_factor),
        ];

        for (name, value) in finite {
            if !value.is_finite() {
                return Err(invalid(format!("{} must be finite, got {}", name, value)));
            }
        }

        if self.regularization_weight < 0.0 || self.region_weight < 0.0 {
            return Err(invalid("regularization and region weights must be non-negative"));
        }

        if !(0.0..=1.0).contains(&self.axis_weight) {
            return Err(invalid(format!(
                "axis_weight must lie in [0, 1], got {}",
                self.axis_weight
            )));
        }

        if self.region_sensitivity <= 0.0 {
            return Err(invalid("region_sensitivity must be positive"));
        }

        if self.resolution <= 0.0 || self.time_step <= 0.0 {
            return Err(invalid("resolution and time_step must be positive"));
        }

        if self.min_area < 0.0 || self.convergence_threshold < 0.0 {
            return Err(invalid("min_area and convergence_threshold must be non-negative"));
        }

        if self.convergence_window < 2 {
            return Err(invalid(format!(
                "convergence_window must hold at least 2 samples, got {}",
                self.convergence_window
            )));
        }

        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be positive"));
        }

        if self.min_spacing_factor <= 0.0 || self.min_spacing_factor >= self.max_spacing_factor {
            return Err(invalid(format!(
                "spacing factors must satisfy 0 < min < max, got {} and {}",
                self.min_spacing_factor, self.max_spacing_factor
            )));
        }

        if self.workers == Some(0) {
            return Err(invalid("workers must be positive"));
        }

        Ok(())
    }
}

fn invalid<S: Into<String>>(msg: S) -> Error {
    Error::InvalidConfig(msg.into())
}
