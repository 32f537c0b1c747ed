pub mod config;
pub mod contour;
pub mod convergence;
pub mod coupling;
pub mod error;
pub mod evolution;
pub mod field;
pub mod frame;
pub mod math;
pub mod polygon;
pub mod region;
pub mod resample;
pub mod track;

pub use config::Config;
pub use contour::{Deformable, Resample, Shape};
pub use convergence::{Operation, SlidingWindow};
pub use error::{Error, GeometryError};
pub use evolution::{EvolutionScheduler, FrameReport, FrameStatus, StopHandle};
pub use field::Field;
pub use frame::Frame;
pub use polygon::{Outline, Polygon};
pub use track::{Link, SegmentId, TrackGraph, TrackPool, TrackSegment};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

/// Exported state of one contour at one time index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContourRecord {
    pub t: u32,
    pub track_id: SegmentId,
    pub color: [u8; 3],
    pub centroid: [f32; 2],
    pub area: f32,
    pub points: Vec<[f32; 2]>,
}

impl ContourRecord {
    fn new(id: SegmentId, contour: &Polygon) -> Self {
        let c = contour.centroid();

        Self {
            t: contour.time(),
            track_id: id,
            color: contour.color(),
            centroid: [c.x, c.y],
            area: contour.area(),
            points: contour.points().iter().map(|p| [p.x, p.y]).collect(),
        }
    }
}

pub trait Tracking {
    fn update(&mut self, frame: &Frame) -> Result<FrameReport>;
    fn contours(&self, t: u32) -> Vec<ContourRecord>;
    fn graph(&self) -> TrackGraph;
}

/// Multi-contour segmentation and tracking over a sequence of frames.
pub struct ActiveContours {
    config: Config,
    tracks: TrackPool<Polygon>,
    scheduler: EvolutionScheduler,
    field: Option<Field>,
    seeded: bool,
}

impl ActiveContours {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let scheduler = EvolutionScheduler::new(&config)?;

        Ok(Self {
            config,
            tracks: TrackPool::new(),
            scheduler,
            field: None,
            seeded: false,
        })
    }

    /// Restricts the motion of every contour to `field` instead of the
    /// frame rectangle.
    pub fn with_field(mut self, field: Field) -> Self {
        self.field = Some(field);
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn tracks(&self) -> &TrackPool<Polygon> {
        &self.tracks
    }

    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.scheduler.stop_handle()
    }

    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.scheduler.on_progress(callback);
    }

    /// Adds one track per outline at time `t`. Outlines that do not form a
    /// valid contour are skipped.
    ///
    /// Returns the number of contours created.
    pub fn seed<I>(&mut self, t: u32, outlines: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<na::Point2<f32>>>,
    {
        let mut accepted = 0;

        for (i, points) in outlines.into_iter().enumerate() {
            match Polygon::from_points(points, t, &self.config) {
                Ok(contour) => {
                    self.tracks.create(contour);
                    accepted += 1;
                }
                Err(err) => log::warn!("frame {}: seed {} discarded: {}", t, i, err),
            }
        }

        if accepted == 0 {
            return Err(Error::NoSeedGeometry(t));
        }

        self.seeded = true;

        Ok(accepted)
    }

    /// Evolves every frame in order, stopping after a cancelled one.
    pub fn run<'a, I>(&mut self, frames: I) -> Result<Vec<FrameReport>>
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let mut reports = Vec::new();

        for frame in frames {
            let report = self.update(frame)?;
            reports.push(report);

            if report.status == FrameStatus::Stopped {
                break;
            }
        }

        Ok(reports)
    }

    fn check(&self, frame: &Frame) -> Result<()> {
        if self.config.uses_regions() && frame.region.is_none() {
            return Err(Error::MissingChannel {
                channel: "region",
                t: frame.t,
            });
        }

        if self.config.uses_edges() && frame.gradient.is_none() {
            return Err(Error::MissingChannel {
                channel: "edge",
                t: frame.t,
            });
        }

        Ok(())
    }
}

impl crate::Tracking for ActiveContours {
    fn update(&mut self, frame: &Frame) -> Result<FrameReport> {
        if !self.seeded {
            return Err(Error::NoSeedGeometry(frame.t));
        }

        self.check(frame)?;

        let copied = self.tracks.advance(frame.t);
        if copied > 0 {
            log::debug!("frame {}: {} contours carried over", frame.t, copied);
        }

        let rect;
        let field = match &self.field {
            Some(field) => field,
            None => {
                rect = Field::rect(frame.width, frame.height);
                &rect
            }
        };

        Ok(self
            .scheduler
            .evolve(&mut self.tracks, frame, field, &self.config))
    }

    fn contours(&self, t: u32) -> Vec<ContourRecord> {
        self.tracks
            .at(t)
            .map(|(id, contour)| ContourRecord::new(id, contour))
            .collect()
    }

    #[inline]
    fn graph(&self) -> TrackGraph {
        self.tracks.graph()
    }
}
