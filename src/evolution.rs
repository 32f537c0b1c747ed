use crate::config::{Config, EPSILON};
use crate::contour::{Deformable, Resample};
use crate::error::{Error, GeometryError};
use crate::field::Field;
use crate::frame::Frame;
use crate::region::RegionStatistics;
use crate::resample::MAX_RESAMPLE_PASSES;
use crate::track::{SegmentId, TrackPool};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How the evolution of a frame ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Converged,
    /// Iteration cap reached before every contour converged
    IterationCap,
    Stopped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub t: u32,
    pub status: FrameStatus,
    pub iterations: usize,
    /// Recomputations of the region means
    pub region_refreshes: usize,
    pub converged: usize,
    pub total: usize,
}

/// Cooperative cancellation flag shared with the scheduler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    #[inline]
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub type Progress = Box<dyn Fn(f32) + Send + Sync>;

struct Live<C> {
    id: SegmentId,
    contour: C,
    evolving: bool,
}

/// Drives the contours of one frame to convergence on a private worker pool.
pub struct EvolutionScheduler {
    workers: rayon::ThreadPool,
    stop: StopHandle,
    progress: Option<Progress>,
}

impl EvolutionScheduler {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = config.workers {
            builder = builder.num_threads(n);
        }

        Ok(Self {
            workers: builder.build()?,
            stop: StopHandle::default(),
            progress: None,
        })
    }

    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Registers a callback receiving the converged fraction of the frame
    /// after every convergence check.
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    /// Evolves every contour of `frame.t` until convergence, cancellation or
    /// the iteration cap. Splits and pruned contours are applied to `tracks`.
    pub fn evolve<C: Deformable>(
        &self,
        tracks: &mut TrackPool<C>,
        frame: &Frame,
        field: &Field,
        config: &Config,
    ) -> FrameReport {
        let t = frame.t;
        let mut live: Vec<Live<C>> = tracks
            .take_frame(t)
            .into_iter()
            .map(|(id, contour)| Live {
                id,
                contour,
                evolving: true,
            })
            .collect();

        log::info!("frame {}: evolving {} contours", t, live.len());

        let report = self
            .workers
            .install(|| self.iterate(tracks, &mut live, frame, field, config));

        tracks.restore(t, live.into_iter().map(|l| (l.id, l.contour)).collect());

        log::info!(
            "frame {}: {:?} after {} iterations, {}/{} converged",
            t,
            report.status,
            report.iterations,
            report.converged,
            report.total
        );

        report
    }

    fn iterate<C: Deformable>(
        &self,
        tracks: &mut TrackPool<C>,
        live: &mut Vec<Live<C>>,
        frame: &Frame,
        field: &Field,
        config: &Config,
    ) -> FrameReport {
        let t = frame.t;
        let period = config.region_refresh_period();
        let mut stats = RegionStatistics::new();
        let mut stale = true;
        let mut iterations = 0;
        let mut refreshes = 0;

        let status = loop {
            if self.stop.is_stopped() {
                break FrameStatus::Stopped;
            }

            for l in live.iter_mut().filter(|l| l.evolving) {
                l.evolving = !is_converged(&l.contour, config);
            }

            let converged = live.iter().filter(|l| !l.evolving).count();
            self.report(converged, live.len());

            if converged == live.len() {
                break FrameStatus::Converged;
            }

            if iterations >= config.max_iterations {
                break FrameStatus::IterationCap;
            }

            stale |= self.resample(tracks, live, t, config);

            if self.stop.is_stopped() {
                break FrameStatus::Stopped;
            }

            if !live.iter().any(|l| l.evolving) {
                continue;
            }

            if let Some(region) = frame.region.as_ref().filter(|_| config.uses_regions()) {
                if stale || iterations % period == 0 {
                    let outlines: Vec<_> = live
                        .par_iter()
                        .map(|l| (l.id, l.contour.shape()))
                        .collect();

                    stats.refresh(region, &outlines);
                    stale = false;
                    refreshes += 1;

                    if self.stop.is_stopped() {
                        break FrameStatus::Stopped;
                    }
                }
            }

            let failed: Vec<(SegmentId, GeometryError)> = if config.coupling {
                let outlines: Vec<_> = live
                    .par_iter()
                    .map(|l| (l.id, l.contour.shape()))
                    .collect();

                live.par_iter_mut().filter(|l| l.evolving).for_each(|l| {
                    accumulate(&mut l.contour, l.id, frame, &stats, config);

                    for (id, outline) in &outlines {
                        if *id != l.id {
                            l.contour.feedback_forces(outline);
                        }
                    }
                });

                if self.stop.is_stopped() {
                    live.iter_mut().for_each(|l| l.contour.clear_forces());
                    break FrameStatus::Stopped;
                }

                live.par_iter_mut()
                    .filter(|l| l.evolving)
                    .filter_map(|l| {
                        let moved = l.contour.displace(field, config.time_step);
                        moved.err().map(|e| (l.id, e))
                    })
                    .collect()
            } else {
                live.par_iter_mut()
                    .filter(|l| l.evolving)
                    .filter_map(|l| {
                        accumulate(&mut l.contour, l.id, frame, &stats, config);
                        let moved = l.contour.displace(field, config.time_step);
                        moved.err().map(|e| (l.id, e))
                    })
                    .collect()
            };

            for (id, err) in failed {
                log::debug!("frame {}: segment {:?} pruned: {}", t, id, err);
                live.retain(|l| l.id != id);
                tracks.detach(id, t);
                stale = true;
            }

            iterations += 1;
        };

        FrameReport {
            t,
            status,
            iterations,
            region_refreshes: refreshes,
            converged: live.iter().filter(|l| !l.evolving).count(),
            total: live.len(),
        }
    }

    /// Resamples the evolving contours until none of them changes and
    /// applies splits and removals to the track graph.
    ///
    /// Returns `true` if the set of live contours changed.
    fn resample<C: Deformable>(
        &self,
        tracks: &mut TrackPool<C>,
        live: &mut Vec<Live<C>>,
        t: u32,
        config: &Config,
    ) -> bool {
        let (min, max) = (config.min_spacing_factor, config.max_spacing_factor);
        let mut changed = false;

        for _ in 0..MAX_RESAMPLE_PASSES {
            let outcomes: Vec<(usize, Result<Resample<C>, GeometryError>)> = live
                .par_iter_mut()
                .enumerate()
                .filter(|(_, l)| l.evolving)
                .map(|(i, l)| (i, l.contour.resample(min, max)))
                .collect();

            if outcomes
                .iter()
                .all(|(_, r)| matches!(r, Ok(Resample::Unchanged)))
            {
                return changed;
            }

            let mut spawned = Vec::new();

            // highest index first so removals keep the pending indices valid
            for (i, outcome) in outcomes.into_iter().rev() {
                match outcome {
                    Ok(Resample::Unchanged) | Ok(Resample::Resampled) => {}
                    Ok(Resample::Split(mut children)) => {
                        let parent = live.remove(i);
                        let ids = tracks.branch(parent.id, t, &mut children);

                        log::debug!(
                            "frame {}: segment {:?} split into {:?}",
                            t,
                            parent.id,
                            ids
                        );

                        spawned.extend(ids.into_iter().zip(children).map(|(id, contour)| Live {
                            id,
                            contour,
                            evolving: true,
                        }));
                        changed = true;
                    }
                    Err(err) => {
                        let gone = live.remove(i);
                        log::debug!("frame {}: segment {:?} pruned: {}", t, gone.id, err);

                        tracks.detach(gone.id, t);
                        changed = true;
                    }
                }
            }

            live.extend(spawned);
            live.sort_by_key(|l| l.id);
        }

        log::debug!(
            "frame {}: resampling did not settle after {} passes",
            t,
            MAX_RESAMPLE_PASSES
        );

        changed
    }

    fn report(&self, converged: usize, total: usize) {
        if let Some(progress) = &self.progress {
            let fraction = if total == 0 {
                1.0
            } else {
                converged as f32 / total as f32
            };

            progress(fraction);
        }
    }
}

fn is_converged<C: Deformable>(contour: &C, config: &Config) -> bool {
    contour
        .convergence()
        .criterion(config.convergence_operation)
        .map_or(false, |c| c <= config.convergence_threshold)
}

/// Adds every enabled force term except the coupling feedback.
fn accumulate<C: Deformable>(
    contour: &mut C,
    id: SegmentId,
    frame: &Frame,
    stats: &RegionStatistics,
    config: &Config,
) {
    if config.regularization_weight > EPSILON {
        contour.internal_forces(config.regularization_weight);
    }

    if config.uses_edges() {
        if let Some((gx, gy)) = &frame.gradient {
            contour.edge_forces(gx, gy, config.edge_weight);
        }
    }

    if config.uses_regions() {
        if let (Some(region), Some(mean_in), Some(mean_out)) =
            (&frame.region, stats.mean_in(id), stats.mean_out())
        {
            contour.region_forces(
                region,
                config.region_weight,
                config.region_sensitivity,
                mean_in,
                mean_out,
            );
        }
    }

    if config.balloon_weight.abs() > EPSILON {
        contour.balloon_forces(config.balloon_weight);
    }

    if config.volume_constraint {
        let target = contour.target_volume();
        contour.volume_constraint(target);
    }

    if config.axis_weight > EPSILON {
        contour.axis_forces(config.axis_weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Polygon;
    use crate::region::Mask;
    use nalgebra as na;
    use ndarray::Array2;
    use std::sync::Mutex;

    const SIZE: usize = 64;

    fn disk_image(cx: f32, cy: f32, r: f32) -> Array2<f32> {
        Array2::from_shape_fn((SIZE, SIZE), |(y, x)| {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            if dx * dx + dy * dy <= r * r {
                1.0
            } else {
                0.0
            }
        })
    }

    fn region_frame(image: Array2<f32>) -> Frame {
        Frame::new(0, SIZE, SIZE).with_region(image).unwrap()
    }

    fn region_config() -> Config {
        Config {
            regularization_weight: 0.0,
            region_weight: 1.0,
            max_iterations: 2000,
            workers: Some(2),
            ..Config::default()
        }
    }

    fn evolve(
        config: &Config,
        seeds: Vec<Polygon>,
        frame: &Frame,
    ) -> (TrackPool<Polygon>, FrameReport) {
        let mut tracks = TrackPool::new();
        for seed in seeds {
            tracks.create(seed);
        }

        let scheduler = EvolutionScheduler::new(config).unwrap();
        let report = scheduler.evolve(&mut tracks, frame, &Field::rect(SIZE, SIZE), config);

        (tracks, report)
    }

    fn final_contours(tracks: &TrackPool<Polygon>) -> Vec<Polygon> {
        tracks.at(0).map(|(_, c)| c.clone()).collect()
    }

    fn overlap(a: &Polygon, b: &Polygon) -> usize {
        let mut ma = Mask::new(SIZE, SIZE);
        let mut mb = Mask::new(SIZE, SIZE);
        ma.fill(&a.shape());
        mb.fill(&b.shape());

        (0..SIZE)
            .flat_map(|y| (0..SIZE).map(move |x| (x, y)))
            .filter(|&(x, y)| ma.get(x, y) && mb.get(x, y))
            .count()
    }

    fn dumbbell() -> Vec<na::Point2<f32>> {
        let (left, right, r, half) = (20.0f32, 44.0f32, 8.0f32, 2.0f32);
        let attach = (half / r).asin();
        let arc = |cx: f32, from: f32, to: f32| {
            let steps = 24;
            (0..=steps)
                .map(|i| {
                    let a = from + (to - from) * i as f32 / steps as f32;
                    na::Point2::new(cx + r * a.cos(), 32.0 + r * a.sin())
                })
                .collect::<Vec<_>>()
        };

        // left lobe, bottom side of the neck, right lobe, top side of the neck
        let mut points = arc(left, attach, std::f32::consts::TAU - attach);
        points.extend(arc(
            right,
            std::f32::consts::PI + attach,
            3.0 * std::f32::consts::PI - attach,
        ));

        points
    }

    #[test]
    fn disk_is_segmented() {
        let config = region_config();
        let frame = region_frame(disk_image(32.0, 32.0, 15.0));
        let seed = Polygon::circle(na::Point2::new(32.0, 32.0), 10.0, 0, &config).unwrap();

        let (tracks, report) = evolve(&config, vec![seed], &frame);

        assert_eq!(report.status, FrameStatus::Converged);
        assert_eq!((report.converged, report.total), (1, 1));

        let contours = final_contours(&tracks);
        assert_eq!(contours.len(), 1);

        let expected = std::f32::consts::PI * 15.0 * 15.0;
        let area = contours[0].area();
        assert!(area > 0.8 * expected && area < 1.2 * expected, "area {}", area);

        let c = contours[0].centroid();
        assert!((c - na::Point2::new(32.0, 32.0)).norm() < 1.0);
    }

    #[test]
    fn lone_contour_ignores_coupling() {
        let frame = region_frame(disk_image(30.0, 33.0, 14.0));
        let coupled = Config {
            coupling: true,
            max_iterations: 150,
            ..region_config()
        };
        let uncoupled = Config {
            coupling: false,
            ..coupled.clone()
        };

        let seed = || Polygon::circle(na::Point2::new(32.0, 32.0), 9.0, 0, &coupled).unwrap();

        let (a, ra) = evolve(&coupled, vec![seed()], &frame);
        let (b, rb) = evolve(&uncoupled, vec![seed()], &frame);

        assert_eq!(ra, rb);
        assert_eq!(final_contours(&a)[0].points(), final_contours(&b)[0].points());
    }

    #[test]
    fn coupling_keeps_contours_apart() {
        let image = Array2::from_shape_fn((SIZE, SIZE), |(y, x)| {
            if (20..=44).contains(&x) && (20..=44).contains(&y) {
                1.0
            } else {
                0.0
            }
        });
        let frame = region_frame(image);

        let run = |coupling: bool| {
            let config = Config {
                coupling,
                regularization_weight: 0.05,
                max_iterations: 400,
                ..region_config()
            };

            let seeds = vec![
                Polygon::circle(na::Point2::new(28.0, 32.0), 6.0, 0, &config).unwrap(),
                Polygon::circle(na::Point2::new(36.0, 32.0), 6.0, 0, &config).unwrap(),
            ];

            let (tracks, _) = evolve(&config, seeds, &frame);
            let contours = final_contours(&tracks);
            assert_eq!(contours.len(), 2);

            let smaller = contours[0].area().min(contours[1].area());
            (overlap(&contours[0], &contours[1]) as f32, smaller)
        };

        let (shared, smaller) = run(true);
        assert!(shared < 0.15 * smaller, "coupled overlap {} of {}", shared, smaller);

        let (shared, smaller) = run(false);
        assert!(shared > 0.5 * smaller, "uncoupled overlap {} of {}", shared, smaller);
    }

    #[test]
    fn dumbbell_pinches_into_two() {
        let config = Config {
            regularization_weight: 0.05,
            region_weight: 0.0,
            balloon_weight: -1.0,
            coupling: false,
            max_iterations: 40,
            workers: Some(2),
            ..Config::default()
        };

        let seed = Polygon::from_points(dumbbell(), 0, &config).unwrap();
        let (tracks, report) = evolve(&config, vec![seed], &Frame::new(0, SIZE, SIZE));

        assert_eq!(report.status, FrameStatus::IterationCap);
        assert_eq!(report.total, 2);

        let mut lobes = final_contours(&tracks);
        assert_eq!(lobes.len(), 2);
        lobes.sort_by(|a, b| a.centroid().x.total_cmp(&b.centroid().x));
        assert!(lobes[0].centroid().x < 32.0);
        assert!(lobes[1].centroid().x > 32.0);
        assert!(lobes.iter().all(|l| l.area() > config.min_area));

        // the root had no history before the split
        assert_eq!(tracks.len(), 2);
        assert!(tracks.links().is_empty());
    }

    #[test]
    fn vanishing_contour_is_pruned() {
        let config = Config {
            region_weight: 0.0,
            balloon_weight: -1.0,
            max_iterations: 20,
            workers: Some(1),
            ..Config::default()
        };

        let keep = Polygon::circle(na::Point2::new(40.0, 40.0), 10.0, 0, &config).unwrap();
        let doomed = Polygon::circle(na::Point2::new(10.0, 10.0), 2.0, 0, &config).unwrap();

        let mut tracks = TrackPool::new();
        let kept = tracks.create(keep);
        tracks.create(doomed);

        let scheduler = EvolutionScheduler::new(&config).unwrap();
        let frame = Frame::new(0, SIZE, SIZE);
        let report = scheduler.evolve(&mut tracks, &frame, &Field::rect(SIZE, SIZE), &config);

        assert_eq!(report.status, FrameStatus::IterationCap);
        assert_eq!(report.total, 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks.at(0).map(|(id, _)| id).collect::<Vec<_>>(), vec![kept]);
    }

    #[test]
    fn stop_keeps_partial_progress() {
        let config = region_config();
        let frame = region_frame(disk_image(32.0, 32.0, 15.0));
        let seed = Polygon::circle(na::Point2::new(32.0, 32.0), 10.0, 0, &config).unwrap();

        let mut tracks = TrackPool::new();
        tracks.create(seed);

        let mut scheduler = EvolutionScheduler::new(&config).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        scheduler.on_progress(move |p| sink.lock().unwrap().push(p));

        let stop = scheduler.stop_handle();
        stop.stop();

        let report = scheduler.evolve(&mut tracks, &frame, &Field::rect(SIZE, SIZE), &config);
        assert_eq!(report.status, FrameStatus::Stopped);
        assert_eq!(report.iterations, 0);
        assert_eq!(tracks.at(0).count(), 1);
        assert!(seen.lock().unwrap().is_empty());

        stop.reset();
        let report = scheduler.evolve(&mut tracks, &frame, &Field::rect(SIZE, SIZE), &config);
        assert_eq!(report.status, FrameStatus::Converged);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), report.iterations + 1);
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn region_means_follow_the_refresh_cadence() {
        let config = Config {
            max_iterations: 10,
            region_refresh_period: Some(4),
            ..region_config()
        };
        let frame = region_frame(disk_image(32.0, 32.0, 15.0));
        let seed = || Polygon::circle(na::Point2::new(32.0, 32.0), 10.0, 0, &config).unwrap();

        let (_, report) = evolve(&config, vec![seed()], &frame);
        assert_eq!(report.status, FrameStatus::IterationCap);
        // iterations 0, 4 and 8
        assert_eq!(report.region_refreshes, 3);

        let sparse = Config {
            region_refresh_period: Some(1000),
            ..config.clone()
        };
        let (_, report) = evolve(&sparse, vec![seed()], &frame);
        assert_eq!(report.region_refreshes, 1);
    }

    #[test]
    fn pruning_refreshes_region_means() {
        let config = Config {
            region_weight: 0.01,
            balloon_weight: -1.0,
            max_iterations: 20,
            region_refresh_period: Some(1000),
            workers: Some(2),
            ..Config::default()
        };
        let frame = region_frame(Array2::zeros((SIZE, SIZE)));

        let keep = Polygon::circle(na::Point2::new(40.0, 40.0), 10.0, 0, &config).unwrap();
        let doomed = Polygon::circle(na::Point2::new(10.0, 10.0), 2.0, 0, &config).unwrap();

        let (tracks, report) = evolve(&config, vec![keep, doomed], &frame);
        assert_eq!(report.total, 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(report.region_refreshes, 2);
    }

    #[test]
    fn stop_requested_mid_iteration_skips_the_step() {
        let config = region_config();
        let frame = region_frame(disk_image(32.0, 32.0, 15.0));
        let seed = Polygon::circle(na::Point2::new(32.0, 32.0), 10.0, 0, &config).unwrap();
        let before = seed.points().to_vec();

        let mut tracks = TrackPool::new();
        tracks.create(seed);

        let mut scheduler = EvolutionScheduler::new(&config).unwrap();
        let stop = scheduler.stop_handle();
        scheduler.on_progress(move |_| stop.stop());

        let report = scheduler.evolve(&mut tracks, &frame, &Field::rect(SIZE, SIZE), &config);
        assert_eq!(report.status, FrameStatus::Stopped);
        assert_eq!((report.iterations, report.region_refreshes), (0, 0));

        let contours = final_contours(&tracks);
        assert_eq!(contours[0].points(), &before[..]);
    }

    #[test]
    fn scheduler_uses_configured_workers() {
        let config = region_config();
        let scheduler = EvolutionScheduler::new(&config).unwrap();

        assert_eq!(scheduler.workers(), 2);
    }

    #[test]
    fn empty_frame_converges_immediately() {
        let config = region_config();
        let (_, report) = evolve(&config, Vec::new(), &Frame::new(0, SIZE, SIZE));

        assert_eq!(report.status, FrameStatus::Converged);
        assert_eq!((report.iterations, report.total), (0, 0));
    }
}
