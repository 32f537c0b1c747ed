use crate::contour::Shape;
use crate::track::SegmentId;
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::HashMap;

/// Binary label buffer the size of the image, one byte per pixel.
#[derive(Debug, Clone)]
pub struct Mask {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0);
    }

    /// Labels every pixel inside `shape`.
    pub fn fill<S: Shape + ?Sized>(&mut self, shape: &S) {
        let bounds = shape.bounds();
        if self.width == 0 || self.height == 0 {
            return;
        }

        if bounds.bottom < 0.0 || bounds.top > (self.height - 1) as f32 {
            return;
        }

        let top = bounds.top.max(0.0).ceil() as usize;
        let bottom = (bounds.bottom.floor() as usize).min(self.height - 1);

        for (y, row) in self
            .data
            .chunks_exact_mut(self.width)
            .enumerate()
            .take(bottom + 1)
            .skip(top)
        {
            shape.fill_row(y, row);
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }

    /// Mean of `intensity` over labeled pixels when `labeled` is true, over
    /// unlabeled ones otherwise. `None` for an empty selection.
    pub fn mean(&self, intensity: &Array2<f32>, labeled: bool) -> Option<f32> {
        let (sum, count) = self
            .data
            .chunks_exact(self.width.max(1))
            .zip(intensity.rows())
            .fold((0.0f64, 0usize), |acc, (mask, values)| {
                let (s, c) = row_sum(mask, values.iter(), labeled);
                (acc.0 + s, acc.1 + c)
            });

        average(sum, count)
    }
}

fn row_sum<'a>(
    mask: &[u8],
    values: impl Iterator<Item = &'a f32>,
    labeled: bool,
) -> (f64, usize) {
    mask.iter()
        .zip(values)
        .filter(|(m, _)| (**m != 0) == labeled)
        .fold((0.0, 0), |(s, c), (_, v)| (s + *v as f64, c + 1))
}

#[inline]
fn average(sum: f64, count: usize) -> Option<f32> {
    if count == 0 {
        None
    } else {
        Some((sum / count as f64) as f32)
    }
}

/// Interior mean per track segment and the shared background mean of the
/// region field.
#[derive(Debug, Default, Clone)]
pub struct RegionStatistics {
    means: HashMap<SegmentId, Option<f32>>,
    background: Option<f32>,
}

impl RegionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every mean from the current outlines. Runs on the current
    /// rayon pool.
    pub fn refresh<S: Shape>(&mut self, intensity: &Array2<f32>, outlines: &[(SegmentId, S)]) {
        let (height, width) = intensity.dim();

        self.means = outlines
            .par_iter()
            .map_init(
                || Mask::new(width, height),
                |mask, (id, outline)| {
                    mask.clear();
                    mask.fill(outline);
                    (*id, mask.mean(intensity, true))
                },
            )
            .collect();

        let mut labels = vec![0u8; width * height];
        let rows: Vec<(f64, usize)> = labels
            .par_chunks_mut(width.max(1))
            .enumerate()
            .map(|(y, row)| {
                for (_, outline) in outlines {
                    outline.fill_row(y, row);
                }

                row_sum(row, intensity.row(y).iter(), false)
            })
            .collect();

        let (sum, count) = rows
            .iter()
            .fold((0.0f64, 0usize), |acc, (s, c)| (acc.0 + s, acc.1 + c));
        self.background = average(sum, count);

        log::debug!(
            "region means refreshed: {} interiors, background {:?}",
            self.means.len(),
            self.background
        );
    }

    #[inline]
    pub fn mean_in(&self, id: SegmentId) -> Option<f32> {
        self.means.get(&id).copied().flatten()
    }

    #[inline]
    pub fn mean_out(&self) -> Option<f32> {
        self.background
    }

    pub fn clear(&mut self) {
        self.means.clear();
        self.background = None;
    }
}
