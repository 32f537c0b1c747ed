use crate::config::Config;
use crate::error::Error;
use crate::math::gauss;
use ndarray::{Array2, Axis};

/// Smoothing applied to the edge channel before differentiation.
const EDGE_SIGMA: f32 = 1.0;

/// Read-only intensity data of one time index.
#[derive(Debug, Clone)]
pub struct Frame {
    pub t: u32,
    pub width: usize,
    pub height: usize,

    /// x and y derivatives of the edge channel
    pub gradient: Option<(Array2<f32>, Array2<f32>)>,

    /// region channel, rescaled to [0, 1]
    pub region: Option<Array2<f32>>,
}

impl Frame {
    pub fn new(t: u32, width: usize, height: usize) -> Self {
        Self {
            t,
            width,
            height,
            gradient: None,
            region: None,
        }
    }

    pub fn with_gradient(mut self, gx: Array2<f32>, gy: Array2<f32>) -> Result<Self, Error> {
        self.check(&gx)?;
        self.check(&gy)?;
        self.gradient = Some((gx, gy));

        Ok(self)
    }

    pub fn with_region(mut self, region: Array2<f32>) -> Result<Self, Error> {
        self.check(&region)?;
        self.region = Some(region);

        Ok(self)
    }

    /// Builds a frame from raw image channels, preparing the channels the
    /// configured weights need: the region channel is rescaled by its
    /// maximum, the edge channel is rescaled, smoothed and differentiated.
    pub fn from_channels(t: u32, channels: &[Array2<f32>], config: &Config) -> Result<Self, Error> {
        let pick = |channel: usize| {
            channels.get(channel).ok_or(Error::ChannelOutOfRange {
                channel,
                available: channels.len(),
            })
        };

        let (height, width) = match channels.first() {
            Some(first) => first.dim(),
            None => (0, 0),
        };

        let mut frame = Frame::new(t, width, height);

        if config.uses_regions() {
            let region = pick(config.region_channel)?;
            frame = frame.with_region(normalized(region))?;
        }

        if config.uses_edges() {
            let edge = pick(config.edge_channel)?;
            let smooth = smoothed(&normalized(edge), EDGE_SIGMA);
            let (gx, gy) = gradient(&smooth);
            frame = frame.with_gradient(gx, gy)?;
        }

        Ok(frame)
    }

    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn check(&self, field: &Array2<f32>) -> Result<(), Error> {
        let (h, w) = field.dim();
        if (w, h) != (self.width, self.height) {
            return Err(Error::DimensionMismatch {
                expected: (self.width, self.height),
                actual: (w, h),
            });
        }

        Ok(())
    }
}

fn normalized(field: &Array2<f32>) -> Array2<f32> {
    let max = field.iter().fold(0.0f32, |m, v| m.max(v.abs()));

    if max > f32::EPSILON {
        field.mapv(|v| v / max)
    } else {
        field.clone()
    }
}

/// Separable gaussian blur with a `3 * sigma` radius, border samples clamped.
fn smoothed(field: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f32> = (-radius..=radius).map(|i| gauss(i as f32, sigma)).collect();
    let norm: f32 = kernel.iter().sum();

    let convolve = |src: &Array2<f32>, axis: Axis| {
        let (h, w) = src.dim();
        let mut dst = Array2::zeros((h, w));

        for ((y, x), out) in dst.indexed_iter_mut() {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let offset = k as isize - radius;
                let (sy, sx) = match axis {
                    Axis(0) => (clamped(y, offset, h), x),
                    _ => (y, clamped(x, offset, w)),
                };
                acc += src[[sy, sx]] * weight;
            }

            *out = acc / norm;
        }

        dst
    };

    let rows = convolve(field, Axis(1));
    convolve(&rows, Axis(0))
}

#[inline]
fn clamped(i: usize, offset: isize, len: usize) -> usize {
    (i as isize + offset).clamp(0, len as isize - 1) as usize
}

/// Central differences, one-sided at the border.
fn gradient(field: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = field.dim();

    let derivative = |n: usize, i: usize, at: &dyn Fn(usize) -> f32| {
        if n < 2 {
            return 0.0;
        }

        let lo = i.saturating_sub(1);
        let hi = (i + 1).min(n - 1);

        (at(hi) - at(lo)) / (hi - lo) as f32
    };

    let gx = Array2::from_shape_fn((h, w), |(y, x)| derivative(w, x, &|i| field[[y, i]]));
    let gy = Array2::from_shape_fn((h, w), |(y, x)| derivative(h, y, &|i| field[[i, x]]));

    (gx, gy)
}
