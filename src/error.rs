use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel {channel} is out of range ({available} channels available)")]
    ChannelOutOfRange { channel: usize, available: usize },

    #[error("Frame {t} has no {channel} data but the configured weights need it")]
    MissingChannel { channel: &'static str, t: u32 },

    #[error("No seed geometry available at frame {0}")]
    NoSeedGeometry(u32),

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Faults of a single contour. These never reach the caller of the
/// evolution: the contour is dropped and its track segment detached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("contour has {0} distinct vertices, at least 3 are required")]
    Degenerate(usize),

    #[error("contour area {area} is below the minimum area {min}")]
    BelowMinArea { area: f32, min: f32 },

    #[error("contour intersects itself")]
    SelfIntersecting,

    #[error("contour has a non-finite vertex")]
    NonFinite,
}
