use thiserror::Error;

/// Failure reported by a [`crate::Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("couldn't allocate `{label}` ({size} bytes): {reason}")]
    Allocation {
        label: String,
        size: usize,
        reason: String,
    },

    #[error("couldn't read buffer back: {0}")]
    Readback(String),

    #[error("couldn't dispatch `{kernel}`: {reason}")]
    Dispatch {
        kernel: &'static str,
        reason: String,
    },

    #[error("invalid bindings for `{kernel}`: {reason}")]
    InvalidBindings {
        kernel: &'static str,
        reason: String,
    },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Failure reported while building the acceleration structure.
///
/// Whenever a build fails, the previously published grid (if any) is kept.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("scene contains no usable triangles")]
    EmptyScene,

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("too many triangles: {count} (max. {max})")]
    TooManyTriangles { count: usize, max: usize },

    #[error("too many grid cells: {count} (max. {max})")]
    TooManyCells { count: u64, max: u64 },

    #[error("too many triangle-cell pairs: {count} (max. {max})")]
    TooManyPairs { count: u64, max: u64 },

    #[error("binning produced corrupted output: {0}")]
    Corrupted(String),

    #[error("build has been cancelled")]
    Cancelled,

    #[error("another rebuild is already in progress")]
    RebuildInProgress,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
