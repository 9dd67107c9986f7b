//! Common structs, algorithms etc. used by gridtrace's kernels and renderer.

#![cfg_attr(target_arch = "spirv", no_std)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::manual_range_contains)]

mod binning;
mod grid;
mod passes;
mod triangle;
mod triangle_vertices;

pub use self::binning::*;
pub use self::grid::*;
pub use self::passes::*;
pub use self::triangle::*;
pub use self::triangle_vertices::*;

/// Number of invocations per work-group of the binning kernels (one
/// invocation handles one triangle).
pub const BINNING_WORKGROUP_SIZE: u32 = 32;

/// Number of invocations per work-group side of the tracing kernel (one
/// invocation handles one pixel).
pub const TRACING_WORKGROUP_SIZE: u32 = 8;
