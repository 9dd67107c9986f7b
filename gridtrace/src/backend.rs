//! Abstraction over the compute-dispatch service and the buffer store the
//! grid builder and the render driver run on.

mod host_backend;
mod wgpu_backend;

use std::mem;

use bytemuck::Pod;
use glam::{UVec2, UVec3};

pub use self::host_backend::*;
pub use self::wgpu_backend::*;
use crate::{gpu, BackendError};

pub trait Backend: Send + Sync + 'static {
    type Buffer: Send + Sync + 'static;
    type Target: Send + Sync + 'static;

    /// Surface the accumulation target gets tonemapped into.
    type Output: ?Sized;

    fn create_buffer(
        &self,
        label: &str,
        size: usize,
    ) -> Result<Self::Buffer, BackendError>;

    fn write_buffer(
        &self,
        buffer: &Self::Buffer,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Blocks until all previously dispatched work is done and returns the
    /// buffer's contents.
    fn read_buffer(&self, buffer: &Self::Buffer)
        -> Result<Vec<u8>, BackendError>;

    fn buffer_size(&self, buffer: &Self::Buffer) -> usize;

    fn create_target(
        &self,
        label: &str,
        size: UVec2,
    ) -> Result<Self::Target, BackendError>;

    fn clear_target(&self, target: &Self::Target) -> Result<(), BackendError>;

    fn dispatch(
        &self,
        kernel: Kernel,
        bindings: &[Binding<'_, Self>],
        workgroups: UVec3,
    ) -> Result<(), BackendError>;

    fn tonemap(
        &self,
        target: &Self::Target,
        output: &mut Self::Output,
    ) -> Result<(), BackendError>;
}

/// Typed helpers on top of [`Backend`].
pub trait BackendExt: Backend {
    fn create_buffer_init<T>(
        &self,
        label: &str,
        items: &[T],
    ) -> Result<Self::Buffer, BackendError>
    where
        T: Pod,
    {
        let data = bytemuck::cast_slice(items);
        let buffer = self.create_buffer(label, data.len())?;

        self.write_buffer(&buffer, data)?;

        Ok(buffer)
    }

    fn read_buffer_as<T>(
        &self,
        buffer: &Self::Buffer,
        len: usize,
    ) -> Result<Vec<T>, BackendError>
    where
        T: Pod,
    {
        let expected = len * mem::size_of::<T>();
        let actual = self.buffer_size(buffer);

        // Fail before paying for the readback
        if actual < expected {
            return Err(BackendError::SizeMismatch { expected, actual });
        }

        cast_bytes(&self.read_buffer(buffer)?, len)
    }
}

impl<B> BackendExt for B where B: Backend + ?Sized {}

/// Reinterprets the first `len` items of given bytes; unlike
/// [`bytemuck::cast_slice()`], doesn't require the bytes to be aligned.
pub(crate) fn cast_bytes<T>(
    bytes: &[u8],
    len: usize,
) -> Result<Vec<T>, BackendError>
where
    T: Pod,
{
    let expected = len * mem::size_of::<T>();

    if bytes.len() < expected {
        return Err(BackendError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let mut items = vec![T::zeroed(); len];

    bytemuck::cast_slice_mut(&mut items).copy_from_slice(&bytes[..expected]);

    Ok(items)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Binds: params, vertices (ro), counts (rw)
    CellsCounting,

    /// Binds: params, vertices (ro), offsets (ro), pairs (rw)
    CellsOverlapping,

    /// Binds: params, triangles (ro), cells (ro), indices (ro), target (rw)
    PathTrace,
}

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Kernel::CellsCounting => "cells_counting",
            Kernel::CellsOverlapping => "cells_overlapping",
            Kernel::PathTrace => "path_trace",
        }
    }

    pub fn workgroup_size(self) -> UVec3 {
        match self {
            Kernel::CellsCounting | Kernel::CellsOverlapping => {
                UVec3::new(gpu::BINNING_WORKGROUP_SIZE, 1, 1)
            }

            Kernel::PathTrace => UVec3::new(
                gpu::TRACING_WORKGROUP_SIZE,
                gpu::TRACING_WORKGROUP_SIZE,
                1,
            ),
        }
    }

    /// Returns the number of work-groups needed to cover given number of
    /// invocations.
    pub fn workgroups(self, invocations: UVec3) -> UVec3 {
        let size = self.workgroup_size();

        (invocations + size - UVec3::ONE) / size
    }

    pub fn slots(self) -> &'static [Slot] {
        match self {
            Kernel::CellsCounting => {
                &[Slot::Params, Slot::ReadOnly, Slot::ReadWrite]
            }

            Kernel::CellsOverlapping => &[
                Slot::Params,
                Slot::ReadOnly,
                Slot::ReadOnly,
                Slot::ReadWrite,
            ],

            Kernel::PathTrace => &[
                Slot::Params,
                Slot::ReadOnly,
                Slot::ReadOnly,
                Slot::ReadOnly,
                Slot::Target,
            ],
        }
    }

    /// Checks whether given bindings match this kernel's slots.
    pub fn validate<B>(self, bindings: &[Binding<'_, B>]) -> Result<(), BackendError>
    where
        B: Backend + ?Sized,
    {
        let slots = self.slots();

        if bindings.len() != slots.len() {
            return Err(BackendError::InvalidBindings {
                kernel: self.name(),
                reason: format!(
                    "expected {} bindings, got {}",
                    slots.len(),
                    bindings.len()
                ),
            });
        }

        for (idx, (binding, slot)) in bindings.iter().zip(slots).enumerate() {
            let matches = matches!(
                (binding, slot),
                (Binding::Params(_), Slot::Params)
                    | (Binding::Buffer(_), Slot::ReadOnly | Slot::ReadWrite)
                    | (Binding::Target(_), Slot::Target)
            );

            if !matches {
                return Err(BackendError::InvalidBindings {
                    kernel: self.name(),
                    reason: format!(
                        "binding #{idx} should be {slot:?}, got {}",
                        binding.kind()
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Kind of resource a kernel expects at given position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Params,
    ReadOnly,
    ReadWrite,
    Target,
}

/// Resource bound to a kernel; bindings are positional, see [`Kernel::slots()`].
pub enum Binding<'a, B>
where
    B: Backend + ?Sized,
{
    Params(&'a [u8]),
    Buffer(&'a B::Buffer),
    Target(&'a B::Target),
}

impl<'a, B> Binding<'a, B>
where
    B: Backend + ?Sized,
{
    pub fn params<T>(params: &'a T) -> Self
    where
        T: Pod,
    {
        Binding::Params(bytemuck::bytes_of(params))
    }

    fn kind(&self) -> &'static str {
        match self {
            Binding::Params(_) => "params",
            Binding::Buffer(_) => "buffer",
            Binding::Target(_) => "target",
        }
    }
}
