//! Device-side storage for the terrain mesh.
//!
//! A [`MeshDevice`] hands out opaque buffer ids and runs the normal kernel
//! over bound buffers. [`RenderMeshDevice`] backs them with wgpu buffers on
//! bevy's render device; [`HostDevice`] keeps them in memory for headless
//! use and tests. [`GpuResourceManager`] owns one device and the buffers that
//! mirror the host mesh.

mod adjacency;
mod host;
mod render_device;
mod resource;

pub use adjacency::VertexAdjacency;
pub use host::HostDevice;
pub use render_device::RenderMeshDevice;
pub use resource::{DeviceMeshBuffers, GpuMeshResource, GpuResourceManager};

use bevy::render::render_resource::Buffer;
use thiserror::Error;

use crate::normals::WORKGROUP_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Read-write storage, e.g. the normal buffer written by compute kernels.
    Storage,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub size: usize,
}

/// Buffers bound by one normal-kernel dispatch, in binding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalBindings {
    pub positions: BufferId,
    pub indices: BufferId,
    pub adjacency_offsets: BufferId,
    pub adjacency: BufferId,
    pub normals: BufferId,
    /// Vertices per grid side; the kernel covers `grid_size * grid_size`
    /// vertices.
    pub grid_size: u32,
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("out of device memory allocating {label}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        label: String,
        requested: usize,
        available: usize,
    },

    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),

    #[error("buffer size must be a multiple of 4 bytes, got {0}")]
    Unaligned(usize),

    #[error("write of {len} bytes at offset {offset} overflows buffer of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("buffer contents do not match the expected layout: {0:?}")]
    Layout(bytemuck::PodCastError),

    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("{len} indices do not fit in 32-bit adjacency offsets")]
    TooManyIndices { len: usize },

    #[error("mesh buffers are not resident on the device")]
    NotResident,

    #[error("device holds {resident} vertices but the mesh has {expected}")]
    StaleResource { resident: usize, expected: usize },

    #[error("device error: {0}")]
    Device(String),
}

pub trait MeshDevice: Send + Sync {
    /// Allocates a zero-filled buffer.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, GpuError>;

    /// Allocates a buffer sized to `contents` and copies them in.
    fn create_buffer_init(
        &mut self,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferId, GpuError> {
        let id = self.create_buffer(&BufferDescriptor {
            label,
            usage,
            size: contents.len(),
        })?;

        if let Err(err) = self.write_buffer(id, 0, contents) {
            self.destroy_buffer(id);
            return Err(err);
        }

        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<(), GpuError>;

    /// Copies the buffer contents back to the host. Waits for pending
    /// writes and dispatches first.
    fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>, GpuError>;

    /// Returns false if the id was not live.
    fn destroy_buffer(&mut self, id: BufferId) -> bool;

    /// Runs the normal kernel in `ceil(grid_size² / 64)` work-groups. Returns
    /// only after every invocation has finished and its writes are visible
    /// to subsequent reads.
    fn dispatch_normals(&mut self, bindings: &NormalBindings) -> Result<(), GpuError>;

    fn live_buffers(&self) -> usize;

    fn bytes_in_use(&self) -> usize;

    /// The wgpu buffer behind `id`, for devices the renderer can bind.
    fn render_buffer(&self, _id: BufferId) -> Option<Buffer> {
        None
    }
}

/// Work-groups needed to cover `invocations` with 64-wide groups.
pub fn workgroup_count(invocations: usize) -> u32 {
    ((invocations + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE) as u32
}
