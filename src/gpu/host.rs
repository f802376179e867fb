use std::collections::HashMap;

use bevy::log::debug;

use super::{
    workgroup_count, BufferDescriptor, BufferId, BufferUsage, GpuError, MeshDevice, NormalBindings,
};
use crate::normals::gather_normals;

struct HostBuffer {
    label: String,
    usage: BufferUsage,
    // u32 words keep every buffer 4-byte aligned for f32/u32 views
    words: Vec<u32>,
}

impl HostBuffer {
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }
}

/// In-process device for headless runs and tests. Buffers live in host
/// memory; the normal kernel runs on the rayon pool of the caller.
#[derive(Default)]
pub struct HostDevice {
    buffers: HashMap<BufferId, HostBuffer>,
    next_id: u64,
    memory_limit: Option<usize>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails allocations that would push total usage above `bytes`.
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn usage_of(&self, id: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&id).map(|buffer| buffer.usage)
    }

    fn run_normal_kernel(
        &self,
        bindings: &NormalBindings,
        output: &mut HostBuffer,
    ) -> Result<(), GpuError> {
        let positions: &[[f32; 3]] = self.words(bindings.positions)?;
        let indices: &[u32] = self.words(bindings.indices)?;
        let offsets: &[u32] = self.words(bindings.adjacency_offsets)?;
        let adjacency: &[u32] = self.words(bindings.adjacency)?;
        let normals: &mut [[f32; 3]] =
            bytemuck::try_cast_slice_mut(output.bytes_mut()).map_err(GpuError::Layout)?;

        let vertex_count = bindings.grid_size as usize * bindings.grid_size as usize;
        let resident = normals.len();
        if resident < vertex_count || offsets.len() <= vertex_count || positions.len() < vertex_count
        {
            return Err(GpuError::StaleResource {
                resident,
                expected: vertex_count,
            });
        }

        gather_normals(positions, indices, offsets, adjacency, &mut normals[..vertex_count]);
        debug!(
            "normal kernel finished: {} work-groups",
            workgroup_count(vertex_count)
        );
        Ok(())
    }

    fn words<T: bytemuck::Pod>(&self, id: BufferId) -> Result<&[T], GpuError> {
        let buffer = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        bytemuck::try_cast_slice(buffer.bytes()).map_err(GpuError::Layout)
    }
}

impl MeshDevice for HostDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, GpuError> {
        if desc.size % 4 != 0 {
            return Err(GpuError::Unaligned(desc.size));
        }

        if let Some(limit) = self.memory_limit {
            let available = limit.saturating_sub(self.bytes_in_use());
            if desc.size > available {
                return Err(GpuError::OutOfMemory {
                    label: desc.label.to_string(),
                    requested: desc.size,
                    available,
                });
            }
        }

        let id = BufferId(self.next_id);
        self.next_id += 1;

        self.buffers.insert(
            id,
            HostBuffer {
                label: desc.label.to_string(),
                usage: desc.usage,
                words: vec![0; desc.size / 4],
            },
        );
        debug!("allocated {} ({} bytes) as {:?}", desc.label, desc.size, id);

        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<(), GpuError> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(GpuError::UnknownBuffer(id))?;
        let bytes = buffer.bytes_mut();

        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= bytes.len())
            .ok_or(GpuError::OutOfBounds {
                offset,
                len: data.len(),
                size: bytes.len(),
            })?;

        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>, GpuError> {
        self.buffers
            .get(&id)
            .map(|buffer| buffer.bytes().to_vec())
            .ok_or(GpuError::UnknownBuffer(id))
    }

    fn destroy_buffer(&mut self, id: BufferId) -> bool {
        match self.buffers.remove(&id) {
            Some(buffer) => {
                debug!("released {} ({:?})", buffer.label, id);
                true
            }
            None => false,
        }
    }

    fn dispatch_normals(&mut self, bindings: &NormalBindings) -> Result<(), GpuError> {
        // Detach the writable binding so the read bindings can be borrowed alongside it
        let mut output = self
            .buffers
            .remove(&bindings.normals)
            .ok_or(GpuError::UnknownBuffer(bindings.normals))?;

        let result = self.run_normal_kernel(bindings, &mut output);

        self.buffers.insert(bindings.normals, output);
        result
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn bytes_in_use(&self) -> usize {
        self.buffers.values().map(|buffer| buffer.words.len() * 4).sum()
    }
}
