use std::collections::HashMap;
use std::num::NonZeroU64;

use bevy::log::debug;
use bevy::render::render_resource::Buffer;
use bevy::render::renderer::{RenderDevice, RenderQueue};
use futures_intrusive::channel::shared::oneshot_channel;
use wgpu::BufferUsages;

use super::{
    workgroup_count, BufferDescriptor, BufferId, BufferUsage, GpuError, MeshDevice, NormalBindings,
};

const NORMALS_SHADER: &str = include_str!("normals.wgsl");

fn usages(usage: BufferUsage) -> BufferUsages {
    // Everything is readable by the kernel and copyable for readback
    let shared = BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC;
    match usage {
        BufferUsage::Vertex | BufferUsage::Storage => shared | BufferUsages::VERTEX,
        BufferUsage::Index => shared | BufferUsages::INDEX,
    }
}

struct DeviceBuffer {
    label: String,
    buffer: Buffer,
    /// Requested size; the wgpu buffer is never smaller than 4 bytes.
    size: usize,
}

struct NormalPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    params: wgpu::Buffer,
}

impl NormalPipeline {
    fn new(device: &wgpu::Device) -> Self {
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_normals_layout"),
            entries: &[
                storage(0, true),
                storage(1, true),
                storage(2, true),
                storage(3, true),
                storage(4, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(16),
                    },
                    count: None,
                },
            ],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain_normals"),
            source: wgpu::ShaderSource::Wgsl(NORMALS_SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("terrain_normals"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("terrain_normals"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "accumulate",
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_normals_params"),
            size: 16,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            layout,
            pipeline,
            params,
        }
    }
}

fn lookup(buffers: &HashMap<BufferId, DeviceBuffer>, id: BufferId) -> Result<&Buffer, GpuError> {
    buffers
        .get(&id)
        .map(|entry| &entry.buffer)
        .ok_or(GpuError::UnknownBuffer(id))
}

/// Mesh buffers on bevy's render device. Buffers are plain wgpu storage
/// buffers that double as vertex and index buffers, so the renderer draws
/// straight from what the normal kernel writes.
pub struct RenderMeshDevice {
    device: RenderDevice,
    queue: RenderQueue,
    buffers: HashMap<BufferId, DeviceBuffer>,
    next_id: u64,
    pipeline: Option<NormalPipeline>,
}

impl RenderMeshDevice {
    pub fn new(device: RenderDevice, queue: RenderQueue) -> Self {
        Self {
            device,
            queue,
            buffers: HashMap::new(),
            next_id: 0,
            pipeline: None,
        }
    }

    fn raw(&self) -> &wgpu::Device {
        self.device.wgpu_device()
    }

    /// Blocks until submitted work is done, then reports the innermost
    /// error scope.
    fn finish_scope(&self) -> Result<(), GpuError> {
        self.raw().poll(wgpu::Maintain::Wait);
        match pollster::block_on(self.raw().pop_error_scope()) {
            Some(err) => Err(GpuError::Device(err.to_string())),
            None => Ok(()),
        }
    }
}

impl MeshDevice for RenderMeshDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<BufferId, GpuError> {
        if desc.size % 4 != 0 {
            return Err(GpuError::Unaligned(desc.size));
        }

        let limit = self.raw().limits().max_buffer_size as usize;
        if desc.size > limit {
            return Err(GpuError::OutOfMemory {
                label: desc.label.to_string(),
                requested: desc.size,
                available: limit,
            });
        }

        self.raw().push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        // wgpu zero-fills new buffers
        let raw = self.raw().create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size.max(4) as u64,
            usage: usages(desc.usage),
            mapped_at_creation: false,
        });
        self.finish_scope()?;

        let id = BufferId(self.next_id);
        self.next_id += 1;

        self.buffers.insert(
            id,
            DeviceBuffer {
                label: desc.label.to_string(),
                buffer: Buffer::from(raw),
                size: desc.size,
            },
        );
        debug!("allocated {} ({} bytes) as {:?}", desc.label, desc.size, id);

        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<(), GpuError> {
        let entry = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;

        offset
            .checked_add(data.len())
            .filter(|end| *end <= entry.size)
            .ok_or(GpuError::OutOfBounds {
                offset,
                len: data.len(),
                size: entry.size,
            })?;

        if !data.is_empty() {
            self.queue.write_buffer(&entry.buffer, offset as u64, data);
        }
        Ok(())
    }

    fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>, GpuError> {
        let entry = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        if entry.size == 0 {
            return Ok(Vec::new());
        }

        let size = entry.size as u64;
        let staging = self.raw().create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_readback_staging"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .raw()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("terrain_readback"),
            });
        encoder.copy_buffer_to_buffer(&entry.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.raw().poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver.receive())
            .ok_or_else(|| GpuError::Device(format!("readback of {} was dropped", entry.label)))?
            .map_err(|err| GpuError::Device(err.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();

        Ok(bytes)
    }

    fn destroy_buffer(&mut self, id: BufferId) -> bool {
        // Dropping our handle is enough; a frame still in flight keeps its
        // own clone alive until it is done with it
        match self.buffers.remove(&id) {
            Some(entry) => {
                debug!("released {} ({:?})", entry.label, id);
                true
            }
            None => false,
        }
    }

    fn dispatch_normals(&mut self, bindings: &NormalBindings) -> Result<(), GpuError> {
        let vertex_count = bindings.grid_size as usize * bindings.grid_size as usize;
        let groups = workgroup_count(vertex_count);
        if groups == 0 {
            return Ok(());
        }

        let max_groups = self.raw().limits().max_compute_workgroups_per_dimension;
        if groups > max_groups {
            return Err(GpuError::Device(format!(
                "{groups} work-groups exceed the device limit of {max_groups}"
            )));
        }

        let positions = lookup(&self.buffers, bindings.positions)?;
        let indices = lookup(&self.buffers, bindings.indices)?;
        let offsets = lookup(&self.buffers, bindings.adjacency_offsets)?;
        let adjacency = lookup(&self.buffers, bindings.adjacency)?;
        let normals = lookup(&self.buffers, bindings.normals)?;

        let device = self.device.wgpu_device();
        let pipeline = self
            .pipeline
            .get_or_insert_with(|| NormalPipeline::new(device));

        let params = [bindings.grid_size, 0, 0, 0];
        self.queue
            .write_buffer(&pipeline.params, 0, bytemuck::cast_slice(&params));

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_normals_bind_group"),
            layout: &pipeline.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: adjacency.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: normals.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: pipeline.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("terrain_normals"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("terrain_normals"),
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.finish_scope()?;
        debug!("normal kernel finished: {groups} work-groups");
        Ok(())
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn bytes_in_use(&self) -> usize {
        self.buffers.values().map(|entry| entry.size).sum()
    }

    fn render_buffer(&self, id: BufferId) -> Option<Buffer> {
        self.buffers.get(&id).map(|entry| entry.buffer.clone())
    }
}
