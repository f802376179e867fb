use bevy::log::{debug, info};
use bevy::prelude::Vec3;
use bevy::render::render_resource::Buffer;

use super::{
    BufferDescriptor, BufferId, BufferUsage, GpuError, HostDevice, MeshDevice, NormalBindings,
    VertexAdjacency,
};
use crate::color::TerrainBand;

const VERTEX_STRIDE: usize = std::mem::size_of::<[f32; 3]>();

/// Device buffers mirroring one generated mesh. Only created by a successful
/// [`GpuResourceManager::setup`].
#[derive(Debug)]
pub struct GpuMeshResource {
    vertices: BufferId,
    indices: BufferId,
    normals: BufferId,
    colors: BufferId,
    adjacency_offsets: BufferId,
    adjacency: BufferId,
    vertex_count: usize,
    index_count: usize,
}

impl GpuMeshResource {
    pub fn vertex_buffer(&self) -> BufferId {
        self.vertices
    }

    pub fn index_buffer(&self) -> BufferId {
        self.indices
    }

    pub fn normal_buffer(&self) -> BufferId {
        self.normals
    }

    pub fn color_buffer(&self) -> BufferId {
        self.colors
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn triangle_count(&self) -> usize {
        self.index_count / 3
    }

    fn buffers(&self) -> [BufferId; 6] {
        [
            self.adjacency,
            self.adjacency_offsets,
            self.colors,
            self.normals,
            self.indices,
            self.vertices,
        ]
    }
}

/// The wgpu buffers a draw call binds: positions, normals and colors as
/// vertex slots 0 to 2, plus the index buffer.
#[derive(Clone)]
pub struct DeviceMeshBuffers {
    pub positions: Buffer,
    pub normals: Buffer,
    pub colors: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

pub struct GpuResourceManager {
    device: Box<dyn MeshDevice>,
    resource: Option<GpuMeshResource>,
}

impl Default for GpuResourceManager {
    fn default() -> Self {
        Self::new(Box::new(HostDevice::new()))
    }
}

impl GpuResourceManager {
    pub fn new(device: Box<dyn MeshDevice>) -> Self {
        Self {
            device,
            resource: None,
        }
    }

    pub fn device(&self) -> &dyn MeshDevice {
        self.device.as_ref()
    }

    pub fn resource(&self) -> Option<&GpuMeshResource> {
        self.resource.as_ref()
    }

    pub fn is_resident(&self) -> bool {
        self.resource.is_some()
    }

    /// Uploads vertices, indices, band colors and the vertex-to-triangle
    /// adjacency the normal kernel walks, and allocates a zeroed normal
    /// buffer of matching length. Any previous resource is released first;
    /// on failure nothing stays allocated.
    pub fn setup(&mut self, vertices: &[Vec3], indices: &[u32]) -> Result<(), GpuError> {
        self.teardown();

        let adjacency = VertexAdjacency::build(indices, vertices.len())?;
        let positions: Vec<[f32; 3]> = vertices.iter().map(|v| v.to_array()).collect();
        let colors: Vec<[f32; 3]> = vertices
            .iter()
            .map(|v| TerrainBand::classify(v.y).rgb())
            .collect();

        let mut created = Vec::with_capacity(6);
        let result = self.create_all(&mut created, &positions, indices, &colors, &adjacency);

        match result {
            Ok(resource) => {
                info!(
                    "uploaded terrain mesh: {} vertices, {} indices",
                    vertices.len(),
                    indices.len()
                );
                self.resource = Some(resource);
                Ok(())
            }
            Err(err) => {
                for id in created.into_iter().rev() {
                    self.device.destroy_buffer(id);
                }
                Err(err)
            }
        }
    }

    fn create_all(
        &mut self,
        created: &mut Vec<BufferId>,
        positions: &[[f32; 3]],
        indices: &[u32],
        colors: &[[f32; 3]],
        adjacency: &VertexAdjacency,
    ) -> Result<GpuMeshResource, GpuError> {
        let vertices = self.upload(
            created,
            "terrain vertices",
            BufferUsage::Vertex,
            bytemuck::cast_slice(positions),
        )?;
        let index_buffer = self.upload(
            created,
            "terrain indices",
            BufferUsage::Index,
            bytemuck::cast_slice(indices),
        )?;
        let colors = self.upload(
            created,
            "terrain colors",
            BufferUsage::Vertex,
            bytemuck::cast_slice(colors),
        )?;
        let adjacency_offsets = self.upload(
            created,
            "terrain adjacency offsets",
            BufferUsage::Storage,
            bytemuck::cast_slice(adjacency.offsets()),
        )?;
        let adjacency_rows = self.upload(
            created,
            "terrain adjacency",
            BufferUsage::Storage,
            bytemuck::cast_slice(adjacency.triangles()),
        )?;

        let normals = self.device.create_buffer(&BufferDescriptor {
            label: "terrain normals",
            usage: BufferUsage::Storage,
            size: positions.len() * VERTEX_STRIDE,
        })?;
        created.push(normals);

        Ok(GpuMeshResource {
            vertices,
            indices: index_buffer,
            normals,
            colors,
            adjacency_offsets,
            adjacency: adjacency_rows,
            vertex_count: positions.len(),
            index_count: indices.len(),
        })
    }

    fn upload(
        &mut self,
        created: &mut Vec<BufferId>,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferId, GpuError> {
        let id = self.device.create_buffer_init(label, usage, contents)?;
        created.push(id);
        Ok(id)
    }

    /// Releases every device buffer. No-op when nothing is resident.
    pub fn teardown(&mut self) {
        if let Some(resource) = self.resource.take() {
            for id in resource.buffers() {
                self.device.destroy_buffer(id);
            }
            debug!("released terrain mesh buffers");
        }
    }

    pub fn upload_normals(&mut self, normals: &[Vec3]) -> Result<(), GpuError> {
        self.write_normals(0, normals)
    }

    /// Writes `normals` into the device normal buffer starting at vertex `first`.
    pub fn write_normals(&mut self, first: usize, normals: &[Vec3]) -> Result<(), GpuError> {
        let resource = self.resource.as_ref().ok_or(GpuError::NotResident)?;

        let flat: Vec<[f32; 3]> = normals.iter().map(|n| n.to_array()).collect();
        self.device.write_buffer(
            resource.normals,
            first * VERTEX_STRIDE,
            bytemuck::cast_slice(&flat),
        )
    }

    pub fn read_normals(&self) -> Result<Vec<Vec3>, GpuError> {
        let resource = self.resource.as_ref().ok_or(GpuError::NotResident)?;

        let bytes = self.device.read_buffer(resource.normals)?;
        let flat: &[[f32; 3]] = bytemuck::try_cast_slice(&bytes).map_err(GpuError::Layout)?;

        Ok(flat.iter().copied().map(Vec3::from).collect())
    }

    /// Runs the normal kernel over the resident `grid_size`² mesh and waits
    /// for it. A mesh without triangles gets zero normals without a dispatch.
    pub fn dispatch_normals(&mut self, grid_size: usize) -> Result<(), GpuError> {
        let resource = self.resource.as_ref().ok_or(GpuError::NotResident)?;
        if grid_size * grid_size != resource.vertex_count {
            return Err(GpuError::StaleResource {
                resident: resource.vertex_count,
                expected: grid_size * grid_size,
            });
        }

        if resource.index_count == 0 {
            let zeros = vec![Vec3::ZERO; resource.vertex_count];
            return self.upload_normals(&zeros);
        }

        let bindings = NormalBindings {
            positions: resource.vertices,
            indices: resource.indices,
            adjacency_offsets: resource.adjacency_offsets,
            adjacency: resource.adjacency,
            normals: resource.normals,
            grid_size: grid_size as u32,
        };
        self.device.dispatch_normals(&bindings)
    }

    /// Renderer-visible buffers, when the device is one the renderer can
    /// bind.
    pub fn draw_buffers(&self) -> Option<DeviceMeshBuffers> {
        let resource = self.resource.as_ref()?;

        Some(DeviceMeshBuffers {
            positions: self.device.render_buffer(resource.vertices)?,
            normals: self.device.render_buffer(resource.normals)?,
            colors: self.device.render_buffer(resource.colors)?,
            indices: self.device.render_buffer(resource.indices)?,
            index_count: u32::try_from(resource.index_count).ok()?,
        })
    }
}

impl Drop for GpuResourceManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
