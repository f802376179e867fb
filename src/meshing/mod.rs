mod grid;

pub use grid::{heightmap_to_grid_mesh, GridSettings};

use bevy::{
    prelude::*,
    render::{mesh::Indices, render_resource::PrimitiveTopology},
};

use crate::color::TerrainBand;
use crate::normals::face_normal;

/// Largest grid whose row-major vertex indices all fit in a `u32`.
pub const MAX_GRID_SIZE: usize = u16::MAX as usize;

/// Typed index into the row-major vertex and normal arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexHandle(pub u32);

impl VertexHandle {
    /// `None` when the row-major index does not fit in 32 bits.
    pub fn from_grid(row: usize, col: usize, grid_size: usize) -> Option<Self> {
        let index = row.checked_mul(grid_size)?.checked_add(col)?;
        u32::try_from(index).ok().map(Self)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainMeshData {
    grid_size: usize,
    vertices: Vec<Vec3>,
    triangles: Vec<u32>,
}

impl TerrainMeshData {
    /// Wraps externally built geometry. Indices are not checked here; the
    /// normal strategies and the device upload reject out-of-range ones.
    pub fn from_parts(grid_size: usize, vertices: Vec<Vec3>, triangles: Vec<u32>) -> Self {
        Self {
            grid_size,
            vertices,
            triangles,
        }
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.triangles
    }

    pub fn vertex(&self, handle: VertexHandle) -> Option<Vec3> {
        self.vertices.get(handle.index()).copied()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.grid_size = 0;
        self.vertices.clear();
        self.triangles.clear();
    }

    pub fn triangle(&self, i: usize) -> Option<[Vec3; 3]> {
        let tri = self.triangles.get(i * 3..i * 3 + 3)?;
        Some([
            *self.vertices.get(tri[0] as usize)?,
            *self.vertices.get(tri[1] as usize)?,
            *self.vertices.get(tri[2] as usize)?,
        ])
    }

    /// One segment per triangle, from its centroid along its face normal.
    pub fn face_normal_lines(&self, length: f32) -> Vec<[Vec3; 2]> {
        (0..self.triangle_count())
            .filter_map(|i| self.triangle(i))
            .map(|[a, b, c]| {
                let centroid = (a + b + c) / 3.;
                [centroid, centroid + face_normal(a, b, c) * length]
            })
            .collect()
    }

    /// Surface mesh colored by elevation band.
    pub fn to_render_mesh(&self, normals: &[Vec3]) -> Mesh {
        let mut mesh = Mesh::new(PrimitiveTopology::TriangleList);

        let colors: Vec<[f32; 4]> = self
            .vertices
            .iter()
            .map(|v| {
                let [r, g, b] = TerrainBand::classify(v.y).rgb();
                [r, g, b, 1.]
            })
            .collect();

        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, self.vertices.clone());
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals.to_vec());
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, colors);

        mesh.set_indices(Some(Indices::U32(self.triangles.clone())));

        mesh
    }

    pub fn normal_lines_mesh(&self, length: f32) -> Mesh {
        let mut mesh = Mesh::new(PrimitiveTopology::LineList);

        let positions: Vec<Vec3> = self
            .face_normal_lines(length)
            .into_iter()
            .flatten()
            .collect();
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);

        mesh
    }
}
