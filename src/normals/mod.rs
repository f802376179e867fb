//! Per-vertex normals from mesh topology.
//!
//! Every triangle contributes its unit face normal to each of its three
//! vertices; the sums are normalized afterwards. Vertices no triangle touches
//! keep a zero normal. [`SequentialStrategy`] and [`ParallelStrategy`] both
//! produce this result and are interchangeable behind
//! [`NormalComputeStrategy`].

mod parallel;
mod sequential;

pub use parallel::{gather_normals, ParallelStrategy, WORKGROUP_SIZE};
pub use sequential::{accumulate_normals, SequentialStrategy};

use bevy::prelude::Vec3;
use serde::Deserialize;

use crate::error::TerrainError;
use crate::gpu::GpuResourceManager;
use crate::meshing::{TerrainMeshData, VertexHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalMode {
    #[default]
    Sequential,
    Parallel,
}

impl NormalMode {
    pub fn strategy(self) -> Box<dyn NormalComputeStrategy> {
        match self {
            NormalMode::Sequential => Box::new(SequentialStrategy),
            NormalMode::Parallel => Box::new(ParallelStrategy),
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            NormalMode::Sequential => NormalMode::Parallel,
            NormalMode::Parallel => NormalMode::Sequential,
        }
    }
}

/// Unit normal of triangle `(a, b, c)`, or zero for a degenerate triangle.
pub fn face_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(c - a).normalize_or_zero()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalBuffer(Vec<Vec3>);

impl NormalBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self(vec![Vec3::ZERO; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, handle: VertexHandle) -> Option<Vec3> {
        self.0.get(handle.index()).copied()
    }

    pub fn as_slice(&self) -> &[Vec3] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [Vec3] {
        &mut self.0
    }

    /// Resizes to `len` zero vectors.
    pub fn reset(&mut self, len: usize) {
        self.0.clear();
        self.0.resize(len, Vec3::ZERO);
    }
}

impl From<Vec<Vec3>> for NormalBuffer {
    fn from(normals: Vec<Vec3>) -> Self {
        Self(normals)
    }
}

/// Everything a normal pass may read or write.
pub struct NormalPass<'a> {
    pub mesh: &'a TerrainMeshData,
    pub normals: &'a mut NormalBuffer,
    pub gpu: &'a mut GpuResourceManager,
}

pub trait NormalComputeStrategy: Send + Sync {
    fn mode(&self) -> NormalMode;

    /// Recomputes every normal of `pass.mesh`. On return both the host
    /// normal buffer and the device normal buffer (when resident) hold the
    /// result.
    fn compute(&self, pass: NormalPass<'_>) -> Result<(), TerrainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshing::{heightmap_to_grid_mesh, GridSettings};
    use crate::ElevationGrid;

    fn ridge(n: usize) -> TerrainMeshData {
        let samples = (0..7 * 5).map(|i| ((i * 37) % 256) as u8).collect();
        let terrain = ElevationGrid::from_samples(7, 5, samples).unwrap();
        heightmap_to_grid_mesh(
            &terrain,
            &GridSettings {
                size: n,
                ..GridSettings::default()
            },
        )
        .unwrap()
    }

    fn run(mode: NormalMode, mesh: &TerrainMeshData, gpu: &mut GpuResourceManager) -> NormalBuffer {
        let mut normals = NormalBuffer::zeroed(mesh.vertex_count());
        mode.strategy()
            .compute(NormalPass {
                mesh,
                normals: &mut normals,
                gpu,
            })
            .unwrap();
        normals
    }

    #[test]
    fn face_normal_follows_winding() {
        let up = face_normal(Vec3::ZERO, Vec3::Z, Vec3::X);
        assert_eq!(up, Vec3::Y);

        let down = face_normal(Vec3::ZERO, Vec3::X, Vec3::Z);
        assert_eq!(down, -Vec3::Y);

        assert_eq!(face_normal(Vec3::ZERO, Vec3::X, Vec3::X * 2.), Vec3::ZERO);
    }

    #[test]
    fn modes_agree() {
        for n in [2, 3, 9, 33] {
            let mesh = ridge(n);
            let mut gpu = GpuResourceManager::default();
            gpu.setup(mesh.vertices(), mesh.indices()).unwrap();

            let sequential = run(NormalMode::Sequential, &mesh, &mut gpu);
            let parallel = run(NormalMode::Parallel, &mesh, &mut gpu);

            for (s, p) in sequential.as_slice().iter().zip(parallel.as_slice()) {
                assert!((*s - *p).length() < 1e-4, "{s} vs {p} at n = {n}");
            }
        }
    }

    #[test]
    fn normals_are_unit_length() {
        let mesh = ridge(17);
        let mut gpu = GpuResourceManager::default();
        gpu.setup(mesh.vertices(), mesh.indices()).unwrap();

        for mode in [NormalMode::Sequential, NormalMode::Parallel] {
            let normals = run(mode, &mesh, &mut gpu);
            for n in normals.as_slice() {
                assert!((n.length() - 1.).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn both_modes_leave_device_copy_in_sync() {
        let mesh = ridge(5);
        let mut gpu = GpuResourceManager::default();
        gpu.setup(mesh.vertices(), mesh.indices()).unwrap();

        for mode in [NormalMode::Sequential, NormalMode::Parallel] {
            gpu.upload_normals(&vec![Vec3::ZERO; mesh.vertex_count()]).unwrap();
            let normals = run(mode, &mesh, &mut gpu);
            assert_eq!(gpu.read_normals().unwrap(), normals.as_slice());
        }
    }

    #[test]
    fn parallel_mode_handles_any_triangle_order() {
        let grid = ridge(6);
        // Same triangles, shuffled and with corners rotated
        let mut triangles: Vec<[u32; 3]> = grid
            .indices()
            .chunks_exact(3)
            .map(|tri| [tri[2], tri[0], tri[1]])
            .collect();
        triangles.swap(0, 7);
        triangles.reverse();
        let mesh = TerrainMeshData::from_parts(
            grid.grid_size(),
            grid.vertices().to_vec(),
            triangles.into_iter().flatten().collect(),
        );
        assert_ne!(mesh.indices(), grid.indices());

        let mut gpu = GpuResourceManager::default();
        gpu.setup(mesh.vertices(), mesh.indices()).unwrap();

        let sequential = run(NormalMode::Sequential, &mesh, &mut gpu);
        let parallel = run(NormalMode::Parallel, &mesh, &mut gpu);
        assert_eq!(parallel, sequential);

        let mut reference_gpu = GpuResourceManager::default();
        reference_gpu.setup(grid.vertices(), grid.indices()).unwrap();
        let reference = run(NormalMode::Sequential, &grid, &mut reference_gpu);
        for (p, r) in parallel.as_slice().iter().zip(reference.as_slice()) {
            assert!((*p - *r).length() < 1e-5);
        }
    }

    #[test]
    fn parallel_mode_rejects_mismatched_upload() {
        let mesh = ridge(4);
        let other = ridge(5);
        let mut gpu = GpuResourceManager::default();
        gpu.setup(other.vertices(), other.indices()).unwrap();

        let mut normals = NormalBuffer::zeroed(mesh.vertex_count());
        let err = ParallelStrategy
            .compute(NormalPass {
                mesh: &mesh,
                normals: &mut normals,
                gpu: &mut gpu,
            })
            .unwrap_err();

        assert!(matches!(
            err,
            TerrainError::Gpu(crate::gpu::GpuError::StaleResource { resident: 25, expected: 16 })
        ));
    }

    #[test]
    fn mode_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: NormalMode,
        }

        let parsed: Wrapper = toml::from_str("mode = \"parallel\"").unwrap();
        assert_eq!(parsed.mode, NormalMode::Parallel);
        assert_eq!(NormalMode::Parallel.toggled(), NormalMode::Sequential);
        assert_eq!(NormalMode::Sequential.strategy().mode(), NormalMode::Sequential);
    }
}
