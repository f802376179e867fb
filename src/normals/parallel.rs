use bevy::log::debug;
use bevy::prelude::Vec3;
use rayon::prelude::*;

use super::{face_normal, NormalBuffer, NormalComputeStrategy, NormalMode, NormalPass};
use crate::error::TerrainError;
use crate::gpu::GpuError;

pub const WORKGROUP_SIZE: usize = 64;

/// Dispatches one invocation per vertex against the device-resident mesh,
/// then reads the normal buffer back so host and device copies agree.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelStrategy;

/// Kernel body, mirrored by `normals.wgsl`. Each vertex gathers the face
/// normals of its incident triangles from the adjacency rows, in ascending
/// triangle order, so the sums match the sequential scatter exactly.
pub fn gather_normals(
    positions: &[[f32; 3]],
    indices: &[u32],
    offsets: &[u32],
    adjacency: &[u32],
    normals: &mut [[f32; 3]],
) {
    let position = |i: u32| positions.get(i as usize).copied().map(Vec3::from);
    let face = |t: u32| -> Option<Vec3> {
        let start = t as usize * 3;
        let tri = indices.get(start..start + 3)?;
        Some(face_normal(position(tri[0])?, position(tri[1])?, position(tri[2])?))
    };

    normals
        .par_chunks_mut(WORKGROUP_SIZE)
        .enumerate()
        .for_each(|(group, chunk)| {
            for (local, out) in chunk.iter_mut().enumerate() {
                let vertex = group * WORKGROUP_SIZE + local;
                let row = match (offsets.get(vertex), offsets.get(vertex + 1)) {
                    (Some(&start), Some(&end)) => adjacency.get(start as usize..end as usize),
                    _ => None,
                };

                let sum = row
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|&t| face(t))
                    .fold(Vec3::ZERO, |sum, n| sum + n);

                *out = sum.normalize_or_zero().to_array();
            }
        });
}

impl NormalComputeStrategy for ParallelStrategy {
    fn mode(&self) -> NormalMode {
        NormalMode::Parallel
    }

    fn compute(&self, pass: NormalPass<'_>) -> Result<(), TerrainError> {
        let NormalPass { mesh, normals, gpu } = pass;

        let grid_size = mesh.grid_size();
        if mesh.vertex_count() != grid_size * grid_size {
            return Err(TerrainError::Topology {
                grid_size,
                reason: format!("{} vertices", mesh.vertex_count()),
            });
        }

        let resident = gpu.resource().ok_or(GpuError::NotResident)?;
        if resident.vertex_count() != mesh.vertex_count()
            || resident.index_count() != mesh.indices().len()
        {
            return Err(GpuError::StaleResource {
                resident: resident.vertex_count(),
                expected: mesh.vertex_count(),
            }
            .into());
        }

        gpu.dispatch_normals(grid_size)?;

        *normals = NormalBuffer::from(gpu.read_normals()?);
        debug!("parallel normal pass over {} vertices", normals.len());
        Ok(())
    }
}
