use bevy::log::warn;
use bevy::prelude::Vec3;

use super::{face_normal, NormalComputeStrategy, NormalMode, NormalPass};
use crate::error::TerrainError;

/// Runs on the calling thread and pushes the result to the device afterwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialStrategy;

/// Accumulates face normals in triangle order and normalizes the sums into
/// `out`, which must hold one entry per vertex.
pub fn accumulate_normals(positions: &[Vec3], indices: &[u32], out: &mut [Vec3]) {
    out.fill(Vec3::ZERO);

    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let n = face_normal(positions[i0], positions[i1], positions[i2]);

        out[i0] += n;
        out[i1] += n;
        out[i2] += n;
    }

    for n in out.iter_mut() {
        *n = n.normalize_or_zero();
    }
}

impl NormalComputeStrategy for SequentialStrategy {
    fn mode(&self) -> NormalMode {
        NormalMode::Sequential
    }

    fn compute(&self, pass: NormalPass<'_>) -> Result<(), TerrainError> {
        let NormalPass { mesh, normals, gpu } = pass;

        let vertex_count = mesh.vertex_count();
        if let Some(&bad) = mesh.indices().iter().find(|&&i| i as usize >= vertex_count) {
            return Err(TerrainError::Topology {
                grid_size: mesh.grid_size(),
                reason: format!("index {bad} out of range for {vertex_count} vertices"),
            });
        }

        normals.reset(vertex_count);
        accumulate_normals(mesh.vertices(), mesh.indices(), normals.as_mut_slice());

        if gpu.is_resident() {
            gpu.upload_normals(normals.as_slice())?;
        } else if vertex_count > 0 {
            warn!("terrain mesh is not resident; normals computed on host only");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_edge_is_averaged() {
        // Two triangles folded along the x axis: one facing +Y, one facing +Z
        let positions = [Vec3::ZERO, Vec3::X, Vec3::new(0., 0., -1.), Vec3::new(0., 1., 0.)];
        let indices = [0, 1, 2, 0, 1, 3];
        let mut out = [Vec3::ONE; 4];

        accumulate_normals(&positions, &indices, &mut out);

        let diagonal = Vec3::new(0., 1., 1.).normalize();
        assert!((out[0] - diagonal).length() < 1e-6);
        assert!((out[1] - diagonal).length() < 1e-6);
        assert!((out[2] - Vec3::Y).length() < 1e-6);
        assert!((out[3] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn untouched_vertices_stay_zero() {
        let positions = [Vec3::ZERO, Vec3::Z, Vec3::X, Vec3::splat(7.)];
        let mut out = [Vec3::ONE; 4];

        accumulate_normals(&positions, &[0, 1, 2], &mut out);

        assert_eq!(out[3], Vec3::ZERO);
        assert_eq!(out[0], Vec3::Y);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let positions = [
            Vec3::new(0., 0.3, 0.),
            Vec3::new(0., 1.2, 1.),
            Vec3::new(1., -0.4, 0.),
            Vec3::new(1., 2.5, 1.),
        ];
        let indices = [0, 1, 2, 2, 1, 3];
        let mut first = [Vec3::ZERO; 4];
        let mut second = [Vec3::ZERO; 4];

        accumulate_normals(&positions, &indices, &mut first);
        accumulate_normals(&positions, &indices, &mut second);

        assert_eq!(first, second);
    }
}
