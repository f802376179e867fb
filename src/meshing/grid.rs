use bevy::prelude::Vec3;

use super::{TerrainMeshData, MAX_GRID_SIZE};
use crate::error::TerrainError;
use crate::ElevationGrid;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSettings {
    /// Vertices per side.
    pub size: usize,
    /// Width of the square footprint, centred on the origin.
    pub world_size: f32,
    /// Height of a full-scale (255) sample.
    pub height_scale: f32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            size: 128,
            world_size: 50.,
            height_scale: 10.,
        }
    }
}

pub fn heightmap_to_grid_mesh(
    terrain: &ElevationGrid,
    settings: &GridSettings,
) -> Result<TerrainMeshData, TerrainError> {
    let n = settings.size;
    if n > MAX_GRID_SIZE {
        return Err(TerrainError::GridTooLarge {
            grid_size: n,
            max: MAX_GRID_SIZE,
        });
    }

    let step = if n > 1 {
        settings.world_size / (n - 1) as f32
    } else {
        0.
    };
    let half = settings.world_size / 2.;

    let mut vertices = Vec::with_capacity(n * n);

    // Row-major: vertex (row z, col x) lands at z * n + x
    for z in 0..n {
        for x in 0..n {
            vertices.push(Vec3 {
                x: x as f32 * step - half,
                y: terrain.height_at_grid(x, z, n, settings.height_scale),
                z: z as f32 * step - half,
            });
        }
    }

    let cells = n.saturating_sub(1);
    let mut triangles = Vec::with_capacity(cells * cells * 6);
    // n <= MAX_GRID_SIZE, so n * n - 1 fits in a u32
    let idx = |x: usize, z: usize| -> u32 { (z * n + x) as u32 };

    for z in 0..cells {
        for x in 0..cells {
            let top_left = idx(x, z);
            let top_right = idx(x + 1, z);
            let bottom_left = idx(x, z + 1);
            let bottom_right = idx(x + 1, z + 1);

            triangles.extend([top_left, bottom_left, top_right]);
            triangles.extend([top_right, bottom_left, bottom_right]);
        }
    }

    Ok(TerrainMeshData {
        grid_size: n,
        vertices,
        triangles,
    })
}
