use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::GpuError;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("failed to load heightmap {path}: {source}")]
    HeightmapLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("heightmap of {width}x{height} needs {expected} samples, got {actual}")]
    HeightmapShape {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("no heightmap loaded; call load_heightmap before generate")]
    NoHeightmap,

    #[error("grid size {grid_size} exceeds the maximum of {max} vertices per side")]
    GridTooLarge { grid_size: usize, max: usize },

    #[error("mesh topology does not match a {grid_size}x{grid_size} grid: {reason}")]
    Topology { grid_size: usize, reason: String },

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}
