pub mod color;
pub mod config;
pub mod error;
pub mod gpu;
pub mod heightmap;
pub mod meshing;
pub mod normals;
pub mod plugin;
pub mod render;
pub mod terrain;

pub use color::{height_color, TerrainBand};
pub use config::TerrainConfig;
pub use error::TerrainError;
pub use heightmap::ElevationGrid;
pub use meshing::VertexHandle;
pub use normals::{NormalComputeStrategy, NormalMode, ParallelStrategy, SequentialStrategy};
pub use plugin::TerrainPlugin;
pub use terrain::{Terrain, TerrainRender};
