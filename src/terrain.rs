use std::path::Path;

use bevy::log::{error, info, warn};
use bevy::prelude::{Mesh, Vec3};

use crate::config::TerrainConfig;
use crate::error::TerrainError;
use crate::gpu::{GpuResourceManager, HostDevice, MeshDevice};
use crate::heightmap::ElevationGrid;
use crate::meshing::{heightmap_to_grid_mesh, TerrainMeshData, VertexHandle};
use crate::normals::{
    NormalBuffer, NormalComputeStrategy, NormalMode, NormalPass, SequentialStrategy,
};

/// Meshes handed to the renderer for one frame.
pub struct TerrainRender {
    pub surface: Mesh,
    /// Present when debug normal lines are enabled.
    pub normal_lines: Option<Mesh>,
}

/// Heightmap-driven terrain: owns the host mesh, its normals and the device
/// copies of both.
pub struct Terrain {
    config: TerrainConfig,
    heightmap: Option<ElevationGrid>,
    mesh: TerrainMeshData,
    normals: NormalBuffer,
    strategy: Box<dyn NormalComputeStrategy>,
    gpu: GpuResourceManager,
}

impl Terrain {
    pub fn new(config: TerrainConfig) -> Self {
        Self::with_device(config, Box::new(HostDevice::new()))
    }

    pub fn with_device(config: TerrainConfig, device: Box<dyn MeshDevice>) -> Self {
        Self {
            strategy: config.normal_mode.strategy(),
            config,
            heightmap: None,
            mesh: TerrainMeshData::default(),
            normals: NormalBuffer::default(),
            gpu: GpuResourceManager::new(device),
        }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Decodes `path` and makes it the source of the next `generate`. On
    /// failure the previous heightmap and mesh are left untouched.
    pub fn load_heightmap(&mut self, path: impl AsRef<Path>) -> Result<(), TerrainError> {
        let path = path.as_ref();
        match ElevationGrid::load(path) {
            Ok(grid) => {
                info!(
                    "loaded heightmap {} ({}x{})",
                    path.display(),
                    grid.width(),
                    grid.height()
                );
                self.heightmap = Some(grid);
                Ok(())
            }
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }

    pub fn set_heightmap(&mut self, grid: ElevationGrid) {
        self.heightmap = Some(grid);
    }

    pub fn heightmap(&self) -> Option<&ElevationGrid> {
        self.heightmap.as_ref()
    }

    /// Rebuilds vertices and indices from the current heightmap, uploads
    /// them and computes normals, so the new mesh is renderable on return.
    pub fn generate(&mut self) -> Result<(), TerrainError> {
        let Some(heightmap) = &self.heightmap else {
            error!("cannot generate terrain: no heightmap loaded");
            return Err(TerrainError::NoHeightmap);
        };

        let settings = self.config.grid_settings();
        if settings.size < 2 {
            warn!("grid size {} produces no triangles", settings.size);
        }

        let mesh = match heightmap_to_grid_mesh(heightmap, &settings) {
            Ok(mesh) => mesh,
            Err(err) => {
                error!("{err}");
                return Err(err);
            }
        };

        self.mesh.clear();
        self.normals.reset(0);

        if let Err(err) = self.gpu.setup(mesh.vertices(), mesh.indices()) {
            error!("terrain upload failed: {err}");
            return Err(err.into());
        }

        info!(
            "generated terrain: {} vertices, {} triangles",
            mesh.vertex_count(),
            mesh.triangle_count()
        );

        self.normals.reset(mesh.vertex_count());
        self.mesh = mesh;
        self.compute_normals_or_fallback()
    }

    /// Runs the active strategy; a failed parallel pass is retried once on
    /// the host without changing the mode.
    fn compute_normals_or_fallback(&mut self) -> Result<(), TerrainError> {
        match self.compute_normals() {
            Err(err) if self.normal_mode() == NormalMode::Parallel => {
                warn!("parallel normal pass failed, using the sequential pass: {err}");
                SequentialStrategy.compute(NormalPass {
                    mesh: &self.mesh,
                    normals: &mut self.normals,
                    gpu: &mut self.gpu,
                })
            }
            result => result,
        }
    }

    /// Recomputes normals with the active strategy.
    pub fn compute_normals(&mut self) -> Result<(), TerrainError> {
        self.strategy.compute(NormalPass {
            mesh: &self.mesh,
            normals: &mut self.normals,
            gpu: &mut self.gpu,
        })
    }

    /// Takes effect on the next `compute_normals`.
    pub fn set_normal_mode(&mut self, mode: NormalMode) {
        if self.strategy.mode() != mode {
            info!("normal mode: {:?} -> {:?}", self.strategy.mode(), mode);
            self.strategy = mode.strategy();
            self.config.normal_mode = mode;
        }
    }

    pub fn normal_mode(&self) -> NormalMode {
        self.strategy.mode()
    }

    pub fn set_show_normals(&mut self, show: bool) {
        self.config.show_normals = show;
    }

    pub fn show_normals(&self) -> bool {
        self.config.show_normals
    }

    pub fn render(&self) -> TerrainRender {
        TerrainRender {
            surface: self.mesh.to_render_mesh(self.normals.as_slice()),
            normal_lines: self
                .config
                .show_normals
                .then(|| self.mesh.normal_lines_mesh(self.config.normal_line_length)),
        }
    }

    pub fn mesh(&self) -> &TerrainMeshData {
        &self.mesh
    }

    pub fn vertices(&self) -> &[Vec3] {
        self.mesh.vertices()
    }

    pub fn indices(&self) -> &[u32] {
        self.mesh.indices()
    }

    pub fn normals(&self) -> &[Vec3] {
        self.normals.as_slice()
    }

    pub fn vertex(&self, handle: VertexHandle) -> Option<Vec3> {
        self.mesh.vertex(handle)
    }

    pub fn normal(&self, handle: VertexHandle) -> Option<Vec3> {
        self.normals.get(handle)
    }

    pub fn vertex_count(&self) -> usize {
        self.mesh.vertex_count()
    }

    pub fn triangle_count(&self) -> usize {
        self.mesh.triangle_count()
    }

    pub fn gpu(&self) -> &GpuResourceManager {
        &self.gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(grid_size: usize) -> Terrain {
        let mut terrain = Terrain::new(TerrainConfig {
            grid_size,
            ..TerrainConfig::default()
        });
        terrain.set_heightmap(ElevationGrid::filled(8, 8, 128));
        terrain
    }

    #[test]
    fn generate_without_heightmap_fails() {
        let mut terrain = Terrain::new(TerrainConfig::default());

        assert!(matches!(terrain.generate(), Err(TerrainError::NoHeightmap)));
        assert!(terrain.vertices().is_empty());
        assert!(terrain.indices().is_empty());
        assert!(!terrain.gpu().is_resident());
    }

    #[test]
    fn regenerate_replaces_mesh() {
        let mut terrain = terrain(5);
        terrain.generate().unwrap();
        terrain.generate().unwrap();

        assert_eq!(terrain.vertex_count(), 25);
        assert_eq!(terrain.triangle_count(), 32);
        assert_eq!(terrain.gpu().device().live_buffers(), 6);
    }

    #[test]
    fn generate_leaves_mesh_ready_to_draw() {
        for mode in [NormalMode::Sequential, NormalMode::Parallel] {
            let mut terrain = Terrain::new(TerrainConfig {
                grid_size: 9,
                normal_mode: mode,
                ..TerrainConfig::default()
            });
            let samples = (0..8 * 8).map(|i| ((i * 41) % 256) as u8).collect();
            terrain.set_heightmap(ElevationGrid::from_samples(8, 8, samples).unwrap());

            terrain.generate().unwrap();

            assert_eq!(terrain.normals().len(), 81);
            for n in terrain.normals() {
                assert!((n.length() - 1.).abs() < 1e-4, "{n} in {mode:?}");
            }
            assert_eq!(terrain.gpu().read_normals().unwrap(), terrain.normals());
        }
    }

    #[test]
    fn oversized_grid_fails_generate() {
        let mut terrain = terrain(crate::meshing::MAX_GRID_SIZE + 1);

        assert!(matches!(
            terrain.generate(),
            Err(TerrainError::GridTooLarge { .. })
        ));
        assert!(terrain.vertices().is_empty());
        assert!(!terrain.gpu().is_resident());
    }

    #[test]
    fn failed_upload_leaves_nothing_to_render() {
        let mut terrain = Terrain::with_device(
            TerrainConfig {
                grid_size: 16,
                ..TerrainConfig::default()
            },
            Box::new(HostDevice::with_memory_limit(256)),
        );
        terrain.set_heightmap(ElevationGrid::filled(4, 4, 0));

        let err = terrain.generate().unwrap_err();

        assert!(matches!(err, TerrainError::Gpu(_)));
        assert_eq!(terrain.vertex_count(), 0);
        assert!(terrain.normals().is_empty());
        assert!(!terrain.gpu().is_resident());
    }

    #[test]
    fn mode_switch_applies_to_next_computation() {
        let mut terrain = terrain(6);
        terrain.generate().unwrap();
        terrain.compute_normals().unwrap();
        let sequential = terrain.normals().to_vec();

        terrain.set_normal_mode(NormalMode::Parallel);
        assert_eq!(terrain.normal_mode(), NormalMode::Parallel);
        terrain.compute_normals().unwrap();

        assert_eq!(terrain.normals(), sequential.as_slice());
    }

    #[test]
    fn parallel_mode_needs_resident_mesh() {
        let mut terrain = Terrain::new(TerrainConfig {
            normal_mode: NormalMode::Parallel,
            ..TerrainConfig::default()
        });

        assert!(matches!(
            terrain.compute_normals(),
            Err(TerrainError::Gpu(crate::gpu::GpuError::NotResident))
        ));
    }

    #[test]
    fn degenerate_grid_is_not_an_error() {
        let mut terrain = terrain(1);
        terrain.generate().unwrap();
        terrain.compute_normals().unwrap();

        assert_eq!(terrain.vertex_count(), 1);
        assert_eq!(terrain.triangle_count(), 0);
        assert_eq!(terrain.normals(), &[Vec3::ZERO]);
    }

    #[test]
    fn render_includes_normal_lines_on_request() {
        let mut terrain = terrain(3);
        terrain.generate().unwrap();
        terrain.compute_normals().unwrap();

        assert!(terrain.render().normal_lines.is_none());

        terrain.set_show_normals(true);
        let render = terrain.render();
        let lines = render.normal_lines.unwrap();

        assert_eq!(lines.count_vertices(), terrain.triangle_count() * 2);
        assert_eq!(render.surface.count_vertices(), 9);
    }
}
