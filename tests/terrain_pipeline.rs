// End-to-end: heightmap image on disk -> mesh -> normals -> device buffers.

use std::path::PathBuf;

use bevy::prelude::Vec3;
use heightmap_terrain::{
    ElevationGrid, NormalMode, Terrain, TerrainBand, TerrainConfig, TerrainError, VertexHandle,
};
use image::{GrayImage, Luma};

fn write_heightmap(name: &str, image: &GrayImage) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "heightmap_terrain_{}_{}.png",
        std::process::id(),
        name
    ));
    image.save(&path).expect("write test heightmap");
    path
}

fn config(grid_size: usize) -> TerrainConfig {
    TerrainConfig {
        grid_size,
        ..TerrainConfig::default()
    }
}

#[test]
fn flat_heightmap_produces_upward_plane() {
    let path = write_heightmap("flat", &GrayImage::from_pixel(4, 4, Luma([128])));
    let mut terrain = Terrain::new(config(4));

    terrain.load_heightmap(&path).unwrap();
    terrain.generate().unwrap();
    terrain.compute_normals().unwrap();

    assert_eq!(terrain.vertex_count(), 16);
    assert_eq!(terrain.indices().len(), 54);
    assert_eq!(terrain.triangle_count(), 18);
    assert_eq!(&terrain.indices()[..6], &[0, 4, 1, 1, 4, 5]);

    let expected_height = 128. / 255. * 10.;
    for v in terrain.vertices() {
        assert!((v.y - expected_height).abs() < 1e-5);
    }
    assert!((terrain.vertices()[0].y - 5.0).abs() < 0.05);

    for n in terrain.normals() {
        assert!((*n - Vec3::Y).length() < 1e-5, "{n}");
    }

    // Mid-height terrain lands in the vegetation band
    assert_eq!(TerrainBand::classify(expected_height), TerrainBand::Vegetation);

    let _ = std::fs::remove_file(path);
}

#[test]
fn counts_and_index_bounds_hold_for_many_sizes() {
    let gradient = GrayImage::from_fn(9, 7, |x, y| Luma([(x * 20 + y * 9) as u8]));
    let path = write_heightmap("gradient", &gradient);
    let mut terrain = Terrain::new(config(2));
    terrain.load_heightmap(&path).unwrap();

    for n in [2, 3, 5, 16, 31] {
        let mut terrain_n = Terrain::new(config(n));
        terrain_n.set_heightmap(terrain.heightmap().unwrap().clone());
        terrain_n.generate().unwrap();

        assert_eq!(terrain_n.vertex_count(), n * n);
        assert_eq!(terrain_n.indices().len(), 6 * (n - 1) * (n - 1));
        assert!(terrain_n.indices().iter().all(|&i| (i as usize) < n * n));
    }

    let _ = std::fs::remove_file(path);
}

#[test]
fn sequential_and_parallel_agree_on_rough_terrain() {
    let rough = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 53 + y * 97) % 256) as u8]));
    let path = write_heightmap("rough", &rough);
    let mut terrain = Terrain::new(config(48));
    terrain.load_heightmap(&path).unwrap();
    terrain.generate().unwrap();

    terrain.compute_normals().unwrap();
    let sequential = terrain.normals().to_vec();

    // Idempotent with unchanged geometry
    terrain.compute_normals().unwrap();
    assert_eq!(terrain.normals(), sequential.as_slice());

    terrain.set_normal_mode(NormalMode::Parallel);
    terrain.compute_normals().unwrap();
    let parallel = terrain.normals().to_vec();

    assert_eq!(parallel.len(), sequential.len());
    for (s, p) in sequential.iter().zip(&parallel) {
        assert!((*s - *p).length() < 1e-4);
        assert!((p.length() - 1.).abs() < 1e-4);
    }

    // The device copy is what the renderer binds
    assert_eq!(terrain.gpu().read_normals().unwrap(), parallel);

    let _ = std::fs::remove_file(path);
}

#[test]
fn generate_alone_produces_device_normals() {
    let rough = GrayImage::from_fn(16, 16, |x, y| Luma([((x * 29 + y * 61) % 256) as u8]));
    let path = write_heightmap("generate_only", &rough);

    for mode in [NormalMode::Sequential, NormalMode::Parallel] {
        let mut terrain = Terrain::new(TerrainConfig {
            normal_mode: mode,
            ..config(20)
        });
        terrain.load_heightmap(&path).unwrap();
        terrain.generate().unwrap();

        assert!(terrain.normals().iter().all(|n| (n.length() - 1.).abs() < 1e-4));
        assert_eq!(terrain.gpu().read_normals().unwrap(), terrain.normals());
    }

    let _ = std::fs::remove_file(path);
}

#[test]
fn failed_load_keeps_previous_mesh() {
    let path = write_heightmap("keep", &GrayImage::from_pixel(4, 4, Luma([255])));
    let mut terrain = Terrain::new(config(4));
    terrain.load_heightmap(&path).unwrap();
    terrain.generate().unwrap();
    let before = terrain.vertices().to_vec();

    let err = terrain
        .load_heightmap("this/heightmap/does/not/exist.png")
        .unwrap_err();
    assert!(matches!(err, TerrainError::HeightmapLoad { .. }));

    assert_eq!(terrain.vertices(), before.as_slice());
    assert_eq!(terrain.heightmap().map(ElevationGrid::dim), Some((4, 4)));

    // Regenerating still uses the last good heightmap
    terrain.generate().unwrap();
    assert_eq!(terrain.vertices(), before.as_slice());

    let _ = std::fs::remove_file(path);
}

#[test]
fn generate_before_load_reports_error() {
    let mut terrain = Terrain::new(config(4));

    assert!(matches!(terrain.generate(), Err(TerrainError::NoHeightmap)));
    assert_eq!(terrain.vertex_count(), 0);
    assert!(terrain.indices().is_empty());
}

#[test]
fn corrupt_image_is_a_load_error() {
    let path = std::env::temp_dir().join(format!(
        "heightmap_terrain_{}_corrupt.png",
        std::process::id()
    ));
    std::fs::write(&path, b"not really a png").unwrap();

    let mut terrain = Terrain::new(config(4));
    assert!(terrain.load_heightmap(&path).is_err());
    assert!(terrain.heightmap().is_none());

    let _ = std::fs::remove_file(path);
}

#[test]
fn vertex_handles_address_rows_and_columns() {
    let image = GrayImage::from_fn(4, 4, |_, y| Luma([if y == 3 { 255 } else { 0 }]));
    let path = write_heightmap("rows", &image);
    let mut terrain = Terrain::new(config(4));
    terrain.load_heightmap(&path).unwrap();
    terrain.generate().unwrap();
    terrain.compute_normals().unwrap();

    let top = terrain.vertex(VertexHandle::from_grid(0, 2, 4).unwrap()).unwrap();
    let bottom = terrain.vertex(VertexHandle::from_grid(3, 2, 4).unwrap()).unwrap();
    assert_eq!(top.y, 0.);
    assert_eq!(bottom.y, 10.);
    assert!(bottom.z > top.z);

    // Flat interior of the low rows faces straight up
    let inner = terrain.normal(VertexHandle::from_grid(1, 1, 4).unwrap()).unwrap();
    assert!((inner - Vec3::Y).length() < 1e-5);

    let _ = std::fs::remove_file(path);
}
