use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::TerrainError;
use crate::meshing::{GridSettings, MAX_GRID_SIZE};
use crate::normals::NormalMode;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub heightmap: PathBuf,
    pub grid_size: usize,
    pub world_size: f32,
    pub height_scale: f32,
    pub normal_mode: NormalMode,
    pub show_normals: bool,
    pub normal_line_length: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            heightmap: PathBuf::from("assets/heightmap.png"),
            grid_size: 128,
            world_size: 50.,
            height_scale: 10.,
            normal_mode: NormalMode::Sequential,
            show_normals: false,
            normal_line_length: 0.5,
        }
    }
}

impl TerrainConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, TerrainError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TerrainError> {
        if self.grid_size > MAX_GRID_SIZE {
            return Err(TerrainError::GridTooLarge {
                grid_size: self.grid_size,
                max: MAX_GRID_SIZE,
            });
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| TerrainError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn grid_settings(&self) -> GridSettings {
        GridSettings {
            size: self.grid_size,
            world_size: self.world_size,
            height_scale: self.height_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        assert_eq!(TerrainConfig::from_toml_str("").unwrap(), TerrainConfig::default());
    }

    #[test]
    fn partial_file_overrides_fields() {
        let config = TerrainConfig::from_toml_str(
            r#"
            heightmap = "maps/valley.png"
            grid_size = 64
            normal_mode = "parallel"
            show_normals = true
            "#,
        )
        .unwrap();

        assert_eq!(config.heightmap, PathBuf::from("maps/valley.png"));
        assert_eq!(config.grid_size, 64);
        assert_eq!(config.normal_mode, NormalMode::Parallel);
        assert!(config.show_normals);
        assert_eq!(config.world_size, 50.);
        assert_eq!(config.grid_settings().height_scale, 10.);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = TerrainConfig::from_toml_str("normal_mode = \"gpu\"").unwrap_err();
        assert!(matches!(err, TerrainError::ConfigParse(_)));
    }

    #[test]
    fn grid_larger_than_index_range_is_rejected() {
        let err = TerrainConfig::from_toml_str("grid_size = 70000").unwrap_err();
        assert!(matches!(
            err,
            TerrainError::GridTooLarge { grid_size: 70_000, .. }
        ));

        assert!(TerrainConfig::from_toml_str("grid_size = 65535").is_ok());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = TerrainConfig::load("no/such/terrain.toml").unwrap_err();
        assert!(matches!(err, TerrainError::ConfigRead { .. }));
    }
}
