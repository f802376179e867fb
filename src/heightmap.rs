use std::path::Path;

use ndarray::Array2;

use crate::error::TerrainError;

/// Dense grid of 8-bit elevation samples, indexed `[[x, y]]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationGrid(pub Array2<u8>);

impl ElevationGrid {
    /// Decodes an image and reduces it to a single luminance channel.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let path = path.as_ref();
        let luma = image::open(path)
            .map_err(|source| TerrainError::HeightmapLoad {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();

        let (width, height) = luma.dimensions();
        let data = Array2::from_shape_fn((width as usize, height as usize), |(x, y)| {
            luma.get_pixel(x as u32, y as u32).0[0]
        });

        Ok(Self(data))
    }

    /// Builds a grid from row-major samples (`samples[y * width + x]`).
    pub fn from_samples(width: usize, height: usize, samples: Vec<u8>) -> Result<Self, TerrainError> {
        let expected = width * height;
        if samples.len() != expected {
            return Err(TerrainError::HeightmapShape {
                width,
                height,
                expected,
                actual: samples.len(),
            });
        }

        let rows = Array2::from_shape_vec((height, width), samples).map_err(|_| {
            TerrainError::HeightmapShape {
                width,
                height,
                expected,
                actual: expected,
            }
        })?;

        Ok(Self(rows.reversed_axes()))
    }

    pub fn filled(width: usize, height: usize, sample: u8) -> Self {
        Self(Array2::from_elem((width, height), sample))
    }

    pub fn width(&self) -> usize {
        self.0.dim().0
    }

    pub fn height(&self) -> usize {
        self.0.dim().1
    }

    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    pub fn sample(&self, x: usize, y: usize) -> Option<u8> {
        self.0.get([x, y]).copied()
    }

    /// Nearest-neighbour lookup of grid point `(x, z)` on an `n`x`n` lattice,
    /// scaled so a full-scale sample maps to `height_scale`. Points that fall
    /// outside the image yield 0.
    pub fn height_at_grid(&self, x: usize, z: usize, n: usize, height_scale: f32) -> f32 {
        if n == 0 {
            return 0.;
        }

        let hx = (x as f32 / n as f32 * self.width() as f32) as usize;
        let hz = (z as f32 / n as f32 * self.height() as f32) as usize;

        match self.sample(hx, hz) {
            Some(sample) => sample as f32 / 255. * height_scale,
            None => 0.,
        }
    }
}
