use bevy::prelude::Color;

/// Elevation bands, ordered from lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainBand {
    Water,
    Sand,
    Vegetation,
    Rock,
    Snow,
}

// Upper bounds (exclusive) of every band but the last
const BANDS: [(f32, TerrainBand); 4] = [
    (1.0, TerrainBand::Water),
    (3.0, TerrainBand::Sand),
    (6.0, TerrainBand::Vegetation),
    (8.0, TerrainBand::Rock),
];

impl TerrainBand {
    pub fn classify(height: f32) -> Self {
        BANDS
            .iter()
            .find(|(upper, _)| height < *upper)
            .map(|(_, band)| *band)
            .unwrap_or(TerrainBand::Snow)
    }

    pub fn rgb(self) -> [f32; 3] {
        match self {
            TerrainBand::Water => [0.2, 0.2, 0.8],
            TerrainBand::Sand => [0.8, 0.7, 0.4],
            TerrainBand::Vegetation => [0.4, 0.8, 0.4],
            TerrainBand::Rock => [0.5, 0.5, 0.5],
            TerrainBand::Snow => [0.95, 0.95, 0.95],
        }
    }

    pub fn color(self) -> Color {
        let [r, g, b] = self.rgb();
        Color::rgb(r, g, b)
    }
}

pub fn height_color(height: f32) -> Color {
    TerrainBand::classify(height).color()
}
