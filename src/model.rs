use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// GDAL ordering: `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
pub type GeoTransform = [f64; 6];

/// Georeferencing carried from the source raster to every derived raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    /// Projection as WKT, empty when the source has none.
    pub projection: String,
    pub nodata: Option<f64>,
}

/// A single-band grid of cell values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub meta: RasterMeta,
    pub values: Vec<f64>,
}

impl Raster {
    pub fn new(meta: RasterMeta, values: Vec<f64>) -> Result<Self> {
        if meta.width == 0 || meta.height == 0 {
            return Err(Error::InvalidRaster(format!(
                "raster has zero extent ({} x {})",
                meta.width, meta.height
            )));
        }
        if values.len() != meta.width * meta.height {
            return Err(Error::InvalidRaster(format!(
                "expected {} cells for {} x {}, got {}",
                meta.width * meta.height,
                meta.width,
                meta.height,
                values.len()
            )));
        }
        Ok(Self { meta, values })
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.meta.height, self.meta.width)
    }
}

/// The four 8-bit channels produced by classifying a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedBands {
    pub width: usize,
    pub height: usize,
    pub red: Vec<u8>,
    pub green: Vec<u8>,
    pub blue: Vec<u8>,
    pub alpha: Vec<u8>,
}

impl ClassifiedBands {
    /// Channels in file band order: R, G, B, A.
    pub fn channels(&self) -> [&[u8]; 4] {
        [&self.red, &self.green, &self.blue, &self.alpha]
    }

    /// RGBA of the cell at (row, col), `None` outside the grid.
    pub fn pixel(&self, row: usize, col: usize) -> Option<[u8; 4]> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let i = row * self.width + col;
        Some([
            *self.red.get(i)?,
            *self.green.get(i)?,
            *self.blue.get(i)?,
            *self.alpha.get(i)?,
        ])
    }
}

/// A composed 4-band raster on disk, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRaster {
    pub iso: String,
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
}

/// Identifiers of a tileset accepted by the tile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedTileset {
    #[serde(rename = "mapid")]
    pub map_id: String,
    pub name: String,
}
