use std::fs;
use std::path::Path;

use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};

use crate::error::{Error, Result};
use crate::model::{ClassifiedBands, RasterMeta};

const BAND_NAMES: [&str; 4] = ["R", "G", "B", "A"];

/// Writes classified channels as a single RGBA GeoTIFF.
#[derive(Default)]
pub struct RasterComposer {}

impl RasterComposer {
    pub fn new() -> Self {
        Self {}
    }

    /// Writes `bands` to `output_path` using the georeferencing of `meta`.
    ///
    /// The output always has 4 `u8` bands and no nodata value; transparency is
    /// carried by the alpha band. On failure the partially written file is
    /// removed.
    pub fn write(&self, bands: &ClassifiedBands, meta: &RasterMeta, output_path: &Path) -> Result<()> {
        if (bands.width, bands.height) != (meta.width, meta.height) {
            return Err(Error::InvalidRaster(format!(
                "bands are {} x {} but raster is {} x {}",
                bands.width, bands.height, meta.width, meta.height
            )));
        }

        let result = self.write_rgba(bands, meta, output_path);
        if result.is_err() && output_path.exists() {
            if let Err(e) = fs::remove_file(output_path) {
                tracing::warn!("Failed to remove partial output {:?}: {}", output_path, e);
            }
        }
        result
    }

    fn write_rgba(&self, bands: &ClassifiedBands, meta: &RasterMeta, output_path: &Path) -> Result<()> {
        let (cols, rows) = (bands.width, bands.height);

        tracing::debug!("Writing RGBA GeoTIFF: {} x {} pixels", cols, rows);

        let driver = DriverManager::get_driver_by_name("GTiff").map_err(|e| Error::io(output_path, e))?;

        let mut dataset = driver
            .create_with_band_type::<u8, _>(output_path, cols, rows, 4)
            .map_err(|e| Error::io(output_path, e))?;

        self.set_geo_metadata(&mut dataset, meta, output_path)?;

        for (i, channel) in bands.channels().into_iter().enumerate() {
            let mut band = dataset
                .rasterband(i + 1)
                .map_err(|e| Error::io(output_path, e))?;
            let mut buffer = Buffer::new((cols, rows), channel.to_vec());
            band.write((0, 0), (cols, rows), &mut buffer)
                .map_err(|e| Error::io(output_path, e))?;
            tracing::trace!("Wrote {} band", BAND_NAMES[i]);
        }

        // cached blocks reach disk on flush and close
        dataset.flush_cache().map_err(|e| Error::io(output_path, e))?;
        dataset.close().map_err(|e| Error::io(output_path, e))?;

        Ok(())
    }

    fn set_geo_metadata(&self, dataset: &mut Dataset, meta: &RasterMeta, output_path: &Path) -> Result<()> {
        dataset
            .set_geo_transform(&meta.geo_transform)
            .map_err(|e| Error::io(output_path, e))?;

        if meta.projection.is_empty() {
            tracing::warn!("Source raster has no projection, writing {:?} without one", output_path);
        } else {
            dataset
                .set_projection(&meta.projection)
                .map_err(|e| Error::io(output_path, e))?;
        }

        Ok(())
    }
}
