//! Downsampling of source population rasters to a bounded width.
//!
//! The heavy lifting is done by GDAL's RasterIO with bilinear resampling; this
//! module only decides the output grid and keeps the geotransform consistent
//! with it.

use std::path::Path;

use gdal::raster::ResampleAlg;
use gdal::Dataset;

use crate::error::{Error, Result};
use crate::model::{GeoTransform, Raster, RasterMeta};

/// Default upper bound on the output width in pixels.
pub const DEFAULT_MAX_WIDTH: usize = 3000;

/// Output grid for a resampling operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplePlan {
    pub src_width: usize,
    pub src_height: usize,
    pub out_width: usize,
    pub out_height: usize,
    pub geo_transform: GeoTransform,
}

impl ResamplePlan {
    pub fn new(
        width: usize,
        height: usize,
        geo_transform: GeoTransform,
        max_width: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidRaster(format!(
                "raster has zero extent ({} x {})",
                width, height
            )));
        }
        if max_width == 0 {
            return Err(Error::Config("max_width must be positive".to_string()));
        }

        let scale = max_width as f64 / width as f64;
        if scale >= 1.0 {
            // never upsample
            return Ok(Self {
                src_width: width,
                src_height: height,
                out_width: width,
                out_height: height,
                geo_transform,
            });
        }

        let out_width = ((width as f64 * scale).round() as usize).clamp(1, max_width);
        let out_height = ((height as f64 * scale).round() as usize).max(1);

        let x_factor = width as f64 / out_width as f64;
        let y_factor = height as f64 / out_height as f64;

        Ok(Self {
            src_width: width,
            src_height: height,
            out_width,
            out_height,
            geo_transform: scale_transform(&geo_transform, x_factor, y_factor),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.out_width == self.src_width && self.out_height == self.src_height
    }
}

/// `transform ∘ scale(x_factor, y_factor)`: pixel size and rotation terms are
/// stretched, the origin stays put.
pub fn scale_transform(gt: &GeoTransform, x_factor: f64, y_factor: f64) -> GeoTransform {
    [
        gt[0],
        gt[1] * x_factor,
        gt[2] * y_factor,
        gt[3],
        gt[4] * x_factor,
        gt[5] * y_factor,
    ]
}

/// Reads band 1 of `path` at no more than `max_width` columns using bilinear
/// resampling.
pub fn read_resampled(path: &Path, max_width: usize) -> Result<Raster> {
    let dataset = Dataset::open(path).map_err(|e| Error::io(path, e))?;
    let (width, height) = dataset.raster_size();
    let geo_transform = dataset
        .geo_transform()
        .map_err(|e| Error::io(path, e))?;

    let plan = ResamplePlan::new(width, height, geo_transform, max_width)?;

    tracing::debug!(
        src_width = width,
        src_height = height,
        out_width = plan.out_width,
        out_height = plan.out_height,
        "Resampling raster"
    );

    let band = dataset.rasterband(1).map_err(|e| Error::io(path, e))?;
    let nodata = band.no_data_value();
    let buffer = band
        .read_as::<f64>(
            (0, 0),
            (width, height),
            (plan.out_width, plan.out_height),
            Some(ResampleAlg::Bilinear),
        )
        .map_err(|e| Error::io(path, e))?;
    let (_, values) = buffer.into_shape_and_vec();

    let meta = RasterMeta {
        width: plan.out_width,
        height: plan.out_height,
        geo_transform: plan.geo_transform,
        projection: dataset.projection(),
        nodata,
    };
    Raster::new(meta, values)
}
