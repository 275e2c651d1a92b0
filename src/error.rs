use std::path::PathBuf;

use thiserror::Error;

/// A malformed legend configuration. Affects every country identically, so the
/// run is aborted before any raster is touched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LegendError {
    #[error("legend entry {index} has a degenerate range [{low}, {high}]")]
    DegenerateRange { index: usize, low: f64, high: f64 },

    #[error("legend entry {index} has a non-finite bound")]
    NonFiniteBound { index: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("population raster for {iso} is unavailable: {reason}")]
    FetchUnavailable { iso: String, reason: String },

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("invalid legend: {0}")]
    InvalidLegend(#[from] LegendError),

    #[error("raster I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("file I/O failed for {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {name} rejected after {attempts} attempts")]
    UploadRejected { name: String, attempts: u32 },

    #[error("upload of {name} failed with status {status}")]
    Upload { name: String, status: u16 },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: gdal::errors::GdalError) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
