pub mod cancel;
pub mod config;
pub mod error;
pub mod legend;
pub mod model;
pub mod pipeline;
pub mod resample;
pub mod source;
pub mod upload;
pub mod writer;

pub use cancel::CancellationToken;
pub use config::ProjectConfig;
pub use error::{Error, LegendError, Result};
pub use legend::{Legend, LegendEntry};
pub use model::{ClassifiedBands, Raster, RasterMeta, RenderedRaster, UploadedTileset};
pub use pipeline::{BatchReport, CountryOutcome, RenderPipeline, Stage};
pub use upload::{AccessToken, HttpTileService, RetryPolicy, TileService, TileUploader, TilesetNamer};
pub use writer::RasterComposer;
