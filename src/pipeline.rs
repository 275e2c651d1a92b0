//! Per-country orchestration: fetch, resample, classify, compose, upload.
//!
//! The pipeline is best effort. A country that fails at any stage is logged and
//! left out of the result; the rest of the batch carries on. Rendering runs on
//! the rayon pool with one working subdirectory per country, uploads run one
//! after another on the calling thread so retry waits never hold a render
//! worker.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, error, info, info_span, warn};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::legend::Legend;
use crate::model::{RenderedRaster, UploadedTileset};
use crate::resample::read_resampled;
use crate::source::RasterSource;
use crate::upload::{AccessToken, TileService, TileUploader};
use crate::writer::RasterComposer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparing,
    Fetching,
    Resampling,
    Classifying,
    Composing,
    Uploading,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preparing => "preparing",
            Stage::Fetching => "fetching",
            Stage::Resampling => "resampling",
            Stage::Classifying => "classifying",
            Stage::Composing => "composing",
            Stage::Uploading => "uploading",
        };
        f.write_str(name)
    }
}

/// Terminal state of one country.
#[derive(Debug)]
pub enum CountryOutcome {
    /// Rendered but not (yet) uploaded.
    Rendered(RenderedRaster),
    Uploaded(UploadedTileset),
    FetchFailed(Error),
    RenderFailed { stage: Stage, error: Error },
    UploadFailed(Error),
    Cancelled,
}

impl CountryOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, CountryOutcome::Rendered(_) | CountryOutcome::Uploaded(_))
    }
}

/// Outcomes in the order the countries were given.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, CountryOutcome)>,
}

impl BatchReport {
    /// iso → tileset for every uploaded country. Missing countries failed or
    /// were skipped.
    pub fn uploaded(&self) -> BTreeMap<String, UploadedTileset> {
        self.outcomes
            .iter()
            .filter_map(|(iso, outcome)| match outcome {
                CountryOutcome::Uploaded(tileset) => Some((iso.clone(), tileset.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn rendered(&self) -> BTreeMap<String, PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|(iso, outcome)| match outcome {
                CountryOutcome::Rendered(raster) => Some((iso.clone(), raster.path.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }
}

pub struct RenderPipeline<R> {
    source: R,
    legend: Legend,
    composer: RasterComposer,
    work_dir: PathBuf,
    max_width: usize,
    cancel: CancellationToken,
}

impl<R: RasterSource> RenderPipeline<R> {
    pub fn new(
        source: R,
        legend: Legend,
        work_dir: impl Into<PathBuf>,
        max_width: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            legend,
            composer: RasterComposer::new(),
            work_dir: work_dir.into(),
            max_width,
            cancel,
        }
    }

    /// Renders and uploads every country.
    pub fn run<S: TileService>(
        &self,
        countries: &[String],
        uploader: &TileUploader<S>,
        token: &AccessToken,
    ) -> BatchReport {
        let rendered = self.render_all(countries);
        self.upload_all(rendered, uploader, token)
    }

    /// Renders every country in parallel. Successful countries end up as
    /// [`CountryOutcome::Rendered`].
    ///
    /// Codes are upper-cased and deduplicated first so that no two workers
    /// share a working subdirectory.
    pub fn render_all(&self, countries: &[String]) -> BatchReport {
        let countries = unique_codes(countries);
        info!(countries = countries.len(), "Rendering population rasters");
        let outcomes = countries
            .par_iter()
            .map(|iso| {
                let span = info_span!("country", iso = %iso);
                let _enter = span.enter();
                (iso.clone(), self.render_outcome(iso))
            })
            .collect();
        BatchReport { outcomes }
    }

    /// Uploads the rendered countries of `report` sequentially.
    pub fn upload_all<S: TileService>(
        &self,
        report: BatchReport,
        uploader: &TileUploader<S>,
        token: &AccessToken,
    ) -> BatchReport {
        let outcomes = report
            .outcomes
            .into_iter()
            .map(|(iso, outcome)| {
                let raster = match outcome {
                    CountryOutcome::Rendered(raster) => raster,
                    other => return (iso, other),
                };
                let span = info_span!("country", iso = %iso);
                let _enter = span.enter();

                if self.cancel.is_cancelled() {
                    warn!("Run cancelled, skipping upload");
                    return (iso, CountryOutcome::Cancelled);
                }

                let outcome = match uploader.upload(&iso, &raster.path, token) {
                    Ok(tileset) => CountryOutcome::Uploaded(tileset),
                    Err(Error::Cancelled) => {
                        warn!("Run cancelled during upload");
                        CountryOutcome::Cancelled
                    }
                    Err(e) => {
                        error!(stage = %Stage::Uploading, "{}: {}", iso, e);
                        CountryOutcome::UploadFailed(e)
                    }
                };
                (iso, outcome)
            })
            .collect();
        BatchReport { outcomes }
    }

    fn render_outcome(&self, iso: &str) -> CountryOutcome {
        if self.cancel.is_cancelled() {
            warn!("Run cancelled, skipping country");
            return CountryOutcome::Cancelled;
        }

        match self.render_country(iso) {
            Ok(raster) => {
                info!(path = ?raster.path, width = raster.width, height = raster.height, "Rendered");
                CountryOutcome::Rendered(raster)
            }
            Err((Stage::Fetching, error)) => {
                error!("{}: could not fetch population raster: {}", iso, error);
                CountryOutcome::FetchFailed(error)
            }
            Err((stage, error)) => {
                error!(stage = %stage, "{}: {}", iso, error);
                CountryOutcome::RenderFailed { stage, error }
            }
        }
    }

    /// Runs the render stages for one country and writes `<iso>_render.tif`
    /// into the country's working directory.
    pub fn render_country(&self, iso: &str) -> std::result::Result<RenderedRaster, (Stage, Error)> {
        let country_dir = self.country_dir(iso).map_err(|e| (Stage::Preparing, e))?;

        debug!(stage = %Stage::Fetching, "Entering stage");
        let source_path = self
            .source
            .fetch(iso, &country_dir)
            .map_err(|e| (Stage::Fetching, e))?;

        debug!(stage = %Stage::Resampling, path = ?source_path, "Entering stage");
        let raster =
            read_resampled(&source_path, self.max_width).map_err(|e| (Stage::Resampling, e))?;

        debug!(stage = %Stage::Classifying, "Entering stage");
        let bands = self.legend.classify(&raster);

        debug!(stage = %Stage::Composing, "Entering stage");
        let output_path = country_dir.join(format!("{}_render.tif", iso.to_lowercase()));
        self.composer
            .write(&bands, &raster.meta, &output_path)
            .map_err(|e| (Stage::Composing, e))?;

        Ok(RenderedRaster {
            iso: iso.to_string(),
            path: output_path,
            width: raster.meta.width,
            height: raster.meta.height,
        })
    }

    fn country_dir(&self, iso: &str) -> Result<PathBuf> {
        let dir = self.work_dir.join(iso.to_lowercase());
        fs::create_dir_all(&dir).map_err(|e| Error::file(&dir, e))?;
        Ok(dir)
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

/// Upper-cased codes in first-seen order, without duplicates or blanks.
fn unique_codes(countries: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    countries
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}
