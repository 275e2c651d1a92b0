//! Where population rasters come from.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// WorldPop 2020 unconstrained population counts, HTTPS mirror of the FTP tree.
pub const DEFAULT_SOURCE_URL: &str =
    "https://data.worldpop.org/GIS/Population/Global_2000_2020/{year}/{ISO}/{iso}_ppp_{year}.tif";

/// Supplies a readable raster for a country, or reports it as unavailable.
pub trait RasterSource: Send + Sync {
    /// `dest_dir` is a per-country scratch directory the source may write into.
    fn fetch(&self, iso: &str, dest_dir: &Path) -> Result<PathBuf>;
}

impl<T: RasterSource + ?Sized> RasterSource for Box<T> {
    fn fetch(&self, iso: &str, dest_dir: &Path) -> Result<PathBuf> {
        (**self).fetch(iso, dest_dir)
    }
}

/// File name of the population raster for `iso` and `year`.
pub fn raster_file_name(iso: &str, year: u16) -> String {
    format!("{}_ppp_{}.tif", iso.to_lowercase(), year)
}

/// Expands `{ISO}`, `{iso}` and `{year}` in a URL template.
pub fn expand_template(template: &str, iso: &str, year: u16) -> String {
    template
        .replace("{ISO}", &iso.to_uppercase())
        .replace("{iso}", &iso.to_lowercase())
        .replace("{year}", &year.to_string())
}

/// Downloads rasters over HTTP(S).
pub struct HttpRasterSource {
    client: Client,
    url_template: String,
    year: u16,
}

impl HttpRasterSource {
    pub fn new(url_template: impl Into<String>, year: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
            year,
        })
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let mut file = File::create(dest).map_err(|e| Error::file(dest, e))?;
        let bytes = response.copy_to(&mut file)?;
        debug!(bytes, path = ?dest, "Downloaded population raster");
        Ok(())
    }
}

impl RasterSource for HttpRasterSource {
    fn fetch(&self, iso: &str, dest_dir: &Path) -> Result<PathBuf> {
        let url = expand_template(&self.url_template, iso, self.year);
        let dest = dest_dir.join(raster_file_name(iso, self.year));

        info!(url = %url, "Downloading population raster");
        if let Err(e) = self.download(&url, &dest) {
            let _ = fs::remove_file(&dest);
            return Err(Error::FetchUnavailable {
                iso: iso.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(dest)
    }
}

/// Reads rasters already present in a local directory.
pub struct LocalRasterSource {
    dir: PathBuf,
    year: u16,
}

impl LocalRasterSource {
    pub fn new(dir: impl Into<PathBuf>, year: u16) -> Self {
        Self {
            dir: dir.into(),
            year,
        }
    }
}

impl RasterSource for LocalRasterSource {
    fn fetch(&self, iso: &str, _dest_dir: &Path) -> Result<PathBuf> {
        let path = self.dir.join(raster_file_name(iso, self.year));
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::FetchUnavailable {
                iso: iso.to_string(),
                reason: format!("{:?} not found", path),
            })
        }
    }
}
