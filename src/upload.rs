//! Upload of rendered rasters to a tile-hosting service.
//!
//! The service is abstracted behind [`TileService`]; [`HttpTileService`] talks
//! to a real endpoint, tests substitute scripted fakes. [`TileUploader`] owns
//! the naming and the retry policy.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::blocking::{multipart, Client};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::model::UploadedTileset;

/// Status the service uses for "try again later".
pub const DEFAULT_RETRY_STATUS: u16 = 422;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TILESET_ID_LEN: usize = 8;
const NAME_SUFFIX_LEN: usize = 6;

/// Bearer token for the tile service. Never printed.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A remote service that accepts raster files as tilesets.
pub trait TileService: Send + Sync {
    /// Sends `file` as tileset `tileset_id` and returns the HTTP status code.
    fn upload(&self, file: &Path, tileset_id: &str, name: &str, token: &AccessToken) -> Result<u16>;
}

/// Multipart upload to an HTTP endpoint.
pub struct HttpTileService {
    client: Client,
    endpoint: String,
}

impl HttpTileService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl TileService for HttpTileService {
    fn upload(&self, file: &Path, tileset_id: &str, name: &str, token: &AccessToken) -> Result<u16> {
        let form = multipart::Form::new()
            .text("tileset", tileset_id.to_string())
            .text("name", name.to_string())
            .file("file", file)
            .map_err(|e| Error::file(file, e))?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token.secret())
            .multipart(form)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "Tile service rejected upload");
        }
        Ok(status.as_u16())
    }
}

/// Generates tileset identifiers and display names.
///
/// Seeded generators give reproducible names.
pub struct TilesetNamer {
    owner: String,
    year: u16,
    rng: Mutex<StdRng>,
}

impl TilesetNamer {
    pub fn new(owner: impl Into<String>, year: u16, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            owner: owner.into(),
            year,
            rng: Mutex::new(rng),
        }
    }

    /// Returns `(tileset_id, name)` for a country.
    pub fn next(&self, iso: &str) -> (String, String) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = random_token(&mut *rng, TILESET_ID_LEN);
        let suffix = random_token(&mut *rng, NAME_SUFFIX_LEN);
        (
            format!("{}.{}", self.owner, id),
            format!("{}_ppp_{}-{}", iso.to_lowercase(), self.year, suffix),
        )
    }
}

fn random_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Fixed-delay retry on a single "conflict" status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retry_status: u16,
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_status: DEFAULT_RETRY_STATUS,
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct TileUploader<S> {
    service: S,
    namer: TilesetNamer,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<S: TileService> TileUploader<S> {
    pub fn new(service: S, namer: TilesetNamer, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            service,
            namer,
            policy,
            cancel,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Uploads `path` for `iso`. The tileset id and name are chosen once and
    /// reused on every retry.
    pub fn upload(&self, iso: &str, path: &Path, token: &AccessToken) -> Result<UploadedTileset> {
        let (map_id, name) = self.namer.next(iso);
        let mut attempts = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            attempts += 1;
            let status = self.service.upload(path, &map_id, &name, token)?;

            if (200..300).contains(&status) {
                info!(map_id = %map_id, name = %name, attempts, "Uploaded tileset");
                return Ok(UploadedTileset { map_id, name });
            }

            if status != self.policy.retry_status {
                error!(name = %name, status, "Upload failed");
                return Err(Error::Upload { name, status });
            }

            if attempts > self.policy.max_retries {
                error!(name = %name, attempts, "Could not upload {}", name);
                return Err(Error::UploadRejected { name, attempts });
            }

            warn!(
                name = %name,
                status,
                retry = attempts,
                max_retries = self.policy.max_retries,
                delay_secs = self.policy.delay.as_secs_f64(),
                "Upload rejected, retrying"
            );
            if self.cancel.wait(self.policy.delay) {
                return Err(Error::Cancelled);
            }
        }
    }
}
