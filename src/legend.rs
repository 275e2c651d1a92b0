use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::LegendError;
use crate::model::{ClassifiedBands, Raster};

/// Values at or below this are treated as "no data" and rendered transparent.
pub const NODATA_SENTINEL: f64 = -1.0;

pub type Rgb = [u8; 3];

/// One color ramp: values in `range` are interpolated from `color[0]` to `color[1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub range: [f64; 2],
    pub color: [Rgb; 2],
}

impl LegendEntry {
    pub fn new(low: f64, high: f64, color_low: Rgb, color_high: Rgb) -> Self {
        Self {
            range: [low, high],
            color: [color_low, color_high],
        }
    }

    /// Position of `value` inside this range, `Some` only when it falls in `[0, 1]`.
    fn position(&self, value: f64) -> Option<f64> {
        let [low, high] = self.range;
        let t = (value - low) / (high - low);
        (0.0..=1.0).contains(&t).then_some(t)
    }

    fn interpolate(&self, t: f64) -> Rgb {
        let [from, to] = self.color;
        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let v = from[c] as f64 + t * (to[c] as f64 - from[c] as f64);
            rgb[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        rgb
    }
}

/// A validated, ordered list of legend entries.
///
/// Entries may overlap; for a value covered by several entries the one that
/// comes last in the list decides the color.
#[derive(Debug, Clone, PartialEq)]
pub struct Legend {
    entries: Vec<LegendEntry>,
}

impl Legend {
    pub fn new(entries: Vec<LegendEntry>) -> Result<Self, LegendError> {
        for (index, entry) in entries.iter().enumerate() {
            let [low, high] = entry.range;
            if !low.is_finite() || !high.is_finite() {
                return Err(LegendError::NonFiniteBound { index });
            }
            if low == high {
                return Err(LegendError::DegenerateRange { index, low, high });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LegendEntry] {
        &self.entries
    }

    /// RGB for a single value. Unmatched values are black.
    pub fn color_of(&self, value: f64) -> Rgb {
        let mut rgb = [0u8; 3];
        for entry in &self.entries {
            if let Some(t) = entry.position(value) {
                rgb = entry.interpolate(t);
            }
        }
        rgb
    }

    /// Classifies every cell of `raster` into R, G, B and A channels.
    pub fn classify(&self, raster: &Raster) -> ClassifiedBands {
        let (rows, cols) = raster.shape();
        tracing::debug!(
            rows,
            cols,
            entries = self.entries.len(),
            "Classifying raster"
        );

        let pixels: Vec<[u8; 4]> = raster
            .values
            .par_iter()
            .map(|&value| {
                let [r, g, b] = self.color_of(value);
                [r, g, b, alpha_of(value)]
            })
            .collect();

        let mut bands = ClassifiedBands {
            width: cols,
            height: rows,
            red: Vec::with_capacity(pixels.len()),
            green: Vec::with_capacity(pixels.len()),
            blue: Vec::with_capacity(pixels.len()),
            alpha: Vec::with_capacity(pixels.len()),
        };
        for [r, g, b, a] in pixels {
            bands.red.push(r);
            bands.green.push(g);
            bands.blue.push(b);
            bands.alpha.push(a);
        }
        bands
    }
}

/// Opaque for any value above the sentinel, transparent otherwise (NaN included).
pub fn alpha_of(value: f64) -> u8 {
    if value > NODATA_SENTINEL {
        255
    } else {
        0
    }
}
