//! PSF image sets.
//!
//! A PSF image set is a JSON document listing sampled PSF images:
//!
//! ```json
//! {"images": [{"crpix": [32.5, 32.5], "cdelt": [0.01, 0.01], "cunit": "mm",
//!              "energy": 1.0, "offaxis": 0.0, "data": [[0.0, 1.0], [1.0, 0.0]]}]}
//! ```
//!
//! `data` is row-major with rows along y.

use crate::{Error, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Physical unit of a PSF image pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LengthUnit {
    #[serde(rename = "um")]
    Micrometer,
    #[default]
    #[serde(rename = "mm")]
    Millimeter,
    #[serde(rename = "cm")]
    Centimeter,
    #[serde(rename = "m")]
    Meter,
}

impl LengthUnit {
    /// Conversion factor to millimeters.
    #[must_use]
    pub fn to_mm(self) -> f64 {
        match self {
            LengthUnit::Micrometer => 1.0e-3,
            LengthUnit::Millimeter => 1.0,
            LengthUnit::Centimeter => 10.0,
            LengthUnit::Meter => 1.0e3,
        }
    }
}

#[derive(Deserialize)]
struct RawPsfImage {
    crpix: [f64; 2],
    cdelt: [f64; 2],
    #[serde(default)]
    cunit: LengthUnit,
    #[serde(default)]
    energy: Option<f64>,
    #[serde(default, alias = "theta")]
    offaxis: Option<f64>,
    data: Vec<Vec<f64>>,
}

/// One sampled PSF image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPsfImage")]
pub struct PsfImage {
    pub crpix: [f64; 2],
    pub cdelt: [f64; 2],
    pub cunit: LengthUnit,
    /// Energy the image was sampled at, in the file's units.
    pub energy: Option<f64>,
    /// Off-axis angle in arcminutes.
    pub offaxis: Option<f64>,
    width: usize,
    height: usize,
    /// Normalized cumulative distribution over the flattened image.
    cdf: Vec<f64>,
}

impl TryFrom<RawPsfImage> for PsfImage {
    type Error = String;

    fn try_from(raw: RawPsfImage) -> std::result::Result<Self, String> {
        let height = raw.data.len();
        let width = raw.data.first().map_or(0, Vec::len);
        if width == 0 {
            return Err("PSF image is empty".to_string());
        }
        if raw.data.iter().any(|row| row.len() != width) {
            return Err("PSF image rows differ in length".to_string());
        }

        let mut total = 0.0;
        let mut cdf = Vec::with_capacity(width * height);
        for value in raw.data.iter().flatten() {
            // negative pixels carry no probability
            total += value.max(0.0);
            cdf.push(total);
        }
        if !(total > 0.0 && total.is_finite()) {
            return Err("PSF image has no positive pixels".to_string());
        }
        for c in &mut cdf {
            *c /= total;
        }

        Ok(Self {
            crpix: raw.crpix,
            cdelt: raw.cdelt,
            cunit: raw.cunit,
            energy: raw.energy,
            offaxis: raw.offaxis,
            width,
            height,
            cdf,
        })
    }
}

impl PsfImage {
    /// Builds an image from rows of pixel values.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the image is empty, ragged or has
    /// no positive pixels.
    pub fn new(crpix: [f64; 2], cdelt: [f64; 2], data: Vec<Vec<f64>>) -> Result<Self> {
        Self::try_from(RawPsfImage {
            crpix,
            cdelt,
            cunit: LengthUnit::Millimeter,
            energy: None,
            offaxis: None,
            data,
        })
        .map_err(Error::ConfigError)
    }

    /// `(width, height)` in pixels.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Pixel size in millimeters.
    #[must_use]
    pub fn cdelt_mm(&self) -> [f64; 2] {
        let f = self.cunit.to_mm();
        [self.cdelt[0] * f, self.cdelt[1] * f]
    }

    /// Picks the pixel whose cumulative probability first exceeds `u`,
    /// returning 0-based `(column, row)`.
    #[must_use]
    pub fn pixel_for(&self, u: f64) -> (usize, usize) {
        let idx = self
            .cdf
            .partition_point(|&c| c <= u)
            .min(self.cdf.len() - 1);
        (idx % self.width, idx / self.width)
    }
}

/// A set of PSF images read from one file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PsfImageSet {
    #[serde(skip)]
    path: PathBuf,
    pub images: Vec<PsfImage>,
}

impl PsfImageSet {
    /// Reads an image set.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is malformed, or holds
    /// no images.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut set: Self = serde_json::from_reader(BufReader::new(file))?;
        set.path = path.to_path_buf();
        set.check()?;
        Ok(set)
    }

    /// Parses an image set from JSON.
    ///
    /// # Errors
    /// See [`PsfImageSet::from_file`].
    pub fn from_json(json: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(json)?;
        set.check()?;
        Ok(set)
    }

    fn check(&self) -> Result<()> {
        if self.images.is_empty() {
            return Err(Error::ConfigError(format!(
                "PSF image set {} contains no images",
                self.path.display()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns one image by index.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the index is out of range.
    pub fn image(&self, index: usize) -> Result<&PsfImage> {
        self.images.get(index).ok_or_else(|| {
            Error::ConfigError(format!(
                "PSF image set {} has {} images, index {index} requested",
                self.path.display(),
                self.images.len()
            ))
        })
    }
}
