//! Instrument specifications and the instrument registry.
//!
//! The registry is an explicit configuration store: it is built once
//! (from JSON or programmatically) and passed by reference into the
//! pipeline. Specs are read-only after registration.

use crate::constants::{ARCMIN_PER_DEG, ARCSEC_PER_DEG};
use crate::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Point-spread function descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PsfSpec {
    /// Gaussian PSF with the given FWHM in arcseconds.
    Gaussian { fwhm: f64 },
    /// Single PSF image taken from a PSF image set file.
    Image {
        file: PathBuf,
        #[serde(default)]
        index: usize,
    },
    /// Energy and off-axis dependent PSF images.
    MultiImage { file: PathBuf },
}

/// A named, immutable instrument definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Registry name.
    pub name: String,
    /// Effective-area response file.
    pub arf: PathBuf,
    /// Redistribution matrix file.
    pub rmf: PathBuf,
    /// Name of the instrumental background, if any.
    #[serde(default)]
    pub bkgnd: Option<String>,
    /// Field of view in arcminutes.
    pub fov: f64,
    /// Number of pixels on a side.
    pub num_pixels: usize,
    /// Focal length in meters.
    pub focal_length: f64,
    /// Whether pointing dither is applied.
    #[serde(default = "default_dither")]
    pub dither: bool,
    /// PSF descriptor, or `None` for a perfect PSF.
    #[serde(default)]
    pub psf: Option<PsfSpec>,
    /// Aim point in detector coordinates (pixels from the array center).
    #[serde(default)]
    pub aimpt_coords: [f64; 2],
}

fn default_dither() -> bool {
    true
}

impl InstrumentSpec {
    /// Plate scale in degrees per pixel.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn plate_scale_deg(&self) -> f64 {
        self.fov / self.num_pixels as f64 / ARCMIN_PER_DEG
    }

    /// Plate scale in arcminutes per pixel.
    #[must_use]
    pub fn plate_scale_arcmin(&self) -> f64 {
        self.plate_scale_deg() * ARCMIN_PER_DEG
    }

    /// Plate scale in arcseconds per pixel.
    #[must_use]
    pub fn plate_scale_arcsec(&self) -> f64 {
        self.plate_scale_deg() * ARCSEC_PER_DEG
    }

    /// Physical pixel size in millimeters at the focal plane.
    #[must_use]
    pub fn plate_scale_mm(&self) -> f64 {
        self.focal_length * 1.0e3 * self.plate_scale_deg().to_radians()
    }

    /// Pixel coordinate of the array center (1-based convention).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pix_center(&self) -> f64 {
        0.5 * (self.num_pixels as f64 + 1.0)
    }

    /// Checks that the geometry is physically meaningful.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ConfigError("instrument name is empty".to_string()));
        }
        if !(self.fov.is_finite() && self.fov > 0.0) {
            return Err(Error::ConfigError(format!(
                "instrument {}: field of view must be positive, got {}",
                self.name, self.fov
            )));
        }
        if self.num_pixels == 0 {
            return Err(Error::ConfigError(format!(
                "instrument {}: num_pixels must be positive",
                self.name
            )));
        }
        if !(self.focal_length.is_finite() && self.focal_length > 0.0) {
            return Err(Error::ConfigError(format!(
                "instrument {}: focal length must be positive, got {}",
                self.name, self.focal_length
            )));
        }
        if let Some(PsfSpec::Gaussian { fwhm }) = &self.psf {
            if !(fwhm.is_finite() && *fwhm >= 0.0) {
                return Err(Error::ConfigError(format!(
                    "instrument {}: PSF FWHM must be non-negative, got {fwhm}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Kind of background spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundKind {
    /// Particle background, counts/s/arcmin²/keV in the detector.
    Instrumental,
    /// Diffuse sky background, photons/s/cm²/arcmin²/keV.
    Astrophysical,
}

/// A named background spectrum file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSpec {
    /// Registry name.
    pub name: String,
    /// Two-column text file: energy (keV), intensity.
    pub file: PathBuf,
    /// Background kind.
    pub kind: BackgroundKind,
    /// Focal length (m) the instrumental spectrum was measured at.
    #[serde(default = "default_reference_focal_length")]
    pub reference_focal_length: f64,
}

fn default_reference_focal_length() -> f64 {
    10.0
}

#[derive(Serialize, Deserialize, Default)]
struct JsonRegistry {
    #[serde(default)]
    instruments: Vec<InstrumentSpec>,
    #[serde(default)]
    backgrounds: Vec<BackgroundSpec>,
}

/// Named store of instrument and background definitions.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: BTreeMap<String, InstrumentSpec>,
    backgrounds: BTreeMap<String, BackgroundSpec>,
    data_dir: Option<PathBuf>,
}

impl InstrumentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory used to resolve relative data file paths.
    #[must_use]
    pub fn with_data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Loads a registry from a JSON file.
    ///
    /// Relative data files are resolved against the file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// contains an invalid or duplicate instrument.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let json: JsonRegistry = serde_json::from_reader(BufReader::new(file))?;
        let mut registry = Self::from_json_registry(json)?;
        if let Some(parent) = path.parent() {
            registry.data_dir = Some(parent.to_path_buf());
        }
        debug!(
            "Loaded {} instruments and {} backgrounds from {}",
            registry.instruments.len(),
            registry.backgrounds.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Loads a registry from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or contains an invalid or
    /// duplicate instrument.
    pub fn from_json(json: &str) -> Result<Self> {
        let json: JsonRegistry = serde_json::from_str(json)?;
        Self::from_json_registry(json)
    }

    fn from_json_registry(json: JsonRegistry) -> Result<Self> {
        let mut registry = Self::new();
        for spec in json.instruments {
            registry.register(spec)?;
        }
        for background in json.backgrounds {
            registry.register_background(background);
        }
        Ok(registry)
    }

    /// Serializes the registry contents to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let json = JsonRegistry {
            instruments: self.instruments.values().cloned().collect(),
            backgrounds: self.backgrounds.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&json)?)
    }

    /// Adds an instrument.
    ///
    /// # Errors
    /// Returns an error if the spec is invalid or the name is taken.
    pub fn register(&mut self, spec: InstrumentSpec) -> Result<()> {
        spec.validate()?;
        if self.instruments.contains_key(&spec.name) {
            return Err(Error::DuplicateInstrument(spec.name));
        }
        self.instruments.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Adds or replaces a background spectrum.
    pub fn register_background(&mut self, background: BackgroundSpec) {
        self.backgrounds.insert(background.name.clone(), background);
    }

    /// Looks up an instrument by name.
    ///
    /// # Errors
    /// Returns [`Error::UnknownInstrument`] if the name is not registered.
    pub fn get(&self, name: &str) -> Result<&InstrumentSpec> {
        self.instruments
            .get(name)
            .ok_or_else(|| Error::UnknownInstrument(name.to_string()))
    }

    /// Looks up a background by name.
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackground`] if the name is not registered.
    pub fn background(&self, name: &str) -> Result<&BackgroundSpec> {
        self.backgrounds
            .get(name)
            .ok_or_else(|| Error::UnknownBackground(name.to_string()))
    }

    /// Returns true if the instrument is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.instruments.contains_key(name)
    }

    /// Iterates over instrument names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }

    /// Iterates over instrument specs in name order.
    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentSpec> {
        self.instruments.values()
    }

    /// Number of registered instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Returns true if no instruments are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Resolves a data file path.
    ///
    /// The path is used as given if it exists, otherwise it is looked up in
    /// the data directory.
    ///
    /// # Errors
    /// Returns [`Error::MissingFile`] if neither location exists.
    pub fn resolve_path(&self, path: &Path) -> Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = &self.data_dir {
            let candidate = dir.join(path);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::MissingFile(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const REGISTRY_JSON: &str = r#"{
        "instruments": [
            {
                "name": "hdxi",
                "arf": "xrs_hdxi_3x10.arf",
                "rmf": "xrs_hdxi.rmf",
                "bkgnd": "acisi",
                "fov": 20.0,
                "num_pixels": 4096,
                "focal_length": 10.0,
                "psf": {"kind": "gaussian", "fwhm": 0.5}
            },
            {
                "name": "mucal",
                "arf": "xrs_mucal_3x10.arf",
                "rmf": "xrs_mucal.rmf",
                "fov": 5.0,
                "num_pixels": 300,
                "focal_length": 10.0,
                "dither": false
            }
        ],
        "backgrounds": [
            {"name": "acisi", "file": "acisi_particle_bkgnd.dat", "kind": "instrumental"}
        ]
    }"#;

    #[test]
    fn test_registry_from_json() {
        let registry = InstrumentRegistry::from_json(REGISTRY_JSON).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["hdxi", "mucal"]);

        let hdxi = registry.get("hdxi").unwrap();
        assert!(hdxi.dither);
        assert_eq!(hdxi.psf, Some(PsfSpec::Gaussian { fwhm: 0.5 }));
        assert_eq!(hdxi.bkgnd.as_deref(), Some("acisi"));

        let mucal = registry.get("mucal").unwrap();
        assert!(!mucal.dither);
        assert!(mucal.psf.is_none());

        let bkgnd = registry.background("acisi").unwrap();
        assert_eq!(bkgnd.kind, BackgroundKind::Instrumental);
        assert_relative_eq!(bkgnd.reference_focal_length, 10.0);
    }

    #[test]
    fn test_unknown_instrument() {
        let registry = InstrumentRegistry::from_json(REGISTRY_JSON).unwrap();
        assert!(matches!(
            registry.get("chandra"),
            Err(Error::UnknownInstrument(name)) if name == "chandra"
        ));
        assert!(registry.background("nope").is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = InstrumentRegistry::from_json(REGISTRY_JSON).unwrap();
        let spec = registry.get("hdxi").unwrap().clone();
        assert!(matches!(
            registry.register(spec),
            Err(Error::DuplicateInstrument(_))
        ));
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let mut registry = InstrumentRegistry::new();
        let mut spec = InstrumentRegistry::from_json(REGISTRY_JSON)
            .unwrap()
            .get("mucal")
            .unwrap()
            .clone();
        spec.num_pixels = 0;
        assert!(matches!(
            registry.register(spec),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_plate_scale() {
        let registry = InstrumentRegistry::from_json(REGISTRY_JSON).unwrap();
        let mucal = registry.get("mucal").unwrap();
        // 5 arcmin over 300 pixels = 1 arcsec per pixel
        assert_relative_eq!(mucal.plate_scale_arcsec(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(mucal.pix_center(), 150.5);
    }

    #[test]
    fn test_json_roundtrip() {
        let registry = InstrumentRegistry::from_json(REGISTRY_JSON).unwrap();
        let json = registry.to_json().unwrap();
        let reloaded = InstrumentRegistry::from_json(&json).unwrap();
        assert_eq!(
            registry.get("hdxi").unwrap(),
            reloaded.get("hdxi").unwrap()
        );
        assert!(reloaded.background("acisi").is_ok());
    }

    #[test]
    fn test_resolve_path_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("resp.arf"), "{}").unwrap();

        let registry = InstrumentRegistry::new().with_data_dir(dir.path());
        let resolved = registry.resolve_path(Path::new("resp.arf")).unwrap();
        assert_eq!(resolved, dir.path().join("resp.arf"));
        assert!(matches!(
            registry.resolve_path(Path::new("missing.arf")),
            Err(Error::MissingFile(_))
        ));
    }
}
