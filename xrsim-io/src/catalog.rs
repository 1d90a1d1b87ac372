//! Source catalogs and point-source flux tables.
//!
//! A catalog is a JSON document listing sources, each pointing to a binary
//! photon list together with its flux normalization:
//!
//! ```json
//! {
//!   "sources": [
//!     {"name": "cluster", "photons": "cluster.phl", "flux": 1.0e-12, "emin": 0.5, "emax": 7.0}
//!   ]
//! }
//! ```
//!
//! When `emin`/`emax` are omitted the band spans the photon energies.

use crate::reader::PhotonListReader;
use crate::{Error, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use xrsim_core::events::ENERGY;
use xrsim_pipeline::{SourceFlux, SourcePhotons};

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Photon list file, relative to the catalog.
    pub photons: PathBuf,
    /// Energy flux in erg/s/cm².
    pub flux: f64,
    #[serde(default)]
    pub emin: Option<f64>,
    #[serde(default)]
    pub emax: Option<f64>,
}

/// A list of sources with photon lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceCatalog {
    pub sources: Vec<CatalogEntry>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SourceCatalog {
    /// Reads a catalog; photon paths are resolved against its directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut catalog: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        catalog.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(catalog)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if the catalog lists no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Reads the photon list of every source.
    ///
    /// # Errors
    /// Returns an error if a photon list cannot be read.
    pub fn load_sources(&self) -> Result<Vec<SourcePhotons>> {
        self.sources
            .iter()
            .map(|entry| {
                let path = self.base_dir.join(&entry.photons);
                let events = PhotonListReader::open(&path)?.read_events()?;
                info!("Read {} photons for source {}.", events.len(), entry.name);
                let flux = match (entry.emin, entry.emax) {
                    (Some(emin), Some(emax)) => SourceFlux::new(entry.flux, emin, emax),
                    _ => {
                        let band = SourceFlux::spanning(entry.flux, events.float(ENERGY)?);
                        SourceFlux::new(
                            entry.flux,
                            entry.emin.unwrap_or(band.emin),
                            entry.emax.unwrap_or(band.emax),
                        )
                    }
                };
                Ok(SourcePhotons::new(&entry.name, events, flux))
            })
            .collect()
    }
}

/// Sampled point-source fluxes, erg/s/cm² in the 0.5-2 keV band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FluxTable {
    pub agn: Vec<f64>,
    pub galaxies: Vec<f64>,
}

impl FluxTable {
    /// Reads a whitespace-separated table of `kind flux` lines, where kind
    /// is `agn` or `gal`. Blank lines and `#` comments are skipped.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for unknown kinds or bad numbers.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parses table text.
    ///
    /// # Errors
    /// See [`FluxTable::from_file`].
    pub fn parse(text: &str) -> Result<Self> {
        let mut table = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(kind), Some(value)) = (parts.next(), parts.next()) else {
                return Err(Error::InvalidFormat(format!(
                    "line {}: expected `kind flux`",
                    lineno + 1
                )));
            };
            let flux: f64 = value.parse().map_err(|e| {
                Error::InvalidFormat(format!("line {}: bad flux {value}: {e}", lineno + 1))
            })?;
            match kind {
                "agn" => table.agn.push(flux),
                "gal" => table.galaxies.push(flux),
                other => {
                    return Err(Error::InvalidFormat(format!(
                        "line {}: unknown source kind {other}",
                        lineno + 1
                    )))
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_photon_list;
    use approx::assert_relative_eq;
    use tempfile::TempDir;
    use xrsim_core::EventList;

    #[test]
    fn test_catalog_loads_photons() {
        let dir = TempDir::new().unwrap();
        let photons =
            EventList::from_sky(vec![1.0, 2.0], vec![3.0, 4.0], vec![0.7, 6.5]).unwrap();
        write_photon_list(dir.path().join("src.phl"), &photons).unwrap();
        let json = r#"{"sources": [
            {"name": "a", "photons": "src.phl", "flux": 1e-13, "emin": 0.5, "emax": 2.0},
            {"name": "b", "photons": "src.phl", "flux": 2e-13}
        ]}"#;
        fs::write(dir.path().join("catalog.json"), json).unwrap();

        let catalog = SourceCatalog::from_file(dir.path().join("catalog.json")).unwrap();
        assert_eq!(catalog.len(), 2);
        let sources = catalog.load_sources().unwrap();
        assert_eq!(sources[0].events, photons);
        assert_relative_eq!(sources[0].flux.emax, 2.0);
        assert_relative_eq!(sources[1].flux.emin, 0.7);
        assert_relative_eq!(sources[1].flux.emax, 6.5);
    }

    #[test]
    fn test_flux_table() {
        let table = FluxTable::parse("# kind flux\nagn 1e-14\n\ngal 2.5e-15\nagn 3e-13\n").unwrap();
        assert_eq!(table.agn, vec![1e-14, 3e-13]);
        assert_eq!(table.galaxies, vec![2.5e-15]);
        assert!(FluxTable::parse("star 1e-14").is_err());
        assert!(FluxTable::parse("agn bright").is_err());
    }
}
