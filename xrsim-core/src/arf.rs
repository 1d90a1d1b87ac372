//! Effective-area responses (ARFs).

use crate::response::ResponseFile;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Energy-dependent effective area curve.
///
/// Areas are in cm², energies in keV. Interpolation is linear on the bin
/// midpoints and zero outside the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveArea {
    filename: PathBuf,
    elo: Vec<f64>,
    ehi: Vec<f64>,
    emid: Vec<f64>,
    eff_area: Vec<f64>,
    max_area: f64,
}

impl EffectiveArea {
    /// Builds a curve from bin edges and areas.
    ///
    /// # Errors
    /// Returns [`Error::MalformedResponse`] if the arrays differ in length,
    /// are empty, the bins are not ascending and non-overlapping, or an area
    /// is negative.
    pub fn new(elo: Vec<f64>, ehi: Vec<f64>, eff_area: Vec<f64>) -> Result<Self> {
        if elo.is_empty() {
            return Err(Error::MalformedResponse(
                "effective area curve has no energy bins".to_string(),
            ));
        }
        if elo.len() != ehi.len() || elo.len() != eff_area.len() {
            return Err(Error::MalformedResponse(format!(
                "effective area columns differ in length: {} / {} / {}",
                elo.len(),
                ehi.len(),
                eff_area.len()
            )));
        }
        validate_energy_bins(&elo, &ehi)?;
        if let Some(bad) = eff_area.iter().find(|a| !(**a >= 0.0)) {
            return Err(Error::MalformedResponse(format!(
                "effective area must be non-negative, got {bad}"
            )));
        }

        let emid = elo
            .iter()
            .zip(&ehi)
            .map(|(lo, hi)| 0.5 * (lo + hi))
            .collect();
        let max_area = eff_area.iter().copied().fold(0.0, f64::max);

        Ok(Self {
            filename: PathBuf::new(),
            elo,
            ehi,
            emid,
            eff_area,
            max_area,
        })
    }

    /// Builds a constant-area curve with `nbins` linear bins in `[emin, emax]`.
    ///
    /// # Errors
    /// Returns an error if the range or bin count is invalid.
    #[allow(clippy::cast_precision_loss)]
    pub fn flat(emin: f64, emax: f64, nbins: usize, area: f64) -> Result<Self> {
        if nbins == 0 || !(emax > emin) {
            return Err(Error::ConfigError(format!(
                "invalid flat response range [{emin}, {emax}] with {nbins} bins"
            )));
        }
        let de = (emax - emin) / nbins as f64;
        let elo: Vec<f64> = (0..nbins).map(|i| emin + de * i as f64).collect();
        let ehi: Vec<f64> = (1..=nbins).map(|i| emin + de * i as f64).collect();
        Self::new(elo, ehi, vec![area; nbins])
    }

    /// Reads the `SPECRESP` extension of a response file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or lacks the extension or
    /// its columns.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = ResponseFile::open(path)?;
        Self::from_response(&file)
    }

    /// Builds the curve from an already loaded response file.
    ///
    /// # Errors
    /// See [`EffectiveArea::from_file`].
    pub fn from_response(file: &ResponseFile) -> Result<Self> {
        let ext = file.extension("SPECRESP")?;
        let mut arf = Self::new(
            ext.float_column("ENERG_LO")?,
            ext.float_column("ENERG_HI")?,
            ext.float_column("SPECRESP")?,
        )?;
        arf.filename = file.path().to_path_buf();
        Ok(arf)
    }

    /// File the curve was read from (empty if built in memory).
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Lower bin edges (keV).
    #[must_use]
    pub fn elo(&self) -> &[f64] {
        &self.elo
    }

    /// Upper bin edges (keV).
    #[must_use]
    pub fn ehi(&self) -> &[f64] {
        &self.ehi
    }

    /// Bin midpoints (keV).
    #[must_use]
    pub fn emid(&self) -> &[f64] {
        &self.emid
    }

    /// Effective area per bin (cm²).
    #[must_use]
    pub fn eff_area(&self) -> &[f64] {
        &self.eff_area
    }

    /// Peak effective area (cm²).
    #[must_use]
    pub fn max_area(&self) -> f64 {
        self.max_area
    }

    /// Interpolates the effective area at one energy.
    #[must_use]
    pub fn interpolate_area(&self, energy: f64) -> f64 {
        let n = self.emid.len();
        let first = self.emid[0];
        let last = self.emid[n - 1];
        if !(energy >= first && energy <= last) {
            return 0.0;
        }
        if energy == last {
            return self.eff_area[n - 1];
        }
        // energy in [emid[i-1], emid[i])
        let i = self.emid.partition_point(|&m| m <= energy);
        let (x0, x1) = (self.emid[i - 1], self.emid[i]);
        let (y0, y1) = (self.eff_area[i - 1], self.eff_area[i]);
        y0 + (y1 - y0) * (energy - x0) / (x1 - x0)
    }

    /// Interpolates the effective area at many energies.
    #[must_use]
    pub fn interpolate_areas(&self, energies: &[f64]) -> Vec<f64> {
        energies.iter().map(|&e| self.interpolate_area(e)).collect()
    }
}

/// Relative tolerance on shared bin edges.
const EDGE_RTOL: f64 = 1e-9;

/// Slack allowed between the upper edge of one bin and the lower edge of
/// the next, which tabulated grids only match up to round-off.
#[must_use]
pub fn edge_tolerance(edge: f64) -> f64 {
    EDGE_RTOL * edge.abs().max(1.0)
}

/// Checks that energy bins are ascending and non-overlapping, up to
/// [`edge_tolerance`] between neighbours.
pub(crate) fn validate_energy_bins(elo: &[f64], ehi: &[f64]) -> Result<()> {
    for (i, (lo, hi)) in elo.iter().zip(ehi).enumerate() {
        if !(hi > lo) {
            return Err(Error::MalformedResponse(format!(
                "energy bin {i} is empty or inverted: [{lo}, {hi}]"
            )));
        }
        if i > 0 && *lo < ehi[i - 1] - edge_tolerance(ehi[i - 1]) {
            return Err(Error::MalformedResponse(format!(
                "energy bin {i} overlaps its predecessor: {lo} < {}",
                ehi[i - 1]
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arf() -> EffectiveArea {
        EffectiveArea::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![100.0, 200.0, 400.0, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_interpolation_on_midpoints() {
        let arf = arf();
        assert_relative_eq!(arf.interpolate_area(0.5), 100.0);
        assert_relative_eq!(arf.interpolate_area(1.0), 150.0);
        assert_relative_eq!(arf.interpolate_area(2.5), 400.0);
        assert_relative_eq!(arf.interpolate_area(3.0), 200.0);
        assert_relative_eq!(arf.interpolate_area(3.5), 0.0);
    }

    #[test]
    fn test_zero_outside_grid() {
        let arf = arf();
        assert_relative_eq!(arf.interpolate_area(0.49), 0.0);
        assert_relative_eq!(arf.interpolate_area(3.51), 0.0);
        assert_relative_eq!(arf.interpolate_area(f64::NAN), 0.0);
    }

    #[test]
    fn test_max_area() {
        assert_relative_eq!(arf().max_area(), 400.0);
    }

    #[test]
    fn test_rejects_bad_bins() {
        assert!(EffectiveArea::new(vec![1.0, 0.5], vec![2.0, 3.0], vec![1.0, 1.0]).is_err());
        assert!(EffectiveArea::new(vec![1.0], vec![1.0], vec![1.0]).is_err());
        assert!(EffectiveArea::new(vec![1.0], vec![2.0], vec![-1.0]).is_err());
        assert!(EffectiveArea::new(vec![], vec![], vec![]).is_err());
    }

    #[test]
    fn test_accepts_round_off_between_edges() {
        let elo: Vec<f64> = (0..20).map(|i| 0.5 + 0.1 * f64::from(i)).collect();
        let ehi: Vec<f64> = elo.iter().map(|e| e + 0.1).collect();
        assert!(elo.iter().skip(1).zip(&ehi).any(|(lo, hi)| (lo - hi).abs() > 0.0));

        let arf = EffectiveArea::new(elo, ehi, vec![10.0; 20]).unwrap();
        assert_relative_eq!(arf.interpolate_area(1.3), 10.0);
    }

    #[test]
    fn test_rejects_real_overlap() {
        let err = EffectiveArea::new(vec![1.0, 1.9], vec![2.0, 3.0], vec![1.0, 1.0]);
        assert!(matches!(err, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_flat_response() {
        let arf = EffectiveArea::flat(0.1, 10.0, 99, 1000.0).unwrap();
        assert_eq!(arf.elo().len(), 99);
        assert_relative_eq!(arf.interpolate_area(5.0), 1000.0);
        assert_relative_eq!(arf.ehi()[98], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_from_response_file() {
        let json = r#"{"SPECRESP": {"header": {}, "data": {
            "ENERG_LO": [0.1, 0.2], "ENERG_HI": [0.2, 0.3], "SPECRESP": [10.0, null]
        }}}"#;
        let file = ResponseFile::from_json("test.arf", json).unwrap();
        let arf = EffectiveArea::from_response(&file).unwrap();
        assert_eq!(arf.eff_area(), &[10.0, 0.0]);
        assert_eq!(arf.filename(), Path::new("test.arf"));

        let file = ResponseFile::from_json("bad.arf", r#"{"EBOUNDS": {}}"#).unwrap();
        assert!(matches!(
            EffectiveArea::from_response(&file),
            Err(Error::MissingExtension { .. })
        ));
    }
}
