//! Redistribution matrices (RMFs).
//!
//! Each energy bin of the matrix carries a compact channel encoding: a list
//! of `(F_CHAN, N_CHAN)` groups, where `N_CHAN == 0` denotes a single
//! channel, and a weight per expanded channel. Weights need not sum to one.

use crate::arf::validate_energy_bins;
use crate::response::{Extension, OneOrMany, ResponseFile};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Extension names accepted for the matrix section, in lookup order.
pub const MATRIX_EXTENSIONS: [&str; 2] = ["MATRIX", "SPECRESP MATRIX"];

/// One energy bin of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub f_chan: Vec<i64>,
    pub n_chan: Vec<i64>,
    pub weights: Vec<f64>,
}

impl MatrixRow {
    /// Expands the channel groups into explicit channel numbers.
    #[must_use]
    pub fn channels(&self) -> Vec<i64> {
        let mut out = Vec::new();
        for (&start, &n) in self.f_chan.iter().zip(&self.n_chan) {
            if n == 0 {
                out.push(start);
            } else {
                out.extend(start..start + n);
            }
        }
        out
    }

    /// Sum of the weights in this bin.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// Redistribution matrix with its channel bounds and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RedistributionMatrix {
    filename: PathBuf,
    mat_key: String,
    elo: Vec<f64>,
    ehi: Vec<f64>,
    rows: Vec<MatrixRow>,
    channels: Vec<i64>,
    e_min: Vec<f64>,
    e_max: Vec<f64>,
    cmin: i64,
    cmax: i64,
    detchans: usize,
    chan_type: String,
    telescope: String,
    instrument: String,
    mission: String,
}

impl RedistributionMatrix {
    /// Reads a redistribution matrix file.
    ///
    /// # Errors
    /// Returns [`Error::MissingExtension`] if neither `MATRIX` nor
    /// `SPECRESP MATRIX` is present, or if `EBOUNDS` is missing, and
    /// [`Error::MalformedResponse`] for inconsistent contents.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = ResponseFile::open(path)?;
        Self::from_response(&file)
    }

    /// Builds the matrix from an already loaded response file.
    ///
    /// # Errors
    /// See [`RedistributionMatrix::from_file`].
    pub fn from_response(file: &ResponseFile) -> Result<Self> {
        let (mat_key, matrix) = file.first_extension(&MATRIX_EXTENSIONS)?;
        let ebounds = file.extension("EBOUNDS")?;

        let elo = matrix.float_column("ENERG_LO")?;
        let ehi = matrix.float_column("ENERG_HI")?;
        let f_chan = int_cells(matrix, "F_CHAN")?;
        let n_chan = int_cells(matrix, "N_CHAN")?;
        let weights: Vec<Vec<f64>> = matrix
            .column::<Vec<OneOrMany<Option<f64>>>>("MATRIX")?
            .into_iter()
            .map(|cell| cell.into_vec().into_iter().map(|w| w.unwrap_or(0.0)).collect())
            .collect();

        if f_chan.len() != elo.len() || n_chan.len() != elo.len() || weights.len() != elo.len()
        {
            return Err(Error::MalformedResponse(format!(
                "{mat_key} columns differ in length: {} energy bins, {} F_CHAN, {} N_CHAN, {} MATRIX",
                elo.len(),
                f_chan.len(),
                n_chan.len(),
                weights.len()
            )));
        }
        let rows = f_chan
            .into_iter()
            .zip(n_chan)
            .zip(weights)
            .map(|((f_chan, n_chan), weights)| MatrixRow {
                f_chan,
                n_chan,
                weights,
            })
            .collect();

        let channels: Vec<i64> = ebounds.column("CHANNEL")?;
        let e_min = ebounds.float_column("E_MIN")?;
        let e_max = ebounds.float_column("E_MAX")?;

        let chan_type = matrix
            .header
            .get_str("CHANTYPE")
            .or_else(|| ebounds.header.get_str("CHANTYPE"))
            .ok_or_else(|| {
                Error::MalformedResponse(format!("{mat_key} header has no CHANTYPE keyword"))
            })?
            .to_string();
        let keyword = |key: &str| {
            matrix
                .header
                .get_str(key)
                .or_else(|| ebounds.header.get_str(key))
                .unwrap_or_default()
                .to_string()
        };

        let (cmin, cmax) = match f_chan_limits(matrix) {
            Some(limits) => limits,
            None => channel_range(&channels)?,
        };
        let detchans = matrix
            .header
            .get_i64("DETCHANS")
            .or_else(|| ebounds.header.get_i64("DETCHANS"))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(channels.len());

        let rmf = Self {
            filename: file.path().to_path_buf(),
            mat_key: mat_key.to_string(),
            elo,
            ehi,
            rows,
            channels,
            e_min,
            e_max,
            cmin,
            cmax,
            detchans,
            chan_type,
            telescope: keyword("TELESCOP"),
            instrument: keyword("INSTRUME"),
            mission: keyword("MISSION"),
        };
        rmf.validate()?;
        Ok(rmf)
    }

    /// Builds a matrix from in-memory parts.
    ///
    /// `channels` lists the channel numbers of the `EBOUNDS` section in
    /// order, with their energy bounds in `e_min`/`e_max`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedResponse`] if the parts are inconsistent.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        chan_type: &str,
        elo: Vec<f64>,
        ehi: Vec<f64>,
        rows: Vec<MatrixRow>,
        channels: Vec<i64>,
        e_min: Vec<f64>,
        e_max: Vec<f64>,
    ) -> Result<Self> {
        let (cmin, cmax) = channel_range(&channels)?;
        let rmf = Self {
            filename: PathBuf::new(),
            mat_key: MATRIX_EXTENSIONS[0].to_string(),
            detchans: channels.len(),
            elo,
            ehi,
            rows,
            channels,
            e_min,
            e_max,
            cmin,
            cmax,
            chan_type: chan_type.to_string(),
            telescope: String::new(),
            instrument: String::new(),
            mission: String::new(),
        };
        rmf.validate()?;
        Ok(rmf)
    }

    /// Builds a perfect-resolution matrix: energy bin `i` maps to channel
    /// `i + 1` with certainty, and the channel bounds equal the bin edges.
    ///
    /// # Errors
    /// Returns an error if the energy bins are invalid.
    #[allow(clippy::cast_possible_wrap)]
    pub fn diagonal(chan_type: &str, elo: Vec<f64>, ehi: Vec<f64>) -> Result<Self> {
        let channels: Vec<i64> = (1..=elo.len() as i64).collect();
        let rows = channels
            .iter()
            .map(|&c| MatrixRow {
                f_chan: vec![c],
                n_chan: vec![1],
                weights: vec![1.0],
            })
            .collect();
        let e_min = elo.clone();
        let e_max = ehi.clone();
        Self::from_parts(chan_type, elo, ehi, rows, channels, e_min, e_max)
    }

    fn validate(&self) -> Result<()> {
        if self.elo.is_empty() {
            return Err(Error::MalformedResponse(format!(
                "{} has no energy bins",
                self.mat_key
            )));
        }
        if self.elo.len() != self.ehi.len() || self.rows.len() != self.elo.len() {
            return Err(Error::MalformedResponse(format!(
                "{} has {} lower edges, {} upper edges and {} rows",
                self.mat_key,
                self.elo.len(),
                self.ehi.len(),
                self.rows.len()
            )));
        }
        validate_energy_bins(&self.elo, &self.ehi)?;
        if self.e_min.len() != self.channels.len() || self.e_max.len() != self.channels.len() {
            return Err(Error::MalformedResponse(
                "EBOUNDS columns differ in length".to_string(),
            ));
        }
        if self.cmin > self.cmax {
            return Err(Error::MalformedResponse(format!(
                "channel bounds are inverted: [{}, {}]",
                self.cmin, self.cmax
            )));
        }

        for (k, row) in self.rows.iter().enumerate() {
            if row.f_chan.len() != row.n_chan.len() {
                return Err(Error::MalformedResponse(format!(
                    "energy bin {k}: {} F_CHAN entries but {} N_CHAN entries",
                    row.f_chan.len(),
                    row.n_chan.len()
                )));
            }
            for (&start, &n) in row.f_chan.iter().zip(&row.n_chan) {
                let end = start + (n - 1).max(0);
                if n < 0 || start < self.cmin || end > self.cmax {
                    return Err(Error::MalformedResponse(format!(
                        "energy bin {k}: channel group ({start}, {n}) lies outside [{}, {}]",
                        self.cmin, self.cmax
                    )));
                }
            }
            if let Some(w) = row.weights.iter().find(|w| !(**w >= 0.0)) {
                return Err(Error::MalformedResponse(format!(
                    "energy bin {k}: negative weight {w}"
                )));
            }
            let n_channels = row.channels().len();
            if row.weights[n_channels.min(row.weights.len())..]
                .iter()
                .any(|&w| w > 0.0)
            {
                return Err(Error::MalformedResponse(format!(
                    "energy bin {k}: {} weights but only {n_channels} channels",
                    row.weights.len()
                )));
            }
        }
        Ok(())
    }

    /// File the matrix was read from (empty if built in memory).
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Name of the matrix extension that was read.
    #[must_use]
    pub fn matrix_extension(&self) -> &str {
        &self.mat_key
    }

    /// Lower energy edges of the matrix bins (keV).
    #[must_use]
    pub fn elo(&self) -> &[f64] {
        &self.elo
    }

    /// Upper energy edges of the matrix bins (keV).
    #[must_use]
    pub fn ehi(&self) -> &[f64] {
        &self.ehi
    }

    /// Matrix rows, one per energy bin.
    #[must_use]
    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    /// Number of energy bins.
    #[must_use]
    pub fn n_de(&self) -> usize {
        self.elo.len()
    }

    /// Number of channels listed in `EBOUNDS`.
    #[must_use]
    pub fn n_ch(&self) -> usize {
        self.channels.len()
    }

    /// `DETCHANS` keyword, or the `EBOUNDS` channel count when absent.
    #[must_use]
    pub fn detchans(&self) -> usize {
        self.detchans
    }

    /// Channel numbers of the `EBOUNDS` section.
    #[must_use]
    pub fn channels(&self) -> &[i64] {
        &self.channels
    }

    /// Energy bounds `(E_MIN, E_MAX)` of a channel.
    #[must_use]
    pub fn channel_energy(&self, channel: i64) -> Option<(f64, f64)> {
        self.channels
            .iter()
            .position(|&c| c == channel)
            .map(|i| (self.e_min[i], self.e_max[i]))
    }

    /// Minimum channel number.
    #[must_use]
    pub fn cmin(&self) -> i64 {
        self.cmin
    }

    /// Maximum channel number.
    #[must_use]
    pub fn cmax(&self) -> i64 {
        self.cmax
    }

    /// Channel type (`PI`, `PHA`, ...), used as the channel field name.
    #[must_use]
    pub fn chan_type(&self) -> &str {
        &self.chan_type
    }

    #[must_use]
    pub fn telescope(&self) -> &str {
        &self.telescope
    }

    #[must_use]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    #[must_use]
    pub fn mission(&self) -> &str {
        &self.mission
    }
}

/// Reads an integer cell column, treating nulls as zero.
fn int_cells(ext: &Extension, name: &str) -> Result<Vec<Vec<i64>>> {
    Ok(ext
        .column::<Vec<OneOrMany<Option<i64>>>>(name)?
        .into_iter()
        .map(|cell| cell.into_vec().into_iter().map(Option::unwrap_or_default).collect())
        .collect())
}

/// `TLMINn`/`TLMAXn` of the `F_CHAN` column, located through `TTYPEn`.
fn f_chan_limits(matrix: &Extension) -> Option<(i64, i64)> {
    let num = (1..)
        .map_while(|i| matrix.header.get_str(&format!("TTYPE{i}")).map(|t| (i, t)))
        .find(|(_, ttype)| *ttype == "F_CHAN")
        .map(|(i, _)| i)?;
    let cmin = matrix.header.get_i64(&format!("TLMIN{num}"))?;
    let cmax = matrix.header.get_i64(&format!("TLMAX{num}"))?;
    Some((cmin, cmax))
}

fn channel_range(channels: &[i64]) -> Result<(i64, i64)> {
    let cmin = channels.iter().copied().min();
    let cmax = channels.iter().copied().max();
    cmin.zip(cmax)
        .ok_or_else(|| Error::MalformedResponse("EBOUNDS lists no channels".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMF_JSON: &str = r#"{
        "SPECRESP MATRIX": {
            "header": {
                "CHANTYPE": "PI", "TELESCOP": "XRS", "INSTRUME": "HDXI",
                "DETCHANS": 4,
                "TTYPE1": "ENERG_LO", "TTYPE2": "ENERG_HI", "TTYPE3": "N_GRP",
                "TTYPE4": "F_CHAN", "TTYPE5": "N_CHAN", "TTYPE6": "MATRIX",
                "TLMIN4": 1, "TLMAX4": 4
            },
            "data": {
                "ENERG_LO": [0.1, 0.2, 0.3],
                "ENERG_HI": [0.2, 0.3, 0.4],
                "F_CHAN": [1, [1, 3], 4],
                "N_CHAN": [2, [1, 2], 0],
                "MATRIX": [[0.3, 0.1], [0.2, 0.2, null], [1.0]]
            }
        },
        "EBOUNDS": {
            "header": {"CHANTYPE": "PI"},
            "data": {
                "CHANNEL": [1, 2, 3, 4],
                "E_MIN": [0.1, 0.2, 0.3, 0.4],
                "E_MAX": [0.2, 0.3, 0.4, 0.5]
            }
        }
    }"#;

    #[test]
    fn test_read_matrix() {
        let file = ResponseFile::from_json("test.rmf", RMF_JSON).unwrap();
        let rmf = RedistributionMatrix::from_response(&file).unwrap();
        assert_eq!(rmf.matrix_extension(), "SPECRESP MATRIX");
        assert_eq!(rmf.n_de(), 3);
        assert_eq!(rmf.n_ch(), 4);
        assert_eq!(rmf.detchans(), 4);
        assert_eq!((rmf.cmin(), rmf.cmax()), (1, 4));
        assert_eq!(rmf.chan_type(), "PI");
        assert_eq!(rmf.telescope(), "XRS");
        assert_eq!(rmf.mission(), "");
        assert_eq!(rmf.rows()[1].weights, vec![0.2, 0.2, 0.0]);
        assert_eq!(rmf.channel_energy(3), Some((0.3, 0.4)));
    }

    #[test]
    fn test_channel_expansion() {
        let file = ResponseFile::from_json("test.rmf", RMF_JSON).unwrap();
        let rmf = RedistributionMatrix::from_response(&file).unwrap();
        assert_eq!(rmf.rows()[0].channels(), vec![1, 2]);
        assert_eq!(rmf.rows()[1].channels(), vec![1, 3, 4]);
        // zero-length run is a single channel
        assert_eq!(rmf.rows()[2].channels(), vec![4]);
    }

    #[test]
    fn test_missing_matrix_extension() {
        let json = r#"{"EBOUNDS": {"data": {"CHANNEL": [1], "E_MIN": [0.1], "E_MAX": [0.2]}}}"#;
        let file = ResponseFile::from_json("test.rmf", json).unwrap();
        let err = RedistributionMatrix::from_response(&file).unwrap_err();
        assert!(matches!(err, Error::MissingExtension { .. }));
        assert!(err.to_string().contains("SPECRESP MATRIX"));
    }

    #[test]
    fn test_limits_fall_back_to_ebounds() {
        let json = RMF_JSON.replace("\"TLMIN4\": 1, \"TLMAX4\": 4", "\"EXTRA\": 0");
        let file = ResponseFile::from_json("test.rmf", &json).unwrap();
        let rmf = RedistributionMatrix::from_response(&file).unwrap();
        assert_eq!((rmf.cmin(), rmf.cmax()), (1, 4));
    }

    #[test]
    fn test_group_outside_bounds_rejected() {
        let json = RMF_JSON.replace("\"TLMAX4\": 4", "\"TLMAX4\": 3");
        let file = ResponseFile::from_json("test.rmf", &json).unwrap();
        assert!(matches!(
            RedistributionMatrix::from_response(&file),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_missing_chantype_rejected() {
        let json = RMF_JSON.replace("\"CHANTYPE\": \"PI\"", "\"CHANX\": \"PI\"");
        let file = ResponseFile::from_json("test.rmf", &json).unwrap();
        assert!(RedistributionMatrix::from_response(&file).is_err());
    }

    #[test]
    fn test_diagonal() {
        let rmf = RedistributionMatrix::diagonal("PHA", vec![1.0, 2.0], vec![2.0, 3.0]).unwrap();
        assert_eq!((rmf.cmin(), rmf.cmax()), (1, 2));
        assert_eq!(rmf.rows()[1].channels(), vec![2]);
        assert_eq!(rmf.chan_type(), "PHA");
    }
}
