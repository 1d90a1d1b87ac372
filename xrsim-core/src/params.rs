//! Per-run event parameters.

use crate::arf::EffectiveArea;
use crate::instrument::InstrumentSpec;
use crate::rmf::RedistributionMatrix;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A sky position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    #[must_use]
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }
}

impl From<[f64; 2]> for SkyPosition {
    fn from([ra, dec]: [f64; 2]) -> Self {
        Self { ra, dec }
    }
}

/// Parameters describing one simulated observation.
///
/// Created once per run and written alongside the event list so that
/// downstream tools can rebuild the WCS and channel layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParameters {
    /// Exposure time in seconds.
    pub exposure_time: f64,
    pub arf: PathBuf,
    pub rmf: PathBuf,
    pub sky_center: SkyPosition,
    /// Reference pixel of the sky WCS (1-based).
    pub pix_center: [f64; 2],
    pub num_pixels: usize,
    /// Plate scale in degrees per pixel.
    pub plate_scale: f64,
    pub channel_type: String,
    pub telescope: String,
    pub instrument: String,
    pub mission: String,
    /// Number of detector channels.
    pub nchan: usize,
    /// Roll angle in degrees.
    pub roll_angle: f64,
    /// Field of view in arcminutes.
    pub fov: f64,
    /// Channel bounds `[cmin, cmax]`.
    pub chan_lim: [i64; 2],
}

impl EventParameters {
    /// Collects the parameters of a run.
    #[must_use]
    pub fn new(
        spec: &InstrumentSpec,
        arf: &EffectiveArea,
        rmf: &RedistributionMatrix,
        exposure_time: f64,
        sky_center: SkyPosition,
        roll_angle: f64,
    ) -> Self {
        let center = spec.pix_center();
        Self {
            exposure_time,
            arf: arf.filename().to_path_buf(),
            rmf: rmf.filename().to_path_buf(),
            sky_center,
            pix_center: [center, center],
            num_pixels: spec.num_pixels,
            plate_scale: spec.plate_scale_deg(),
            channel_type: rmf.chan_type().to_string(),
            telescope: rmf.telescope().to_string(),
            instrument: rmf.instrument().to_string(),
            mission: rmf.mission().to_string(),
            nchan: rmf.detchans(),
            roll_angle,
            fov: spec.fov,
            chan_lim: [rmf.cmin(), rmf.cmax()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec() -> InstrumentSpec {
        InstrumentSpec {
            name: "test".to_string(),
            arf: PathBuf::from("a.arf"),
            rmf: PathBuf::from("a.rmf"),
            bkgnd: None,
            fov: 20.0,
            num_pixels: 1200,
            focal_length: 10.0,
            dither: true,
            psf: None,
            aimpt_coords: [0.0, 0.0],
        }
    }

    #[test]
    fn test_parameters_from_responses() {
        let arf = EffectiveArea::flat(0.1, 10.0, 10, 100.0).unwrap();
        let rmf =
            RedistributionMatrix::diagonal("PI", arf.elo().to_vec(), arf.ehi().to_vec()).unwrap();
        let params =
            EventParameters::new(&spec(), &arf, &rmf, 1.0e4, SkyPosition::new(30.0, 45.0), 10.0);

        assert_relative_eq!(params.pix_center[0], 600.5);
        assert_relative_eq!(params.plate_scale, 20.0 / 1200.0 / 60.0);
        assert_eq!(params.chan_lim, [1, 10]);
        assert_eq!(params.nchan, 10);
        assert_eq!(params.channel_type, "PI");
    }

    #[test]
    fn test_json_round_trip() {
        let arf = EffectiveArea::flat(0.1, 10.0, 10, 100.0).unwrap();
        let rmf =
            RedistributionMatrix::diagonal("PHA", arf.elo().to_vec(), arf.ehi().to_vec()).unwrap();
        let params = EventParameters::new(&spec(), &arf, &rmf, 5.0e3, [1.0, -2.0].into(), 0.0);
        let json = serde_json::to_string(&params).unwrap();
        let back: EventParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
