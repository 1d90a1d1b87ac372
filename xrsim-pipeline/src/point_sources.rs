//! Point-source background photons.
//!
//! Turns a list of sampled source fluxes (AGN and galaxies, measured in the
//! 0.5-2 keV band) into a sky photon list: sources are scattered uniformly
//! over the field of view, each gets a power-law spectrum, and photon
//! counts are Poisson draws for a large collecting area.

use crate::background::poisson_count;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;
use xrsim_core::constants::{ARCMIN_PER_DEG, ERG_PER_KEV, KEV_PER_ERG};
use xrsim_core::{EventList, Result, SkyPosition};

/// Photon index of galaxies.
pub const GALAXY_INDEX: f64 = 2.0;

/// Photon index of an AGN with 0.5-2 keV flux `flux` (erg/s/cm²).
///
/// Fainter sources have harder spectra: the index runs from 1.3 to 2.3
/// around 1e-14 erg/s/cm².
#[must_use]
pub fn agn_index(flux: f64) -> f64 {
    0.5 * erf((flux.log10() + 14.0) / 0.5) + 1.8
}

/// Ratio of photon flux over `spec_band` to energy flux (in keV) over
/// `flux_band` for a power law with photon index `index`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn flux_scale(index: f64, flux_band: (f64, f64), spec_band: (f64, f64)) -> f64 {
    let (fb_emin, fb_emax) = flux_band;
    let (spec_emin, spec_emax) = spec_band;
    let f_g = if index == 1.0 {
        (spec_emax / spec_emin).ln()
    } else {
        (spec_emax.powf(1.0 - index) - spec_emin.powf(1.0 - index)) / (1.0 - index)
    };
    let f_e = if index == 2.0 {
        (fb_emax / fb_emin).ln()
    } else {
        (fb_emax.powf(2.0 - index) - fb_emin.powf(2.0 - index)) / (2.0 - index)
    };
    f_g / f_e
}

/// Properties of one simulated background source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Right ascension in degrees.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    /// Flux in the reference band, erg/s/cm².
    pub flux: f64,
}

/// Settings for point-source photon generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSourceConfig {
    pub exposure_time: f64,
    /// Field of view in arcminutes.
    pub fov: f64,
    pub sky_center: SkyPosition,
    /// Collecting area in cm²; large enough to oversample any ARF.
    pub area: f64,
    /// Band of the input fluxes, keV.
    pub flux_band: (f64, f64),
    /// Band of the generated spectra, keV.
    pub spec_band: (f64, f64),
}

impl PointSourceConfig {
    #[must_use]
    pub fn new(exposure_time: f64, fov: f64, sky_center: SkyPosition) -> Self {
        Self {
            exposure_time,
            fov,
            sky_center,
            area: 40_000.0,
            flux_band: (0.5, 2.0),
            spec_band: (0.1, 10.0),
        }
    }

    #[must_use]
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = area;
        self
    }
}

/// Output of [`make_point_sources`].
#[derive(Debug, Clone)]
pub struct PointSourcePhotons {
    /// Sky photon list with `ra`, `dec` and `energy`.
    pub events: EventList,
    /// Energy flux carried by the photons, erg/s/cm², over the energy range
    /// of the photons.
    pub flux: f64,
    /// One record per source.
    pub sources: Vec<SourceRecord>,
}

/// Generates photons for sources with the given AGN and galaxy fluxes.
///
/// `transmission`, when given, returns the fraction of photons of a given
/// energy that survive foreground absorption; photons are thinned by it.
///
/// # Errors
/// Returns an error if the photon columns cannot be assembled.
#[allow(clippy::float_cmp)]
pub fn make_point_sources<R: Rng + ?Sized>(
    agn_fluxes: &[f64],
    gal_fluxes: &[f64],
    config: &PointSourceConfig,
    transmission: Option<&dyn Fn(f64) -> f64>,
    rng: &mut R,
) -> Result<PointSourcePhotons> {
    let fluxes: Vec<f64> = agn_fluxes.iter().chain(gal_fluxes).copied().collect();
    let indices: Vec<f64> = agn_fluxes
        .iter()
        .map(|&f| agn_index(f))
        .chain(gal_fluxes.iter().map(|_| GALAXY_INDEX))
        .collect();
    let num_sources = fluxes.len();
    debug!("Generating spectra from {num_sources} sources.");
    debug!(
        "Flux of {} erg/cm^2/s gives roughly one photon during exposure.",
        ERG_PER_KEV / (config.exposure_time * config.area)
    );

    let center = config.sky_center;
    let fov_deg = config.fov / ARCMIN_PER_DEG;
    let dec_scale = center.dec.to_radians().cos().abs();
    let ra_min = center.ra - 0.5 * fov_deg / dec_scale;
    let dec_min = center.dec - 0.5 * fov_deg;
    let ra0: Vec<f64> = (0..num_sources)
        .map(|_| rng.gen::<f64>() * fov_deg / dec_scale + ra_min)
        .collect();
    let dec0: Vec<f64> = (0..num_sources)
        .map(|_| rng.gen::<f64>() * fov_deg + dec_min)
        .collect();

    let sources = ra0
        .iter()
        .zip(&dec0)
        .zip(&fluxes)
        .map(|((&ra, &dec), &flux)| SourceRecord { ra, dec, flux })
        .collect();

    let (spec_emin, spec_emax) = config.spec_band;
    let eratio = spec_emax / spec_emin;
    let mut ra = Vec::new();
    let mut dec = Vec::new();
    let mut energy = Vec::new();
    for (((&ind, &src_flux), &src_ra), &src_dec) in indices.iter().zip(&fluxes).zip(&ra0).zip(&dec0)
    {
        let ph_flux = src_flux * flux_scale(ind, config.flux_band, config.spec_band) * KEV_PER_ERG;
        let nph = poisson_count(ph_flux * config.exposure_time * config.area, rng);
        if nph == 0 {
            continue;
        }
        let oma = 1.0 - ind;
        let fac1 = spec_emin.powf(oma);
        let fac2 = spec_emax.powf(oma) - fac1;
        energy.extend((0..nph).map(|_| {
            let u: f64 = rng.gen();
            if ind == 1.0 {
                spec_emin * eratio.powf(u)
            } else {
                (fac1 + u * fac2).powf(1.0 / oma)
            }
        }));
        ra.extend(std::iter::repeat(src_ra).take(nph));
        dec.extend(std::iter::repeat(src_dec).take(nph));
    }

    let mut events = EventList::from_sky(ra, dec, energy)?;
    if let Some(transmission) = transmission {
        let keep: Vec<bool> = events
            .float(xrsim_core::events::ENERGY)?
            .iter()
            .map(|&e| rng.gen::<f64>() < transmission(e))
            .collect();
        events.retain_mask(&keep)?;
        debug!(
            "{} photons remain after foreground galactic absorption.",
            events.len()
        );
    }

    let total_energy: f64 = events.float(xrsim_core::events::ENERGY)?.iter().sum();
    let flux = total_energy * ERG_PER_KEV / (config.exposure_time * config.area);
    if events.is_empty() {
        warn!("No point-source background photons were generated.");
    }

    Ok(PointSourcePhotons {
        events,
        flux,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use xrsim_core::events::{DEC, ENERGY, RA};

    #[test]
    fn test_agn_index() {
        assert_relative_eq!(agn_index(1.0e-14), 1.8, epsilon = 1e-12);
        assert!(agn_index(1.0e-12) > 2.29);
        assert!(agn_index(1.0e-16) < 1.31);
    }

    #[test]
    fn test_flux_scale_special_indices() {
        // index 2: photon flux integral is 1/0.1 - 1/10, energy integral ln 4
        assert_relative_eq!(
            flux_scale(2.0, (0.5, 2.0), (0.1, 10.0)),
            9.9 / 4.0_f64.ln(),
            max_relative = 1e-12
        );
        // index 1: ln(100) over (2 - 0.5)
        assert_relative_eq!(
            flux_scale(1.0, (0.5, 2.0), (0.1, 10.0)),
            100.0_f64.ln() / 1.5,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_sources_inside_fov() {
        let config = PointSourceConfig::new(1.0e4, 20.0, SkyPosition::new(30.0, 45.0));
        let mut rng = StdRng::seed_from_u64(21);
        let out =
            make_point_sources(&[1.0e-13, 5.0e-15], &[2.0e-15], &config, None, &mut rng).unwrap();
        assert_eq!(out.sources.len(), 3);
        let half_dec = 10.0 / 60.0;
        let half_ra = half_dec / 45.0_f64.to_radians().cos();
        for s in &out.sources {
            assert!((s.dec - 45.0).abs() <= half_dec);
            assert!((s.ra - 30.0).abs() <= half_ra);
        }
        assert!(!out.events.is_empty());
        let e = out.events.float(ENERGY).unwrap();
        assert!(e.iter().all(|&x| (0.1..=10.0).contains(&x)));
        assert_eq!(out.events.float(RA).unwrap().len(), e.len());
        assert_eq!(out.events.float(DEC).unwrap().len(), e.len());
        assert!(out.flux > 0.0);
    }

    #[test]
    fn test_absorption_thins_photons() {
        let config = PointSourceConfig::new(1.0e4, 20.0, SkyPosition::new(30.0, 45.0));
        let fluxes = [1.0e-13; 5];
        let mut rng = StdRng::seed_from_u64(4);
        let open = make_point_sources(&fluxes, &[], &config, None, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let opaque = |_: f64| 0.0;
        let blocked = make_point_sources(&fluxes, &[], &config, Some(&opaque), &mut rng).unwrap();
        assert!(!open.events.is_empty());
        assert!(blocked.events.is_empty());
        assert_relative_eq!(blocked.flux, 0.0);
        assert_eq!(blocked.sources, open.sources);
    }
}
