//! Effective-area photon thinning.
//!
//! Converts an idealized photon sample into the subset an instrument with
//! the given effective area would record for a source of known flux.

use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use xrsim_core::constants::ERG_PER_KEV;
use xrsim_core::events::ENERGY;
use xrsim_core::{EffectiveArea, Error, EventList, Result};

/// Energy flux of a source over a reference band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceFlux {
    /// Energy flux in erg/s/cm².
    pub flux: f64,
    /// Lower edge of the band in keV.
    pub emin: f64,
    /// Upper edge of the band in keV.
    pub emax: f64,
}

impl SourceFlux {
    #[must_use]
    pub fn new(flux: f64, emin: f64, emax: f64) -> Self {
        Self { flux, emin, emax }
    }

    /// Band spanning the energies of a photon sample.
    #[must_use]
    pub fn spanning(flux: f64, energies: &[f64]) -> Self {
        let emin = energies.iter().copied().fold(f64::INFINITY, f64::min);
        let emax = energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self { flux, emin, emax }
    }

    fn contains(&self, energy: f64) -> bool {
        energy >= self.emin && energy <= self.emax
    }
}

/// Number of photons the observation should record.
///
/// The photon rate is the source flux divided by the summed photon energy
/// in the band, times the summed effective area of those photons.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn expected_photon_count(
    energies: &[f64],
    areas: &[f64],
    source: &SourceFlux,
    exposure_time: f64,
) -> usize {
    let (energy_sum, area_sum) = energies
        .iter()
        .zip(areas)
        .filter(|(e, _)| source.contains(**e))
        .fold((0.0, 0.0), |(es, as_), (e, a)| (es + e, as_ + a));
    if energy_sum <= 0.0 {
        warn!(
            "No photons fall in the reference band [{}, {}] keV",
            source.emin, source.emax
        );
        return 0;
    }
    let rate = source.flux / (energy_sum * ERG_PER_KEV) * area_sum;
    let n_ph = (rate * exposure_time).floor();
    if n_ph.is_finite() && n_ph > 0.0 {
        n_ph as usize
    } else {
        0
    }
}

/// Thins `events` down to the photons detected during `exposure_time`.
///
/// Each photon is accepted with probability `area / max_area`; the accepted
/// pool is shuffled and truncated to the expected count. Every field of the
/// event list is subset by the same indices. Returns the number of detected
/// events, which never exceeds the input count.
///
/// # Errors
/// Returns [`Error::InsufficientPhotons`] if the expected count exceeds the
/// sample size, and [`Error::MissingField`] if there is no energy field.
pub fn detect_events<R: Rng + ?Sized>(
    events: &mut EventList,
    arf: &EffectiveArea,
    exposure_time: f64,
    source: &SourceFlux,
    rng: &mut R,
) -> Result<usize> {
    let energy = events.float(ENERGY)?;
    let areas = arf.interpolate_areas(energy);
    let n_ph = expected_photon_count(energy, &areas, source, exposure_time);

    if n_ph > energy.len() {
        error!(
            "Number of events in sample: {}, Number of events wanted: {}",
            energy.len(),
            n_ph
        );
        return Err(Error::InsufficientPhotons {
            available: energy.len(),
            required: n_ph,
        });
    }

    let max_area = arf.max_area();
    let mut accepted: Vec<usize> = areas
        .iter()
        .enumerate()
        .filter_map(|(i, &a)| {
            let u: f64 = rng.gen();
            (max_area > 0.0 && u < a / max_area).then_some(i)
        })
        .collect();
    accepted.shuffle(rng);
    accepted.truncate(n_ph);

    info!("{} events detected.", accepted.len());
    events.take(&accepted);
    Ok(accepted.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use xrsim_core::events::{DEC, RA};

    fn photons(n: usize, energy: f64) -> EventList {
        EventList::from_sky(vec![30.0; n], vec![45.0; n], vec![energy; n]).unwrap()
    }

    #[test]
    fn test_expected_count() {
        let energies = [1.0, 2.0, 3.0, 20.0];
        let areas = [10.0, 10.0, 10.0, 10.0];
        let source = SourceFlux::new(6.0 * ERG_PER_KEV, 1.0, 3.0);
        // rate = 6 keV/s/cm² / 6 keV * 30 cm² = 30 /s
        assert_eq!(expected_photon_count(&energies, &areas, &source, 2.0), 60);
        assert_eq!(expected_photon_count(&energies, &areas, &source, 0.05), 1);
    }

    #[test]
    fn test_empty_band_yields_zero() {
        let source = SourceFlux::new(1.0, 50.0, 60.0);
        assert_eq!(expected_photon_count(&[1.0], &[10.0], &source, 1.0e6), 0);
    }

    #[test]
    fn test_detects_expected_number() {
        let arf = EffectiveArea::flat(0.5, 10.0, 100, 100.0).unwrap();
        let mut events = photons(10_000, 1.0);
        // about ten photons expected
        let source = SourceFlux::new(1000.0 * ERG_PER_KEV / 1.0e5, 0.5, 10.0);
        let mut rng = StdRng::seed_from_u64(42);
        let n = detect_events(&mut events, &arf, 10.0, &source, &mut rng).unwrap();
        assert!(n <= 10_000);
        assert_eq!(events.len(), n);
        assert_eq!(events.float(RA).unwrap().len(), n);
        assert_eq!(events.float(DEC).unwrap().len(), n);
    }

    #[test]
    fn test_oversubscription_fails() {
        let arf = EffectiveArea::flat(0.5, 10.0, 100, 100.0).unwrap();
        let mut events = photons(10, 1.0);
        let source = SourceFlux::new(1.0e-9, 0.5, 10.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = detect_events(&mut events, &arf, 1.0e5, &source, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientPhotons { available: 10, .. }
        ));
        assert_eq!(events.len(), 10);
    }

    #[test]
    fn test_zero_area_photons_never_detected() {
        let arf = EffectiveArea::flat(0.5, 10.0, 100, 100.0).unwrap();
        let mut events = EventList::from_sky(
            vec![0.0; 4],
            vec![0.0; 4],
            vec![1.0, 50.0, 2.0, 60.0],
        )
        .unwrap();
        // rate of 0.25 photons/s
        let source = SourceFlux::new(0.25 * 113.0 * ERG_PER_KEV / 200.0, 0.5, 100.0);
        let mut rng = StdRng::seed_from_u64(7);
        let n = detect_events(&mut events, &arf, 10.0, &source, &mut rng).unwrap();
        assert_eq!(n, 2);
        assert!(events.float(ENERGY).unwrap().iter().all(|&e| e < 10.0));
    }
}
