//! Physical and unit-conversion constants.

/// Energy of a 1 keV photon in erg.
pub const ERG_PER_KEV: f64 = 1.602_176_62e-9;

/// Photons per erg at 1 keV.
pub const KEV_PER_ERG: f64 = 1.0 / ERG_PER_KEV;

/// Ratio between the full width at half maximum and the sigma of a Gaussian.
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045_030_949_3;

/// Arcseconds per degree.
pub const ARCSEC_PER_DEG: f64 = 3600.0;

/// Arcminutes per degree.
pub const ARCMIN_PER_DEG: f64 = 60.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigma_to_fwhm() {
        let expected = 2.0 * (2.0 * 2.0_f64.ln()).sqrt();
        assert!((SIGMA_TO_FWHM - expected).abs() < 1e-12);
    }
}
