//! Derived products: counts spectra, images and radial profiles.

use crate::geometry::TanProjection;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use xrsim_core::constants::ARCSEC_PER_DEG;
use xrsim_core::events::{ENERGY, XPIX, YPIX};
use xrsim_core::{Error, EventList, EventParameters, Result, SkyPosition};

/// Counts per detector channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub channel_type: String,
    pub channels: Vec<i64>,
    pub counts: Vec<u64>,
    pub exposure_time: f64,
}

impl Spectrum {
    /// Bins the channel field of `events` over `[cmin, cmax]`.
    ///
    /// # Errors
    /// Returns [`Error::MissingField`] if the events have no channel field.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_events(events: &EventList, params: &EventParameters) -> Result<Self> {
        let [cmin, cmax] = params.chan_lim;
        let channels: Vec<i64> = (cmin..=cmax).collect();
        let mut counts = vec![0_u64; channels.len()];
        for &ch in events.int(&params.channel_type)? {
            if (cmin..=cmax).contains(&ch) {
                counts[(ch - cmin) as usize] += 1;
            }
        }
        Ok(Self {
            channel_type: params.channel_type.clone(),
            channels,
            counts,
            exposure_time: params.exposure_time,
        })
    }

    #[must_use]
    pub fn total_counts(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Count rate per channel in counts/s.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rates(&self) -> Vec<f64> {
        self.counts
            .iter()
            .map(|&c| c as f64 / self.exposure_time)
            .collect()
    }
}

/// Energy window in keV; either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyFilter {
    pub emin: Option<f64>,
    pub emax: Option<f64>,
}

impl EnergyFilter {
    #[must_use]
    pub fn new(emin: Option<f64>, emax: Option<f64>) -> Self {
        Self { emin, emax }
    }

    fn mask(&self, events: &EventList) -> Result<Vec<bool>> {
        if self.emin.is_none() && self.emax.is_none() {
            return Ok(vec![true; events.len()]);
        }
        let lo = self.emin.unwrap_or(f64::NEG_INFINITY);
        let hi = self.emax.unwrap_or(f64::INFINITY);
        Ok(events
            .float(ENERGY)?
            .iter()
            .map(|&e| e > lo && e < hi)
            .collect())
    }
}

/// Bins sky pixel positions into a `num_pixels / reblock` square image.
///
/// Pixel `(row, col)` covers `ypix` and `xpix` in
/// `[0.5 + k * reblock, 0.5 + (k + 1) * reblock)`.
///
/// # Errors
/// Returns [`Error::ConfigError`] for a zero rebin factor and
/// [`Error::MissingField`] if positions or energies are missing.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn make_image(
    events: &EventList,
    params: &EventParameters,
    filter: EnergyFilter,
    reblock: usize,
) -> Result<Array2<f64>> {
    if reblock == 0 {
        return Err(Error::ConfigError("rebin factor must be positive".to_string()));
    }
    let nx = params.num_pixels / reblock;
    let mut image = Array2::<f64>::zeros((nx, nx));
    let mask = filter.mask(events)?;
    let scale = reblock as f64;
    for ((&x, &y), keep) in events.float(XPIX)?.iter().zip(events.float(YPIX)?).zip(mask) {
        if !keep {
            continue;
        }
        let col = ((x - 0.5) / scale).floor();
        let row = ((y - 0.5) / scale).floor();
        if col < 0.0 || row < 0.0 {
            continue;
        }
        let (col, row) = (col as usize, row as usize);
        if col < nx && row < nx {
            image[[row, col]] += 1.0;
        }
    }
    Ok(image)
}

/// Surface-brightness profile in annuli around a sky position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialProfile {
    /// Annulus edges in arcseconds.
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
    /// Annulus areas in arcsec².
    pub areas: Vec<f64>,
    /// counts/s/arcsec².
    pub surface_brightness: Vec<f64>,
    pub errors: Vec<f64>,
}

impl RadialProfile {
    /// Counts events in `nbins` equal annuli from `rmin` to `rmax`
    /// arcseconds around `center`.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] for an empty radius range and
    /// [`Error::MissingField`] if positions or energies are missing.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn from_events(
        events: &EventList,
        params: &EventParameters,
        center: SkyPosition,
        (rmin, rmax): (f64, f64),
        nbins: usize,
        filter: EnergyFilter,
    ) -> Result<Self> {
        if nbins == 0 || rmin < 0.0 || rmax <= rmin || rmax.is_nan() {
            return Err(Error::ConfigError(format!(
                "invalid radial bins: {nbins} from {rmin} to {rmax}"
            )));
        }
        let projection =
            TanProjection::new(params.sky_center, params.pix_center, params.plate_scale);
        let (x0, y0) = projection.world_to_pixel(center.ra, center.dec);
        let arcsec_per_pixel = params.plate_scale * ARCSEC_PER_DEG;
        let dr = (rmax - rmin) / nbins as f64;
        let edges: Vec<f64> = (0..=nbins).map(|i| rmin + dr * i as f64).collect();

        let mask = filter.mask(events)?;
        let mut counts = vec![0_u64; nbins];
        for ((&x, &y), keep) in events.float(XPIX)?.iter().zip(events.float(YPIX)?).zip(mask) {
            if !keep {
                continue;
            }
            let r = (x - x0).hypot(y - y0) * arcsec_per_pixel;
            if r < rmin || r >= rmax {
                continue;
            }
            let k = (((r - rmin) / dr) as usize).min(nbins - 1);
            counts[k] += 1;
        }

        let areas: Vec<f64> = edges
            .windows(2)
            .map(|w| std::f64::consts::PI * (w[1] * w[1] - w[0] * w[0]))
            .collect();
        let exposure = params.exposure_time;
        let surface_brightness = counts
            .iter()
            .zip(&areas)
            .map(|(&c, &a)| c as f64 / a / exposure)
            .collect();
        let errors = counts
            .iter()
            .zip(&areas)
            .map(|(&c, &a)| (c as f64).sqrt() / a / exposure)
            .collect();
        Ok(Self {
            edges,
            counts,
            areas,
            surface_brightness,
            errors,
        })
    }

    /// Annulus midpoints in arcseconds.
    #[must_use]
    pub fn radii(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }
}
