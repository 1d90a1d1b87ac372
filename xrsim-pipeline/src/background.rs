//! Background event generation and composition.
//!
//! Each background draws its own event count from its rate model, places
//! events on the detector, assigns channels with the observation's
//! redistribution matrix and stamps times. The resulting lists have the same
//! fields as detected source events and are appended to them.

use crate::geometry::chip_to_detector;
use crate::redistribution::scatter_energies;
use log::{debug, info, warn};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Poisson};
use std::fs;
use std::path::Path;
use xrsim_core::events::{CHIPX, CHIPY, DETX, DETY, ENERGY, TIME, XPIX, YPIX};
use xrsim_core::{
    BackgroundSpec, EffectiveArea, Error, EventList, EventParameters, InstrumentRegistry,
    RedistributionMatrix, Result,
};

/// A tabulated background spectrum.
///
/// Intensities are in photons/s/cm²/arcmin²/keV on an energy grid given by
/// bin midpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSpectrum {
    ebins: Vec<f64>,
    intensity: Vec<f64>,
    /// Cumulative, normalized spectrum on `ebins`.
    cumspec: Vec<f64>,
    /// Integrated intensity in photons/s/cm²/arcmin².
    total: f64,
}

impl BackgroundSpectrum {
    /// Builds a spectrum from bin midpoints and intensities.
    ///
    /// Bin edges lie halfway between midpoints; the outer edges extend half
    /// a bin beyond the first and last midpoints.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if fewer than two points are given,
    /// the energies are not strictly ascending, or an intensity is negative.
    pub fn new(energy: Vec<f64>, intensity: Vec<f64>) -> Result<Self> {
        if energy.len() < 2 || energy.len() != intensity.len() {
            return Err(Error::ConfigError(format!(
                "background spectrum needs at least two matching points, got {} energies and {} intensities",
                energy.len(),
                intensity.len()
            )));
        }
        if energy.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::ConfigError(
                "background spectrum energies must be strictly ascending".to_string(),
            ));
        }
        if let Some(v) = intensity.iter().find(|v| !(**v >= 0.0)) {
            return Err(Error::ConfigError(format!(
                "background intensity must be non-negative, got {v}"
            )));
        }

        let n = energy.len();
        let mut ebins = Vec::with_capacity(n + 1);
        ebins.push(energy[0] - 0.5 * (energy[1] - energy[0]));
        ebins.extend(energy.windows(2).map(|w| 0.5 * (w[0] + w[1])));
        ebins.push(energy[n - 1] + 0.5 * (energy[n - 1] - energy[n - 2]));

        let mut cumspec = Vec::with_capacity(n + 1);
        let mut total = 0.0;
        cumspec.push(0.0);
        for (i, v) in intensity.iter().enumerate() {
            total += v * (ebins[i + 1] - ebins[i]);
            cumspec.push(total);
        }
        if total > 0.0 {
            for c in &mut cumspec {
                *c /= total;
            }
        }

        Ok(Self {
            ebins,
            intensity,
            cumspec,
            total,
        })
    }

    /// Reads a two-column text file of energy (keV) and intensity.
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut energy = Vec::new();
        let mut intensity = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace().map(str::parse::<f64>);
            match (fields.next(), fields.next()) {
                (Some(Ok(e)), Some(Ok(i))) => {
                    energy.push(e);
                    intensity.push(i);
                }
                _ => {
                    return Err(Error::ConfigError(format!(
                        "{}:{}: expected two numeric columns",
                        path.display(),
                        lineno + 1
                    )))
                }
            }
        }
        Self::new(energy, intensity)
    }

    /// Bin edges in keV.
    #[must_use]
    pub fn ebins(&self) -> &[f64] {
        &self.ebins
    }

    #[must_use]
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Expected photon rate (photons/s) for a collecting area in cm² and a
    /// square field of view `fov` arcminutes on a side.
    #[must_use]
    pub fn rate(&self, area: f64, fov: f64) -> f64 {
        self.total * area * fov * fov
    }

    /// Draws a Poisson number of photon energies for an exposure.
    ///
    /// Energies are returned in ascending order.
    pub fn generate_energies<R: Rng + ?Sized>(
        &self,
        exposure_time: f64,
        area: f64,
        fov: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let n_ph = poisson_count(self.rate(area, fov) * exposure_time, rng);
        let mut u: Vec<f64> = (0..n_ph).map(|_| rng.gen::<f64>()).collect();
        u.sort_by(f64::total_cmp);
        u.into_iter().map(|u| self.inverse_cdf(u)).collect()
    }

    fn inverse_cdf(&self, u: f64) -> f64 {
        let i = self
            .cumspec
            .partition_point(|&c| c <= u)
            .clamp(1, self.cumspec.len() - 1);
        let (c0, c1) = (self.cumspec[i - 1], self.cumspec[i]);
        let (e0, e1) = (self.ebins[i - 1], self.ebins[i]);
        if c1 > c0 {
            e0 + (e1 - e0) * (u - c0) / (c1 - c0)
        } else {
            e0
        }
    }
}

/// Draws a Poisson variate; non-positive or non-finite means give zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn poisson_count<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> usize {
    if !(mean > 0.0 && mean.is_finite()) {
        return 0;
    }
    match Poisson::new(mean) {
        Ok(dist) => {
            let n: f64 = dist.sample(rng);
            n as usize
        }
        Err(_) => 0,
    }
}

/// Uniform event times in `[0, exposure_time)`.
pub fn assign_times<R: Rng + ?Sized>(
    events: &mut EventList,
    exposure_time: f64,
    rng: &mut R,
) -> Result<()> {
    let times = (0..events.len())
        .map(|_| rng.gen::<f64>() * exposure_time)
        .collect();
    events.insert_float(TIME, times)
}

/// Places events uniformly over the chip and fills the detector fields.
///
/// Chip coordinates are uniform integers in `[1, num_pixels]`; detector
/// coordinates get a sub-pixel jitter, and sky pixels equal detector
/// coordinates shifted to the array center.
#[allow(clippy::cast_precision_loss)]
pub fn place_on_detector<R: Rng + ?Sized>(
    events: &mut EventList,
    params: &EventParameters,
    rng: &mut R,
) -> Result<()> {
    let n = events.len();
    let high = params.num_pixels as f64;
    let chipx: Vec<f64> = (0..n).map(|_| uniform_chip(high, rng)).collect();
    let chipy: Vec<f64> = (0..n).map(|_| uniform_chip(high, rng)).collect();
    let [cx, cy] = params.pix_center;
    let detx: Vec<f64> = chipx.iter().map(|&c| chip_to_detector(c, cx, rng)).collect();
    let dety: Vec<f64> = chipy.iter().map(|&c| chip_to_detector(c, cy, rng)).collect();
    let xpix = detx.iter().map(|d| d + cx).collect();
    let ypix = dety.iter().map(|d| d + cy).collect();

    events.insert_float(CHIPX, chipx)?;
    events.insert_float(CHIPY, chipy)?;
    events.insert_float(DETX, detx)?;
    events.insert_float(DETY, dety)?;
    events.insert_float(XPIX, xpix)?;
    events.insert_float(YPIX, ypix)
}

fn uniform_chip<R: Rng + ?Sized>(high: f64, rng: &mut R) -> f64 {
    if high > 1.0 {
        rng.gen_range(1.0..high).round_ties_even()
    } else {
        1.0
    }
}

/// Drops energies the redistribution matrix cannot scatter.
///
/// Tabulated background spectra extend half a bin past their outer points,
/// which can reach beyond the matrix grid.
fn retain_in_response(name: &str, energy: Vec<f64>, rmf: &RedistributionMatrix) -> Vec<f64> {
    let (Some(&emin), Some(&emax)) = (rmf.elo().first(), rmf.ehi().last()) else {
        return energy;
    };
    let n_in = energy.len();
    let kept: Vec<f64> = energy
        .into_iter()
        .filter(|&e| e >= emin && e < emax)
        .collect();
    if kept.len() < n_in {
        warn!(
            "{name}: dropped {} background events outside the response range [{emin}, {emax}) keV",
            n_in - kept.len()
        );
    }
    kept
}

/// The pieces of an observation a background generator needs.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub params: &'a EventParameters,
    pub arf: &'a EffectiveArea,
    pub rmf: &'a RedistributionMatrix,
}

/// A source of background events.
pub trait BackgroundGenerator: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Generates a complete background event list: detector positions,
    /// channels and times.
    ///
    /// # Errors
    /// Returns an error if generation fails.
    fn generate(&self, obs: &Observation<'_>, rng: &mut dyn RngCore) -> Result<EventList>;
}

/// Instrumental particle background.
///
/// The tabulated spectrum is normalized for a reference focal length; it is
/// scaled by the squared ratio of the instrument's focal length to it.
#[derive(Debug, Clone)]
pub struct InstrumentalBackground {
    name: String,
    spectrum: BackgroundSpectrum,
    area_scale: f64,
}

impl InstrumentalBackground {
    #[must_use]
    pub fn new(
        name: &str,
        spectrum: BackgroundSpectrum,
        focal_length: f64,
        reference_focal_length: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            spectrum,
            area_scale: (focal_length / reference_focal_length).powi(2),
        }
    }

    /// Loads a registered background for an instrument with `focal_length`.
    ///
    /// # Errors
    /// Returns an error if the background file cannot be found or read.
    pub fn from_spec(
        spec: &BackgroundSpec,
        registry: &InstrumentRegistry,
        focal_length: f64,
    ) -> Result<Self> {
        let spectrum = BackgroundSpectrum::from_file(registry.resolve_path(&spec.file)?)?;
        Ok(Self::new(
            &spec.name,
            spectrum,
            focal_length,
            spec.reference_focal_length,
        ))
    }
}

impl BackgroundGenerator for InstrumentalBackground {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, obs: &Observation<'_>, rng: &mut dyn RngCore) -> Result<EventList> {
        let params = obs.params;
        let energy = self.spectrum.generate_energies(
            params.exposure_time,
            self.area_scale,
            params.fov,
            rng,
        );
        let energy = retain_in_response(&self.name, energy, obs.rmf);
        if energy.is_empty() {
            return Err(Error::NoEvents(
                "no instrumental background events were detected".to_string(),
            ));
        }
        debug!("{}: {} instrumental background events", self.name, energy.len());

        let mut events = EventList::new();
        events.insert_float(ENERGY, energy)?;
        place_on_detector(&mut events, params, rng)?;
        scatter_energies(&mut events, obs.rmf, rng)?;
        assign_times(&mut events, params.exposure_time, rng)?;
        Ok(events)
    }
}

/// Diffuse astrophysical foreground.
///
/// Photons are drawn for the peak effective area and thinned by
/// `area / max_area`, then spread uniformly over the detector.
#[derive(Debug, Clone)]
pub struct AstrophysicalForeground {
    name: String,
    spectrum: BackgroundSpectrum,
}

impl AstrophysicalForeground {
    #[must_use]
    pub fn new(name: &str, spectrum: BackgroundSpectrum) -> Self {
        Self {
            name: name.to_string(),
            spectrum,
        }
    }

    /// Loads a registered foreground spectrum.
    ///
    /// # Errors
    /// Returns an error if the file cannot be found or read.
    pub fn from_spec(spec: &BackgroundSpec, registry: &InstrumentRegistry) -> Result<Self> {
        let spectrum = BackgroundSpectrum::from_file(registry.resolve_path(&spec.file)?)?;
        Ok(Self::new(&spec.name, spectrum))
    }
}

impl BackgroundGenerator for AstrophysicalForeground {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, obs: &Observation<'_>, rng: &mut dyn RngCore) -> Result<EventList> {
        let params = obs.params;
        let max_area = obs.arf.max_area();
        let candidates =
            self.spectrum
                .generate_energies(params.exposure_time, max_area, params.fov, rng);
        let energy: Vec<f64> = candidates
            .into_iter()
            .filter(|&e| {
                let u: f64 = rng.gen();
                u < obs.arf.interpolate_area(e) / max_area
            })
            .collect();
        let energy = retain_in_response(&self.name, energy, obs.rmf);
        debug!("{}: {} foreground events", self.name, energy.len());

        let mut events = EventList::new();
        events.insert_float(ENERGY, energy)?;
        place_on_detector(&mut events, params, rng)?;
        scatter_energies(&mut events, obs.rmf, rng)?;
        assign_times(&mut events, params.exposure_time, rng)?;
        Ok(events)
    }
}

/// Appends the output of each generator to `events`, in order.
///
/// # Errors
/// Returns the first generator error, or [`Error::FieldMismatch`] if a
/// background does not share the fields of `events`.
pub fn add_backgrounds(
    events: &mut EventList,
    generators: &[&dyn BackgroundGenerator],
    obs: &Observation<'_>,
    rng: &mut dyn RngCore,
) -> Result<()> {
    for generator in generators {
        info!("Adding in {} background.", generator.name());
        let background = generator.generate(obs, rng)?;
        events.append(&background)?;
    }
    Ok(())
}
