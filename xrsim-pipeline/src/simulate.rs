//! Top-level event simulation.
//!
//! [`EventSimulator`] composes the stages: effective-area detection and
//! pixelization per source, a merge into one event list, energy
//! redistribution, event times and finally the background components.

use crate::background::{
    add_backgrounds, assign_times, AstrophysicalForeground, BackgroundGenerator,
    InstrumentalBackground, Observation,
};
use crate::detection::{detect_events, SourceFlux};
use crate::geometry::{DetectorGeometry, DitherShape};
use crate::psf::Psf;
use crate::redistribution::scatter_energies;
use log::{info, warn};
use rand::Rng;
use xrsim_core::{
    BackgroundKind, EffectiveArea, Error, EventList, EventParameters, InstrumentRegistry,
    InstrumentSpec, RedistributionMatrix, Result, SkyPosition,
};

/// Sky photons of one source together with its flux normalization.
#[derive(Debug, Clone)]
pub struct SourcePhotons {
    pub name: String,
    /// Photon list with `ra`, `dec` and `energy` fields.
    pub events: EventList,
    pub flux: SourceFlux,
}

impl SourcePhotons {
    #[must_use]
    pub fn new(name: &str, events: EventList, flux: SourceFlux) -> Self {
        Self {
            name: name.to_string(),
            events,
            flux,
        }
    }
}

/// Observation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Exposure time in seconds.
    pub exposure_time: f64,
    pub sky_center: SkyPosition,
    pub dither_shape: DitherShape,
    /// Dither size in arcseconds.
    pub dither_size: f64,
    /// Roll angle in degrees.
    pub roll_angle: f64,
    /// Add the instrument's particle background.
    pub instr_bkgnd: bool,
    /// Name of a registered astrophysical foreground.
    pub foreground: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            exposure_time: 1.0e4,
            sky_center: SkyPosition::default(),
            dither_shape: DitherShape::Square,
            dither_size: 16.0,
            roll_angle: 0.0,
            instr_bkgnd: true,
            foreground: None,
        }
    }
}

impl SimulationConfig {
    #[must_use]
    pub fn with_exposure_time(mut self, exposure_time: f64) -> Self {
        self.exposure_time = exposure_time;
        self
    }

    #[must_use]
    pub fn with_sky_center(mut self, sky_center: SkyPosition) -> Self {
        self.sky_center = sky_center;
        self
    }

    #[must_use]
    pub fn with_dither_shape(mut self, shape: DitherShape) -> Self {
        self.dither_shape = shape;
        self
    }

    #[must_use]
    pub fn with_dither_size(mut self, size: f64) -> Self {
        self.dither_size = size;
        self
    }

    #[must_use]
    pub fn with_roll_angle(mut self, roll_angle: f64) -> Self {
        self.roll_angle = roll_angle;
        self
    }

    #[must_use]
    pub fn with_instr_bkgnd(mut self, enabled: bool) -> Self {
        self.instr_bkgnd = enabled;
        self
    }

    #[must_use]
    pub fn with_foreground(mut self, name: Option<String>) -> Self {
        self.foreground = name;
        self
    }
}

/// An instrument with its responses loaded.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub spec: InstrumentSpec,
    pub arf: EffectiveArea,
    pub rmf: RedistributionMatrix,
    pub psf: Option<Psf>,
    pub background: Option<InstrumentalBackground>,
}

impl Instrument {
    /// Looks up `name` in the registry and reads its response files, PSF
    /// and instrumental background.
    ///
    /// # Errors
    /// Fails on unknown instruments, invalid specs, and missing or
    /// malformed files.
    pub fn load(registry: &InstrumentRegistry, name: &str) -> Result<Self> {
        let spec = registry.get(name)?.clone();
        spec.validate()?;
        let arf = EffectiveArea::from_file(registry.resolve_path(&spec.arf)?)?;
        let rmf = RedistributionMatrix::from_file(registry.resolve_path(&spec.rmf)?)?;
        let psf = Psf::from_spec(&spec, registry)?;
        let background = spec
            .bkgnd
            .as_deref()
            .map(|bkgnd| {
                let bg = registry.background(bkgnd)?;
                if bg.kind != BackgroundKind::Instrumental {
                    return Err(Error::ConfigError(format!(
                        "background {bkgnd} of instrument {name} is not instrumental"
                    )));
                }
                InstrumentalBackground::from_spec(bg, registry, spec.focal_length)
            })
            .transpose()?;
        Ok(Self {
            spec,
            arf,
            rmf,
            psf,
            background,
        })
    }
}

/// Runs simulations for one instrument and observation setup.
#[derive(Debug, Clone)]
pub struct EventSimulator {
    instrument: Instrument,
    config: SimulationConfig,
    geometry: DetectorGeometry,
    params: EventParameters,
    foreground: Option<AstrophysicalForeground>,
}

impl EventSimulator {
    #[must_use]
    pub fn new(instrument: Instrument, config: SimulationConfig) -> Self {
        let geometry = DetectorGeometry::new(
            &instrument.spec,
            config.sky_center,
            config.roll_angle,
            config.dither_shape,
            config.dither_size,
        );
        let params = EventParameters::new(
            &instrument.spec,
            &instrument.arf,
            &instrument.rmf,
            config.exposure_time,
            config.sky_center,
            config.roll_angle,
        );
        Self {
            instrument,
            config,
            geometry,
            params,
            foreground: None,
        }
    }

    /// Loads instrument `name` and the configured foreground from the
    /// registry.
    ///
    /// # Errors
    /// Fails if the instrument or foreground cannot be loaded.
    pub fn from_registry(
        registry: &InstrumentRegistry,
        name: &str,
        config: SimulationConfig,
    ) -> Result<Self> {
        let instrument = Instrument::load(registry, name)?;
        let foreground = match &config.foreground {
            Some(fg) => {
                let spec = registry.background(fg)?;
                if spec.kind != BackgroundKind::Astrophysical {
                    return Err(Error::ConfigError(format!(
                        "background {fg} is not an astrophysical foreground"
                    )));
                }
                Some(AstrophysicalForeground::from_spec(spec, registry)?)
            }
            None => None,
        };
        Ok(Self::new(instrument, config).with_foreground(foreground))
    }

    #[must_use]
    pub fn with_foreground(mut self, foreground: Option<AstrophysicalForeground>) -> Self {
        self.foreground = foreground;
        self
    }

    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn event_parameters(&self) -> &EventParameters {
        &self.params
    }

    fn observation(&self) -> Observation<'_> {
        Observation {
            params: &self.params,
            arf: &self.instrument.arf,
            rmf: &self.instrument.rmf,
        }
    }

    fn background_generators(&self) -> Vec<&dyn BackgroundGenerator> {
        let mut generators: Vec<&dyn BackgroundGenerator> = Vec::new();
        if let Some(fg) = &self.foreground {
            generators.push(fg);
        }
        if self.config.instr_bkgnd {
            match &self.instrument.background {
                Some(bg) => generators.push(bg),
                None => warn!(
                    "Instrument {} has no instrumental background.",
                    self.instrument.spec.name
                ),
            }
        }
        generators
    }

    /// Detects and pixelizes the photons of every source, merges them and
    /// assigns channels and times.
    ///
    /// # Errors
    /// - [`Error::InsufficientPhotons`] if a source sample is too small for
    ///   its flux.
    /// - [`Error::NoEvents`] if no source produced any event.
    /// - Redistribution errors.
    pub fn generate_events<R: Rng>(
        &self,
        sources: Vec<SourcePhotons>,
        rng: &mut R,
    ) -> Result<EventList> {
        info!(
            "Simulating events from {} sources using instrument {}.",
            sources.len(),
            self.instrument.spec.name
        );
        let mut all_events = EventList::new();
        for SourcePhotons {
            name,
            mut events,
            flux,
        } in sources
        {
            info!("Detecting events from source {name}.");
            let n_det = detect_events(
                &mut events,
                &self.instrument.arf,
                self.config.exposure_time,
                &flux,
                rng,
            )?;
            if n_det == 0 {
                warn!("No events were detected from source {name}.");
                continue;
            }
            info!("Pixeling events.");
            let n_kept = self
                .geometry
                .pixelize(&mut events, self.instrument.psf.as_ref(), rng)?;
            if n_kept == 0 {
                warn!("No events from source {name} fall on the detector.");
                continue;
            }
            all_events.append(&events)?;
        }

        if all_events.is_empty() {
            return Err(Error::NoEvents(
                "no events from any of the sources in the catalog were detected".to_string(),
            ));
        }

        scatter_energies(&mut all_events, &self.instrument.rmf, rng)?;
        assign_times(&mut all_events, self.config.exposure_time, rng)?;
        Ok(all_events)
    }

    /// Source events followed by the configured backgrounds.
    ///
    /// # Errors
    /// See [`EventSimulator::generate_events`]; background errors are also
    /// returned.
    pub fn simulate<R: Rng>(&self, sources: Vec<SourcePhotons>, rng: &mut R) -> Result<EventList> {
        let mut events = self.generate_events(sources, rng)?;
        let generators = self.background_generators();
        add_backgrounds(&mut events, &generators, &self.observation(), rng)?;
        info!("Observation complete: {} events.", events.len());
        Ok(events)
    }

    /// Background events only.
    ///
    /// # Errors
    /// Returns [`Error::NoEvents`] if no background is configured, or the
    /// first background error.
    pub fn make_background<R: Rng>(&self, rng: &mut R) -> Result<EventList> {
        let generators = self.background_generators();
        if generators.is_empty() {
            return Err(Error::NoEvents(
                "no background components are configured".to_string(),
            ));
        }
        let mut events = EventList::new();
        add_backgrounds(&mut events, &generators, &self.observation(), rng)?;
        info!("Background complete: {} events.", events.len());
        Ok(events)
    }
}
