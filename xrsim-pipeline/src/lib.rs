//! xrsim-pipeline: Stochastic stages of the event simulation.
//!
//! This crate turns idealized sky photons into detector events:
//! - **Detection** - effective-area photon thinning
//! - **Geometry** - WCS projection, dither, roll and field-of-view clipping
//! - **PSF** - Gaussian and image-based scattering
//! - **Redistribution** - energy to channel sampling
//! - **Backgrounds** - instrumental, foreground and point-source photons
//!
//! Every stochastic function takes an explicit random generator, so a fixed
//! seed reproduces a run exactly.
//!

pub mod background;
pub mod detection;
pub mod geometry;
pub mod point_sources;
pub mod products;
pub mod psf;
pub mod redistribution;
pub mod simulate;

pub use background::{
    add_backgrounds, assign_times, AstrophysicalForeground, BackgroundGenerator,
    BackgroundSpectrum, InstrumentalBackground, Observation,
};
pub use detection::{detect_events, SourceFlux};
pub use geometry::{DetectorGeometry, Dither, DitherShape, RollRotation, TanProjection};
pub use point_sources::{make_point_sources, PointSourceConfig, PointSourcePhotons, SourceRecord};
pub use products::{make_image, EnergyFilter, RadialProfile, Spectrum};
pub use psf::Psf;
pub use redistribution::scatter_energies;
pub use simulate::{EventSimulator, Instrument, SimulationConfig, SourcePhotons};

// Re-export the core data model
pub use xrsim_core::{Error, EventList, EventParameters, Result, SkyPosition};
