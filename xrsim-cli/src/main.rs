//! xrsim command-line interface.
//!
//! Simulates event lists for a registered instrument from a source catalog,
//! generates background-only observations and inspects inputs.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use xrsim_core::events::{DEC, ENERGY, RA};
use xrsim_core::{EventList, EventParameters, InstrumentRegistry, SkyPosition};
use xrsim_io::{FluxTable, PhotonListReader, SourceCatalog};
use xrsim_pipeline::{
    make_point_sources, DitherShape, EnergyFilter, EventSimulator, PointSourceConfig,
    RadialProfile, SimulationConfig, SourceFlux, SourcePhotons, Spectrum,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    XrsimIo(#[from] xrsim_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] xrsim_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
}

/// Synthetic X-ray event simulation.
#[derive(Parser)]
#[command(name = "xrsim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (sets the default log level to info)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that simulate an observation.
#[derive(Args)]
struct ObservationArgs {
    /// Instrument registry (JSON)
    #[arg(short, long)]
    registry: PathBuf,

    /// Instrument name
    #[arg(short, long)]
    instrument: String,

    /// Output event file (.csv, or .h5 with the hdf5 feature)
    #[arg(short, long)]
    output: PathBuf,

    /// Exposure time in seconds
    #[arg(short, long, default_value = "10000.0")]
    exposure: f64,

    /// Pointing right ascension in degrees
    #[arg(long, default_value = "0.0")]
    ra: f64,

    /// Pointing declination in degrees
    #[arg(long, default_value = "0.0")]
    dec: f64,

    /// Roll angle in degrees
    #[arg(long, default_value = "0.0")]
    roll: f64,

    /// Dither pattern (square or circle)
    #[arg(long, default_value = "square")]
    dither_shape: DitherShape,

    /// Dither size in arcseconds
    #[arg(long, default_value = "16.0")]
    dither_size: f64,

    /// Skip the instrumental background
    #[arg(long)]
    no_instr_bkgnd: bool,

    /// Registered astrophysical foreground to add
    #[arg(long)]
    foreground: Option<String>,

    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
}

impl ObservationArgs {
    fn config(&self) -> SimulationConfig {
        SimulationConfig::default()
            .with_exposure_time(self.exposure)
            .with_sky_center(SkyPosition::new(self.ra, self.dec))
            .with_roll_angle(self.roll)
            .with_dither_shape(self.dither_shape)
            .with_dither_size(self.dither_size)
            .with_instr_bkgnd(!self.no_instr_bkgnd)
            .with_foreground(self.foreground.clone())
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn simulator(&self) -> Result<EventSimulator> {
        let registry = InstrumentRegistry::from_file(&self.registry)?;
        Ok(EventSimulator::from_registry(
            &registry,
            &self.instrument,
            self.config(),
        )?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate an observation of the sources in a catalog
    Simulate {
        /// Source catalog (JSON)
        catalog: PathBuf,

        #[command(flatten)]
        observation: ObservationArgs,

        /// Point-source background flux table (`agn`/`gal` flux lines)
        #[arg(long)]
        ptsrc_fluxes: Option<PathBuf>,

        /// Write the simulated point-source properties to this CSV file
        #[arg(long, requires = "ptsrc_fluxes")]
        ptsrc_table: Option<PathBuf>,

        /// Write a counts spectrum to this CSV file
        #[arg(long)]
        spectrum: Option<PathBuf>,

        /// Write a sky image to this HDF5 file (requires the hdf5 feature)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Image rebinning factor
        #[arg(long, default_value = "1")]
        reblock: usize,

        /// Write a radial profile around the pointing to this CSV file
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Outer profile radius in arcseconds
        #[arg(long, default_value = "60.0")]
        profile_rmax: f64,

        /// Number of profile annuli
        #[arg(long, default_value = "20")]
        profile_bins: usize,

        /// Lower energy bound for the image and profile in keV
        #[arg(long)]
        emin: Option<f64>,

        /// Upper energy bound for the image and profile in keV
        #[arg(long)]
        emax: Option<f64>,
    },

    /// Simulate background events only
    Background {
        #[command(flatten)]
        observation: ObservationArgs,
    },

    /// List the instruments in a registry
    Instruments {
        /// Instrument registry (JSON)
        registry: PathBuf,

        /// Print full specifications as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information about a photon list
    Info {
        /// Input photon list
        input: PathBuf,
    },
}

fn write_events(path: &Path, events: &EventList, params: &EventParameters) -> Result<()> {
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(String::new, str::to_lowercase);
    match format.as_str() {
        "csv" => {
            xrsim_io::write_events_csv(path, events)?;
            xrsim_io::write_parameters_json(path.with_extension("json"), params)?;
        }
        #[cfg(feature = "hdf5")]
        "h5" | "hdf5" => {
            let options = xrsim_io::EventWriteOptions::default();
            xrsim_io::write_events_hdf5(path, events, params, &options)?;
        }
        other => return Err(CliError::UnsupportedFormat(other.to_string())),
    }
    info!("Wrote {} events to {}.", events.len(), path.display());
    Ok(())
}

#[cfg(feature = "hdf5")]
fn write_image(
    path: &Path,
    events: &EventList,
    params: &EventParameters,
    filter: EnergyFilter,
    reblock: usize,
) -> Result<()> {
    let image = xrsim_pipeline::make_image(events, params, filter, reblock)?;
    xrsim_io::write_image_hdf5(path, &image, params, Some(1))?;
    info!("Wrote {}x{} image to {}.", image.nrows(), image.ncols(), path.display());
    Ok(())
}

#[cfg(not(feature = "hdf5"))]
fn write_image(
    path: &Path,
    _events: &EventList,
    _params: &EventParameters,
    _filter: EnergyFilter,
    _reblock: usize,
) -> Result<()> {
    Err(CliError::UnsupportedFormat(format!(
        "{} (image output requires the hdf5 feature)",
        path.display()
    )))
}

fn point_source_photons(
    fluxes: &Path,
    observation: &ObservationArgs,
    sim: &EventSimulator,
    table: Option<&Path>,
    rng: &mut StdRng,
) -> Result<Option<SourcePhotons>> {
    let fluxes = FluxTable::from_file(fluxes)?;
    let config = PointSourceConfig::new(
        observation.exposure,
        sim.instrument().spec.fov,
        SkyPosition::new(observation.ra, observation.dec),
    );
    let out = make_point_sources(&fluxes.agn, &fluxes.galaxies, &config, None, rng)?;
    if let Some(path) = table {
        xrsim_io::write_sources_csv(path, &out.sources)?;
    }
    if out.events.is_empty() {
        return Ok(None);
    }
    let flux = SourceFlux::spanning(out.flux, out.events.float(ENERGY)?);
    Ok(Some(SourcePhotons::new("point-source background", out.events, flux)))
}

fn print_range(label: &str, values: &[f64]) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    println!("{} range: {} - {}", label, min, max);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Simulate {
            catalog,
            observation,
            ptsrc_fluxes,
            ptsrc_table,
            spectrum,
            image,
            reblock,
            profile,
            profile_rmax,
            profile_bins,
            emin,
            emax,
        } => {
            let start = Instant::now();
            let sim = observation.simulator()?;
            let mut rng = observation.rng();

            let catalog = SourceCatalog::from_file(&catalog)?;
            let mut sources = catalog.load_sources()?;
            if let Some(fluxes) = &ptsrc_fluxes {
                if let Some(ptsrc) = point_source_photons(
                    fluxes,
                    &observation,
                    &sim,
                    ptsrc_table.as_deref(),
                    &mut rng,
                )? {
                    sources.push(ptsrc);
                }
            }

            let events = sim.simulate(sources, &mut rng)?;
            let params = sim.event_parameters();
            write_events(&observation.output, &events, params)?;

            if let Some(path) = &spectrum {
                xrsim_io::write_spectrum_csv(path, &Spectrum::from_events(&events, params)?)?;
            }
            if let Some(path) = &image {
                write_image(path, &events, params, EnergyFilter::new(emin, emax), reblock)?;
            }
            if let Some(path) = &profile {
                let radial = RadialProfile::from_events(
                    &events,
                    params,
                    params.sky_center,
                    (0.0, profile_rmax),
                    profile_bins,
                    EnergyFilter::new(emin, emax),
                )?;
                xrsim_io::write_profile_csv(path, &radial)?;
            }

            println!(
                "Simulated {} events in {:.2}s",
                events.len(),
                start.elapsed().as_secs_f64()
            );
        }

        Commands::Background { observation } => {
            let sim = observation.simulator()?;
            let mut rng = observation.rng();
            let events = sim.make_background(&mut rng)?;
            write_events(&observation.output, &events, sim.event_parameters())?;
            println!("Simulated {} background events", events.len());
        }

        Commands::Instruments { registry, json } => {
            let registry = InstrumentRegistry::from_file(&registry)?;
            for spec in registry.instruments() {
                if json {
                    println!("{}", serde_json::to_string_pretty(spec)?);
                } else {
                    println!(
                        "{:<20} fov {:>6.1}' {:>5} pixels  f = {} m",
                        spec.name, spec.fov, spec.num_pixels, spec.focal_length
                    );
                }
            }
        }

        Commands::Info { input } => {
            let reader = PhotonListReader::open(&input)?;
            let file_size = reader.file_size();

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Photons: {}", reader.photon_count());

            let events = reader.read_events()?;
            if !events.is_empty() {
                print_range("Energy (keV)", events.float(ENERGY)?);
                print_range("RA (deg)", events.float(RA)?);
                print_range("Dec (deg)", events.float(DEC)?);
            }
        }
    }

    Ok(())
}
