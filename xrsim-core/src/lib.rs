//! xrsim-core: Core types for synthetic X-ray event simulation.
//!
//! This crate provides the data model shared by the simulation stages:
//! the columnar event list, instrument specifications and their registry,
//! effective-area and redistribution responses, PSF image sets and the
//! per-run event parameters.
//!

pub mod arf;
pub mod constants;
pub mod error;
pub mod events;
pub mod instrument;
pub mod params;
pub mod psf;
pub mod response;
pub mod rmf;

pub use arf::EffectiveArea;
pub use error::{Error, Result};
pub use events::{Column, EventList};
pub use instrument::{BackgroundKind, BackgroundSpec, InstrumentRegistry, InstrumentSpec, PsfSpec};
pub use params::{EventParameters, SkyPosition};
pub use psf::{LengthUnit, PsfImage, PsfImageSet};
pub use response::ResponseFile;
pub use rmf::{MatrixRow, RedistributionMatrix};
