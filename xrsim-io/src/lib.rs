//! xrsim-io: File I/O for xrsim.
//!
//! This crate reads binary photon lists through memory maps (memmap2),
//! loads source catalogs and point-source flux tables, and writes event
//! lists, parameter sidecars and derived products. HDF5 output is
//! available with the `hdf5` feature.
//!

pub mod catalog;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod reader;
mod writer;

pub use catalog::{CatalogEntry, FluxTable, SourceCatalog};
pub use error::{Error, Result};
pub use reader::{MappedFileReader, PhotonListReader, PHOTON_RECORD_SIZE};
pub use writer::{
    read_parameters_json, write_events_csv, write_parameters_json, write_photon_list,
    write_profile_csv, write_sources_csv, write_spectrum_csv, EventFileWriter,
};
#[cfg(feature = "hdf5")]
pub use hdf5::{
    read_events_hdf5, read_image_hdf5, write_events_hdf5, write_image_hdf5, EventWriteOptions,
};
