//! Error types for xrsim-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for xrsim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for xrsim operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Instrument name not present in the registry.
    #[error("instrument {0} is not in the instrument registry")]
    UnknownInstrument(String),

    /// Background name not present in the registry.
    #[error("background {0} is not in the instrument registry")]
    UnknownBackground(String),

    /// Instrument registered twice under the same name.
    #[error("instrument {0} is already registered")]
    DuplicateInstrument(String),

    /// A referenced data file could not be located.
    #[error("could not find file {}", .0.display())]
    MissingFile(PathBuf),

    /// A response file lacks a required extension.
    #[error("cannot find the {expected} extension in {}", file.display())]
    MissingExtension { file: PathBuf, expected: String },

    /// A response file is structurally invalid.
    #[error("malformed response file: {0}")]
    MalformedResponse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The photon sample is too small for the requested flux, exposure and area.
    #[error(
        "this combination of exposure time and effective area will result in more \
         photons being drawn than are available in the sample ({available} available, \
         {required} required)"
    )]
    InsufficientPhotons { available: usize, required: usize },

    /// No events survived the pipeline.
    #[error("no events were detected: {0}")]
    NoEvents(String),

    /// A column does not match the event list length.
    #[error("field {field} has length {got}, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        got: usize,
    },

    /// A required field is missing from the event list.
    #[error("event list has no field {0}")]
    MissingField(String),

    /// Two event lists with different field sets were combined.
    #[error("event lists do not share the same fields: {0}")]
    FieldMismatch(String),

    /// An energy bin with zero total weight received photons.
    #[error("energy bin {bin} has zero total weight but {count} photons")]
    ZeroWeightBin { bin: usize, count: usize },

    /// A photon energy lies outside the redistribution matrix energy grid.
    #[error("photon energy {0} keV lies outside the response matrix energy grid")]
    EnergyOutOfRange(f64),

    /// The PSF did not scatter every photon it was given.
    #[error("the PSF scattered {scattered} photons but received {received}")]
    PsfMismatch { received: usize, scattered: usize },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
