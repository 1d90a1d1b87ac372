//! Tabular response files.
//!
//! Response files are JSON documents laid out like FITS binary tables:
//! the top-level keys are extension names, and each extension carries a
//! `header` keyword map and a `data` map of named columns.
//!
//! ```json
//! {
//!   "SPECRESP": {
//!     "header": {"TELESCOP": "XRS"},
//!     "data": {"ENERG_LO": [0.1, 0.2], "ENERG_HI": [0.2, 0.3], "SPECRESP": [100.0, 120.0]}
//!   }
//! }
//! ```
//!
//! The whole file is read and closed when it is opened.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Header keywords of one extension.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, serde_json::Value>);

impl Header {
    /// Returns a string keyword.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns an integer keyword.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Returns a floating point keyword.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Returns true if the keyword is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// One named extension: header plus columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extension {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
}

impl Extension {
    /// Deserializes a column.
    ///
    /// # Errors
    /// Returns [`Error::MalformedResponse`] if the column is missing or has
    /// the wrong shape.
    pub fn column<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .data
            .get(name)
            .ok_or_else(|| Error::MalformedResponse(format!("missing column {name}")))?;
        T::deserialize(value)
            .map_err(|e| Error::MalformedResponse(format!("column {name}: {e}")))
    }

    /// Deserializes a float column, treating `null` entries as zero.
    ///
    /// # Errors
    /// See [`Extension::column`].
    pub fn float_column(&self, name: &str) -> Result<Vec<f64>> {
        let values: Vec<Option<f64>> = self.column(name)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
    }

    /// Returns true if the column is present.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }
}

/// A scalar or array table cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Converts the cell into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A fully loaded response file.
#[derive(Debug, Clone)]
pub struct ResponseFile {
    path: PathBuf,
    extensions: BTreeMap<String, Extension>,
}

impl ResponseFile {
    /// Reads a response file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let extensions = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self {
            path: path.to_path_buf(),
            extensions,
        })
    }

    /// Parses a response file from a JSON string; `path` is used for messages.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid.
    pub fn from_json<P: AsRef<Path>>(path: P, json: &str) -> Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            extensions: serde_json::from_str(json)?,
        })
    }

    /// Path the file was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns an extension by name.
    ///
    /// # Errors
    /// Returns [`Error::MissingExtension`] if it is absent.
    pub fn extension(&self, name: &str) -> Result<&Extension> {
        self.extensions
            .get(name)
            .ok_or_else(|| Error::MissingExtension {
                file: self.path.clone(),
                expected: name.to_string(),
            })
    }

    /// Returns the first extension present among `names`, with its name.
    ///
    /// # Errors
    /// Returns [`Error::MissingExtension`] naming all alternatives.
    pub fn first_extension<'a>(&self, names: &[&'a str]) -> Result<(&'a str, &Extension)> {
        names
            .iter()
            .find_map(|&name| self.extensions.get(name).map(|ext| (name, ext)))
            .ok_or_else(|| Error::MissingExtension {
                file: self.path.clone(),
                expected: names
                    .iter()
                    .map(|n| format!("\"{n}\""))
                    .collect::<Vec<_>>()
                    .join(" or "),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "EBOUNDS": {
            "header": {"DETCHANS": 3, "CHANTYPE": "PI", "EXPOSURE": 1.5},
            "data": {"CHANNEL": [1, 2, 3], "E_MIN": [0.1, null, 0.3]}
        }
    }"#;

    #[test]
    fn test_header_access() {
        let file = ResponseFile::from_json("test.rmf", JSON).unwrap();
        let ext = file.extension("EBOUNDS").unwrap();
        assert_eq!(ext.header.get_i64("DETCHANS"), Some(3));
        assert_eq!(ext.header.get_str("CHANTYPE"), Some("PI"));
        assert_eq!(ext.header.get_f64("EXPOSURE"), Some(1.5));
        assert!(ext.header.get_str("MISSION").is_none());
    }

    #[test]
    fn test_columns() {
        let file = ResponseFile::from_json("test.rmf", JSON).unwrap();
        let ext = file.extension("EBOUNDS").unwrap();
        let channels: Vec<i64> = ext.column("CHANNEL").unwrap();
        assert_eq!(channels, vec![1, 2, 3]);
        assert_eq!(ext.float_column("E_MIN").unwrap(), vec![0.1, 0.0, 0.3]);
        assert!(matches!(
            ext.column::<Vec<f64>>("E_MAX"),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_missing_extension_message() {
        let file = ResponseFile::from_json("test.rmf", JSON).unwrap();
        let err = file
            .first_extension(&["MATRIX", "SPECRESP MATRIX"])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"MATRIX\" or \"SPECRESP MATRIX\""));
        assert!(msg.contains("test.rmf"));
    }

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<i64> = serde_json::from_str("4").unwrap();
        let many: OneOrMany<i64> = serde_json::from_str("[4, 5]").unwrap();
        assert_eq!(one.into_vec(), vec![4]);
        assert_eq!(many.into_vec(), vec![4, 5]);
    }
}
