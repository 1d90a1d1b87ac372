//! Columnar event lists.
//!
//! An [`EventList`] stores per-photon data as named parallel columns
//! (Structure of Arrays) instead of a vector of photon structs. Fields
//! accumulate as photons move through the pipeline:
//!
//! - sky stage: `energy`, `ra`, `dec`
//! - detector stage: `chipx`, `chipy`, `detx`, `dety`, `xpix`, `ypix`
//! - after redistribution: the instrument channel field (`PI`, `PHA`, ...)
//! - `time`
//!
//! Every column always has the same length. Operations that drop or reorder
//! photons apply the same indices to every column.

use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;

pub const ENERGY: &str = "energy";
pub const RA: &str = "ra";
pub const DEC: &str = "dec";
pub const CHIPX: &str = "chipx";
pub const CHIPY: &str = "chipy";
pub const DETX: &str = "detx";
pub const DETY: &str = "dety";
pub const XPIX: &str = "xpix";
pub const YPIX: &str = "ypix";
pub const TIME: &str = "time";

/// A single typed column of per-photon values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Floating point values (energies, coordinates, times).
    Float(Vec<f64>),
    /// Integer values (channels).
    Int(Vec<i64>),
}

impl Column {
    /// Returns the number of values in the column.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
        }
    }

    /// Returns true if the column is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the float values, if this is a float column.
    #[must_use]
    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            Column::Int(_) => None,
        }
    }

    /// Returns the integer values, if this is an integer column.
    #[must_use]
    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            Column::Int(v) => Some(v),
            Column::Float(_) => None,
        }
    }

    /// Gathers the values at `indices` into a new column.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Int(v) => Column::Int(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Keeps the values where `mask` is true.
    pub fn retain_mask(&mut self, mask: &[bool]) {
        match self {
            Column::Float(v) => retain_by_mask(v, mask),
            Column::Int(v) => retain_by_mask(v, mask),
        }
    }

    fn extend_from(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => {
                a.extend_from_slice(b);
                true
            }
            (Column::Int(a), Column::Int(b)) => {
                a.extend_from_slice(b);
                true
            }
            _ => false,
        }
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, mask: &[bool]) {
    let mut idx = 0;
    values.retain(|_| {
        let keep = mask[idx];
        idx += 1;
        keep
    });
}

/// A set of named, equal-length per-photon columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventList {
    columns: BTreeMap<String, Column>,
    len: usize,
}

impl EventList {
    /// Creates an empty event list with no fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sky-stage event list from RA, Dec (degrees) and energy (keV).
    ///
    /// # Errors
    /// Returns an error if the three arrays differ in length.
    pub fn from_sky(ra: Vec<f64>, dec: Vec<f64>, energy: Vec<f64>) -> Result<Self> {
        let mut events = Self::new();
        events.insert_float(ENERGY, energy)?;
        events.insert_float(RA, ra)?;
        events.insert_float(DEC, dec)?;
        Ok(events)
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the list has no fields at all.
    #[must_use]
    pub fn has_no_fields(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates over field names in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterates over `(name, column)` pairs in sorted name order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if the field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Inserts or replaces a column.
    ///
    /// The first column inserted into a field-less list sets the length.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the column length differs from
    /// the list length.
    pub fn insert(&mut self, name: &str, column: Column) -> Result<()> {
        let replacing_only = self.columns.len() == 1 && self.columns.contains_key(name);
        if self.columns.is_empty() || replacing_only {
            self.len = column.len();
        } else if column.len() != self.len {
            return Err(Error::LengthMismatch {
                field: name.to_string(),
                expected: self.len,
                got: column.len(),
            });
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Inserts a float column.
    ///
    /// # Errors
    /// See [`EventList::insert`].
    pub fn insert_float(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.insert(name, Column::Float(values))
    }

    /// Inserts an integer column.
    ///
    /// # Errors
    /// See [`EventList::insert`].
    pub fn insert_int(&mut self, name: &str, values: Vec<i64>) -> Result<()> {
        self.insert(name, Column::Int(values))
    }

    /// Removes a column and returns it.
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let removed = self.columns.remove(name);
        if self.columns.is_empty() {
            self.len = 0;
        }
        removed
    }

    /// Returns a column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Returns a float column by name.
    ///
    /// # Errors
    /// Returns [`Error::MissingField`] if the field is absent or not a float column.
    pub fn float(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .and_then(Column::as_float)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// Returns a mutable view of a float column by name.
    ///
    /// # Errors
    /// Returns [`Error::MissingField`] if the field is absent or not a float column.
    pub fn float_mut(&mut self, name: &str) -> Result<&mut [f64]> {
        match self.columns.get_mut(name) {
            Some(Column::Float(v)) => Ok(v.as_mut_slice()),
            _ => Err(Error::MissingField(name.to_string())),
        }
    }

    /// Returns an integer column by name.
    ///
    /// # Errors
    /// Returns [`Error::MissingField`] if the field is absent or not an integer column.
    pub fn int(&self, name: &str) -> Result<&[i64]> {
        self.columns
            .get(name)
            .and_then(Column::as_int)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// Gathers every column at `indices`, in that order.
    ///
    /// Used both to subset (detection) and to reorder (energy sort).
    pub fn take(&mut self, indices: &[usize]) {
        self.columns
            .par_iter_mut()
            .for_each(|(_, column)| *column = column.take(indices));
        self.len = indices.len();
    }

    /// Keeps the events where `mask` is true, in every column.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the mask length differs from the list length.
    pub fn retain_mask(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.len {
            return Err(Error::LengthMismatch {
                field: "mask".to_string(),
                expected: self.len,
                got: mask.len(),
            });
        }
        self.columns
            .par_iter_mut()
            .for_each(|(_, column)| column.retain_mask(mask));
        self.len = mask.iter().filter(|&&keep| keep).count();
        Ok(())
    }

    /// Appends all events from another list, field by field.
    ///
    /// A list with no fields adopts the other list's fields.
    ///
    /// # Errors
    /// Returns [`Error::FieldMismatch`] if the field sets or column types differ.
    pub fn append(&mut self, other: &EventList) -> Result<()> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if other.columns.is_empty() {
            return Ok(());
        }
        if !self.columns.keys().eq(other.columns.keys()) {
            let ours: Vec<&str> = self.field_names().collect();
            let theirs: Vec<&str> = other.field_names().collect();
            return Err(Error::FieldMismatch(format!("{ours:?} vs {theirs:?}")));
        }
        for (name, column) in &mut self.columns {
            let Some(incoming) = other.columns.get(name) else {
                continue;
            };
            if !column.extend_from(incoming) {
                return Err(Error::FieldMismatch(format!(
                    "field {name} has different column types"
                )));
            }
        }
        self.len += other.len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sky_events() -> EventList {
        EventList::from_sky(
            vec![30.0, 30.1, 30.2, 30.3],
            vec![45.0, 45.1, 45.2, 45.3],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn test_from_sky_sets_length() {
        let events = sky_events();
        assert_eq!(events.len(), 4);
        assert!(events.contains(ENERGY));
        assert!(events.contains(RA));
        assert!(events.contains(DEC));
    }

    #[test]
    fn test_insert_length_mismatch() {
        let mut events = sky_events();
        let err = events.insert_float(TIME, vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_take_applies_to_every_field() {
        let mut events = sky_events();
        events.insert_int("PI", vec![10, 20, 30, 40]).unwrap();
        events.take(&[3, 1]);

        assert_eq!(events.len(), 2);
        assert_eq!(events.float(ENERGY).unwrap(), &[4.0, 2.0]);
        assert_eq!(events.float(RA).unwrap(), &[30.3, 30.1]);
        assert_eq!(events.int("PI").unwrap(), &[40, 20]);
    }

    #[test]
    fn test_retain_mask() {
        let mut events = sky_events();
        events
            .retain_mask(&[true, false, false, true])
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events.float(DEC).unwrap(), &[45.0, 45.3]);
        assert!(events.retain_mask(&[true]).is_err());
    }

    #[test]
    fn test_append_requires_same_fields() {
        let mut events = sky_events();
        let other = sky_events();
        events.append(&other).unwrap();
        assert_eq!(events.len(), 8);

        let mut bare = EventList::new();
        bare.insert_float(ENERGY, vec![1.0]).unwrap();
        assert!(matches!(
            events.append(&bare),
            Err(Error::FieldMismatch(_))
        ));
    }

    #[test]
    fn test_append_into_empty_adopts_fields() {
        let mut events = EventList::new();
        events.append(&sky_events()).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events.field_names().count(), 3);
    }

    #[test]
    fn test_remove_keeps_length() {
        let mut events = sky_events();
        events.remove(RA);
        events.remove(DEC);
        assert_eq!(events.len(), 4);
        assert!(events.float(RA).is_err());
        events.remove(ENERGY);
        assert!(events.is_empty());
        assert!(events.has_no_fields());
    }

    #[test]
    fn test_wrong_column_type_is_missing() {
        let mut events = sky_events();
        events.insert_int("PI", vec![1, 2, 3, 4]).unwrap();
        assert!(events.float("PI").is_err());
        assert!(events.int(ENERGY).is_err());
    }
}
