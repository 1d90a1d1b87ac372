//! Memory-mapped photon-list readers.
//!
//! A photon list is a flat binary file of little-endian `f64` triples
//! `(ra, dec, energy)`, one per photon, with no header.

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use xrsim_core::EventList;

/// Bytes per photon record.
pub const PHOTON_RECORD_SIZE: usize = 24;

/// Read-only memory map of an input file.
///
/// Photon lists can be large; pages are faulted in as records are decoded.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Maps `path` into memory.
    ///
    /// # Errors
    /// Fails if the file does not exist or cannot be mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: photon lists are inputs; nothing writes to them while a run is active.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Mapped bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader for binary photon lists.
pub struct PhotonListReader {
    reader: MappedFileReader,
}

impl PhotonListReader {
    /// Opens a photon list.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: MappedFileReader::open(path)?,
        })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the number of complete photon records in the file.
    #[must_use]
    pub fn photon_count(&self) -> usize {
        self.reader.len() / PHOTON_RECORD_SIZE
    }

    fn check_size(&self) -> Result<()> {
        if !self.reader.len().is_multiple_of(PHOTON_RECORD_SIZE) {
            return Err(Error::InvalidFormat(format!(
                "file size {} is not a multiple of {PHOTON_RECORD_SIZE} (file: {})",
                self.reader.len(),
                self.reader.path().display()
            )));
        }
        Ok(())
    }

    /// Decodes every photon into a sky-stage event list.
    ///
    /// # Errors
    /// Returns an error if the file size is not a whole number of records.
    pub fn read_events(&self) -> Result<EventList> {
        self.check_size()?;
        let records: Vec<[f64; 3]> = self
            .reader
            .as_bytes()
            .par_chunks_exact(PHOTON_RECORD_SIZE)
            .map(decode_record)
            .collect();

        let mut ra = Vec::with_capacity(records.len());
        let mut dec = Vec::with_capacity(records.len());
        let mut energy = Vec::with_capacity(records.len());
        for [r, d, e] in records {
            ra.push(r);
            dec.push(d);
            energy.push(e);
        }
        Ok(EventList::from_sky(ra, dec, energy)?)
    }

    /// Iterates over raw `(ra, dec, energy)` records.
    ///
    /// # Errors
    /// Returns an error if the file size is not a whole number of records.
    pub fn iter_records(&self) -> Result<impl Iterator<Item = [f64; 3]> + '_> {
        self.check_size()?;
        Ok(self
            .reader
            .as_bytes()
            .chunks_exact(PHOTON_RECORD_SIZE)
            .map(decode_record))
    }
}

fn decode_record(chunk: &[u8]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (value, bytes) in out.iter_mut().zip(chunk.chunks_exact(8)) {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        *value = f64::from_le_bytes(raw);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use xrsim_core::events::{DEC, ENERGY, RA};

    #[test]
    fn test_mapped_bytes_match_file() {
        let mut file = NamedTempFile::new().unwrap();
        let bytes = 2.5_f64.to_le_bytes();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mapped = MappedFileReader::open(file.path()).unwrap();
        assert_eq!(mapped.len(), 8);
        assert_eq!(mapped.as_bytes(), &bytes);
        assert_eq!(mapped.path(), file.path());
    }

    #[test]
    fn test_photon_list_decode() {
        let mut file = NamedTempFile::new().unwrap();
        for v in [30.0_f64, 45.0, 1.5, 30.5, 44.5, 6.25] {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let reader = PhotonListReader::open(file.path()).unwrap();
        assert_eq!(reader.photon_count(), 2);
        let events = reader.read_events().unwrap();
        assert_eq!(events.float(RA).unwrap(), &[30.0, 30.5]);
        assert_eq!(events.float(DEC).unwrap(), &[45.0, 44.5]);
        assert_eq!(events.float(ENERGY).unwrap(), &[1.5, 6.25]);
        assert_eq!(reader.iter_records().unwrap().count(), 2);
    }

    #[test]
    fn test_photon_list_empty() {
        let file = NamedTempFile::new().unwrap();
        let reader = PhotonListReader::open(file.path()).unwrap();
        assert_eq!(reader.file_size(), 0);
        assert!(reader.read_events().unwrap().is_empty());
    }

    #[test]
    fn test_photon_list_invalid_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 30]).unwrap(); // Not a multiple of 24
        file.flush().unwrap();

        let reader = PhotonListReader::open(file.path()).unwrap();
        assert!(matches!(reader.read_events(), Err(Error::InvalidFormat(_))));
    }
}
