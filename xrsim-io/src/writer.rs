//! Writers for event lists, parameters and derived products.

use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use xrsim_core::events::{DEC, ENERGY, RA};
use xrsim_core::{Column, EventList, EventParameters};
use xrsim_pipeline::{RadialProfile, SourceRecord, Spectrum};

/// Writer for simulated event output.
///
/// Writes event lists as CSV, with one column per field, or as binary
/// photon lists.
pub struct EventFileWriter {
    writer: BufWriter<File>,
}

impl EventFileWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes events as CSV. The header lists the field names.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_events_csv(&mut self, events: &EventList) -> Result<()> {
        let columns: Vec<(&str, &Column)> = events.columns().collect();
        let header: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        writeln!(self.writer, "{}", header.join(","))?;

        for i in 0..events.len() {
            let row: Vec<String> = columns
                .iter()
                .map(|(_, column)| match column {
                    Column::Float(v) => v[i].to_string(),
                    Column::Int(v) => v[i].to_string(),
                })
                .collect();
            writeln!(self.writer, "{}", row.join(","))?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the sky fields of events as a binary photon list.
    ///
    /// Format: for each photon f64 (ra) + f64 (dec) + f64 (energy), little
    /// endian. Total: 24 bytes per photon
    ///
    /// # Errors
    /// Returns an error if a sky field is missing or writing fails.
    pub fn write_photons_binary(&mut self, events: &EventList) -> Result<()> {
        let ra = events.float(RA)?;
        let dec = events.float(DEC)?;
        let energy = events.float(ENERGY)?;
        for ((r, d), e) in ra.iter().zip(dec).zip(energy) {
            self.writer.write_all(&r.to_le_bytes())?;
            self.writer.write_all(&d.to_le_bytes())?;
            self.writer.write_all(&e.to_le_bytes())?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a binary photon list.
///
/// # Errors
/// Returns an error if the file cannot be written or a sky field is missing.
pub fn write_photon_list<P: AsRef<Path>>(path: P, events: &EventList) -> Result<()> {
    EventFileWriter::create(path)?.write_photons_binary(events)
}

/// Writes events as CSV.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_events_csv<P: AsRef<Path>>(path: P, events: &EventList) -> Result<()> {
    EventFileWriter::create(path)?.write_events_csv(events)
}

/// Writes the event parameters as a pretty-printed JSON sidecar.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_parameters_json<P: AsRef<Path>>(path: P, params: &EventParameters) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, params)?;
    writer.flush()?;
    Ok(())
}

/// Reads event parameters from a JSON sidecar.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_parameters_json<P: AsRef<Path>>(path: P) -> Result<EventParameters> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Writes a table of simulated background sources.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_sources_csv<P: AsRef<Path>>(path: P, sources: &[SourceRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "ra,dec,flux_0.5_2.0_keV")?;
    for s in sources {
        writeln!(writer, "{},{},{}", s.ra, s.dec, s.flux)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a counts spectrum as `channel,counts` rows.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_spectrum_csv<P: AsRef<Path>>(path: P, spectrum: &Spectrum) -> Result<()> {
    if spectrum.channels.len() != spectrum.counts.len() {
        return Err(Error::InvalidFormat(format!(
            "spectrum has {} channels but {} counts",
            spectrum.channels.len(),
            spectrum.counts.len()
        )));
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# exposure_time = {}", spectrum.exposure_time)?;
    writeln!(writer, "{},counts", spectrum.channel_type)?;
    for (ch, count) in spectrum.channels.iter().zip(&spectrum.counts) {
        writeln!(writer, "{ch},{count}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a radial profile, one annulus per row.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_profile_csv<P: AsRef<Path>>(path: P, profile: &RadialProfile) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "rlo_arcsec,rhi_arcsec,counts,area_arcsec2,surface_brightness,error"
    )?;
    for (k, w) in profile.edges.windows(2).enumerate() {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            w[0],
            w[1],
            profile.counts[k],
            profile.areas[k],
            profile.surface_brightness[k],
            profile.errors[k]
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use xrsim_core::{InstrumentSpec, RedistributionMatrix, SkyPosition};

    #[test]
    fn test_write_events_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut events =
            EventList::from_sky(vec![1.5, 10.25], vec![2.5, 20.75], vec![1.0, 2.0]).unwrap();
        events.insert_int("PI", vec![7, 8]).unwrap();

        write_events_csv(file.path(), &events).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("PI,dec,energy,ra"));
        assert_eq!(lines.next(), Some("7,2.5,1,1.5"));
        assert_eq!(lines.next(), Some("8,20.75,2,10.25"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_write_photons_binary() {
        let file = NamedTempFile::new().unwrap();
        let events = EventList::from_sky(vec![1.5], vec![2.5], vec![3.5]).unwrap();

        write_photon_list(file.path(), &events).unwrap();

        let data = std::fs::read(file.path()).unwrap();
        // 3 * 8 (f64) = 24 bytes
        assert_eq!(data.len(), 24);
        assert_eq!(data[16..24], 3.5_f64.to_le_bytes());
    }

    #[test]
    fn test_parameters_sidecar_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let spec = InstrumentSpec {
            name: "test".to_string(),
            arf: "a.arf".into(),
            rmf: "a.rmf".into(),
            bkgnd: None,
            fov: 20.0,
            num_pixels: 100,
            focal_length: 10.0,
            dither: true,
            psf: None,
            aimpt_coords: [0.0, 0.0],
        };
        let arf = xrsim_core::EffectiveArea::flat(0.1, 10.0, 10, 100.0).unwrap();
        let rmf =
            RedistributionMatrix::diagonal("PHA", arf.elo().to_vec(), arf.ehi().to_vec()).unwrap();
        let params =
            EventParameters::new(&spec, &arf, &rmf, 5.0e4, SkyPosition::new(1.0, -2.0), 30.0);

        write_parameters_json(file.path(), &params).unwrap();
        let back = read_parameters_json(file.path()).unwrap();
        assert_eq!(back.channel_type, "PHA");
        assert_eq!(back.chan_lim, params.chan_lim);
        assert_eq!(back.num_pixels, 100);
        assert_eq!(back.sky_center, params.sky_center);
        approx::assert_relative_eq!(back.plate_scale, params.plate_scale, max_relative = 1e-12);
    }

    #[test]
    fn test_write_sources_and_spectrum() {
        let sources = NamedTempFile::new().unwrap();
        write_sources_csv(
            sources.path(),
            &[SourceRecord {
                ra: 1.0,
                dec: 2.0,
                flux: 3.0e-15,
            }],
        )
        .unwrap();
        let content = std::fs::read_to_string(sources.path()).unwrap();
        assert!(content.contains("ra,dec,flux_0.5_2.0_keV"));
        assert!(content.contains("1,2,0.000000000000003"));

        let spectrum_file = NamedTempFile::new().unwrap();
        let spectrum = Spectrum {
            channel_type: "PI".to_string(),
            channels: vec![1, 2],
            counts: vec![5, 0],
            exposure_time: 10.0,
        };
        write_spectrum_csv(spectrum_file.path(), &spectrum).unwrap();
        let content = std::fs::read_to_string(spectrum_file.path()).unwrap();
        assert!(content.contains("PI,counts\n1,5\n2,0\n"));
    }
}
