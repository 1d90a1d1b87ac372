//! HDF5 event and image output.
//!
//! Events go to `entry/events` (one dataset per field), images to
//! `entry/image/counts`. Event parameters are stored as attributes of the
//! `entry` group so that both kinds of file carry the WCS and channel
//! layout.

use crate::{Error, Result};
use hdf5::types::{H5Type, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, Array2, ArrayView1};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use xrsim_core::events::{CHIPX, CHIPY, DEC, DETX, DETY, ENERGY, RA, TIME, XPIX, YPIX};
use xrsim_core::{Column, EventList, EventParameters, SkyPosition};

const FORMAT_VERSION: &str = "0.1";

/// Dataset layout options.
#[derive(Clone, Debug)]
pub struct EventWriteOptions {
    pub chunk_events: usize,
    pub compression: Option<u8>,
    pub shuffle: bool,
}

impl Default for EventWriteOptions {
    fn default() -> Self {
        Self {
            chunk_events: 100_000,
            compression: Some(1),
            shuffle: true,
        }
    }
}

/// Writes an event list and its parameters.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_events_hdf5<P: AsRef<Path>>(
    path: P,
    events: &EventList,
    params: &EventParameters,
    options: &EventWriteOptions,
) -> Result<()> {
    let file = File::create(path)?;
    set_attr_str_file(&file, "xrsim_format_version", FORMAT_VERSION)?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    write_parameter_attrs(&entry, params)?;

    let group = entry.create_group("events")?;
    set_attr_str_group(&group, "NX_class", "NXevent_data")?;
    group
        .new_attr::<u64>()
        .create("num_events")?
        .write_scalar(&(events.len() as u64))?;

    let chunk = options.chunk_events.max(1);
    for (name, column) in events.columns() {
        let dataset = match column {
            Column::Float(values) => {
                let ds = create_extendable_dataset::<f64>(
                    &group,
                    name,
                    chunk,
                    options.compression,
                    options.shuffle,
                )?;
                append_slice(&ds, 0, values)?;
                ds
            }
            Column::Int(values) => {
                let ds = create_extendable_dataset::<i64>(
                    &group,
                    name,
                    chunk,
                    options.compression,
                    options.shuffle,
                )?;
                append_slice(&ds, 0, values)?;
                ds
            }
        };
        if let Some(units) = field_units(name, &params.channel_type) {
            set_dataset_units(&dataset, units)?;
        }
    }
    Ok(())
}

/// Reads an event list and its parameters.
///
/// # Errors
/// Returns an error if HDF5 I/O fails or the layout is not recognized.
pub fn read_events_hdf5<P: AsRef<Path>>(path: P) -> Result<(EventList, EventParameters)> {
    let file = File::open(path)?;
    let entry = file.group("entry")?;
    let params = read_parameter_attrs(&entry)?;
    let group = entry.group("events")?;

    let mut events = EventList::new();
    for name in group.member_names()? {
        let dataset = group.dataset(&name)?;
        match dataset.dtype()?.to_descriptor()? {
            TypeDescriptor::Float(_) => {
                events.insert_float(&name, dataset.read_raw::<f64>()?)?;
            }
            TypeDescriptor::Integer(_) => {
                events.insert_int(&name, dataset.read_raw::<i64>()?)?;
            }
            other => {
                return Err(Error::InvalidFormat(format!(
                    "field {name} has unsupported type {other:?}"
                )))
            }
        }
    }
    Ok((events, params))
}

/// Writes a counts image with the observation parameters.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_image_hdf5<P: AsRef<Path>>(
    path: P,
    image: &Array2<f64>,
    params: &EventParameters,
    compression: Option<u8>,
) -> Result<()> {
    let file = File::create(path)?;
    set_attr_str_file(&file, "xrsim_format_version", FORMAT_VERSION)?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    write_parameter_attrs(&entry, params)?;

    let group = entry.create_group("image")?;
    set_attr_str_group(&group, "NX_class", "NXdata")?;
    set_attr_str_group(&group, "signal", "counts")?;

    let mut builder = group.new_dataset::<f64>().shape(image.dim());
    if let Some(level) = compression {
        let (rows, cols) = image.dim();
        builder = builder.chunk((rows.max(1), cols.max(1))).deflate(level);
    }
    let dataset = builder.create("counts")?;
    dataset.write(image.view())?;
    set_dataset_units(&dataset, "counts")?;
    Ok(())
}

/// Reads a counts image.
///
/// # Errors
/// Returns an error if HDF5 I/O fails or the dataset is not 2-D.
pub fn read_image_hdf5<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let file = File::open(path)?;
    let dataset = file.group("entry")?.group("image")?.dataset("counts")?;
    if dataset.ndim() != 2 {
        return Err(Error::InvalidFormat(
            "counts dataset must be 2-D (y, x)".to_string(),
        ));
    }
    Ok(dataset.read_2d::<f64>()?)
}

fn field_units(name: &str, channel_type: &str) -> Option<&'static str> {
    match name {
        n if n == ENERGY => Some("keV"),
        n if n == TIME => Some("s"),
        n if n == RA || n == DEC => Some("deg"),
        n if [CHIPX, CHIPY, DETX, DETY, XPIX, YPIX].contains(&n) => Some("pixel"),
        n if n == channel_type => Some("chan"),
        _ => None,
    }
}

fn write_parameter_attrs(group: &Group, params: &EventParameters) -> Result<()> {
    for (name, value) in [
        ("exposure_time", params.exposure_time),
        ("plate_scale", params.plate_scale),
        ("roll_angle", params.roll_angle),
        ("fov", params.fov),
    ] {
        group.new_attr::<f64>().create(name)?.write_scalar(&value)?;
    }
    for (name, value) in [
        ("num_pixels", params.num_pixels),
        ("nchan", params.nchan),
    ] {
        group
            .new_attr::<u64>()
            .create(name)?
            .write_scalar(&(value as u64))?;
    }
    let arf = params.arf.to_string_lossy();
    let rmf = params.rmf.to_string_lossy();
    for (name, value) in [
        ("channel_type", params.channel_type.as_str()),
        ("telescope", params.telescope.as_str()),
        ("instrument", params.instrument.as_str()),
        ("mission", params.mission.as_str()),
        ("arf", arf.as_ref()),
        ("rmf", rmf.as_ref()),
    ] {
        set_attr_str_group(group, name, value)?;
    }
    set_attr_array(group, "sky_center", &[params.sky_center.ra, params.sky_center.dec])?;
    set_attr_array(group, "pix_center", &params.pix_center)?;
    set_attr_array(group, "chan_lim", &params.chan_lim)?;
    Ok(())
}

fn read_parameter_attrs(group: &Group) -> Result<EventParameters> {
    let sky_center = read_attr_pair::<f64>(group, "sky_center")?;
    Ok(EventParameters {
        exposure_time: group.attr("exposure_time")?.read_scalar()?,
        arf: PathBuf::from(read_attr_string(group, "arf")?),
        rmf: PathBuf::from(read_attr_string(group, "rmf")?),
        sky_center: SkyPosition::from(sky_center),
        pix_center: read_attr_pair(group, "pix_center")?,
        num_pixels: read_attr_usize(group, "num_pixels")?,
        plate_scale: group.attr("plate_scale")?.read_scalar()?,
        channel_type: read_attr_string(group, "channel_type")?,
        telescope: read_attr_string(group, "telescope")?,
        instrument: read_attr_string(group, "instrument")?,
        mission: read_attr_string(group, "mission")?,
        nchan: read_attr_usize(group, "nchan")?,
        roll_angle: group.attr("roll_angle")?.read_scalar()?,
        fov: group.attr("fov")?.read_scalar()?,
        chan_lim: read_attr_pair(group, "chan_lim")?,
    })
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    chunk_events: usize,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset> {
    let mut builder = group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((chunk_events,));

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_array<T: H5Type>(group: &Group, name: &str, values: &[T]) -> Result<()> {
    let attr = group
        .new_attr::<T>()
        .shape((values.len(),))
        .create(name)?;
    attr.write(ArrayView1::from(values))?;
    Ok(())
}

fn read_attr_pair<T: H5Type + Copy>(group: &Group, name: &str) -> Result<[T; 2]> {
    let values = group.attr(name)?.read_raw::<T>()?;
    match values.as_slice() {
        [a, b] => Ok([*a, *b]),
        _ => Err(Error::InvalidFormat(format!(
            "attribute {name} must hold 2 values, found {}",
            values.len()
        ))),
    }
}

fn read_attr_usize(group: &Group, name: &str) -> Result<usize> {
    let value: u64 = group.attr(name)?.read_scalar()?;
    usize::try_from(value)
        .map_err(|_| Error::InvalidFormat(format!("attribute {name} out of range: {value}")))
}

fn read_attr_string(group: &Group, name: &str) -> Result<String> {
    let value: VarLenUnicode = group.attr(name)?.read_scalar()?;
    Ok(value.to_string())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use xrsim_core::{EffectiveArea, InstrumentSpec, RedistributionMatrix};

    fn params() -> EventParameters {
        let spec = InstrumentSpec {
            name: "test".to_string(),
            arf: "a.arf".into(),
            rmf: "a.rmf".into(),
            bkgnd: None,
            fov: 20.0,
            num_pixels: 64,
            focal_length: 10.0,
            dither: true,
            psf: None,
            aimpt_coords: [0.0, 0.0],
        };
        let arf = EffectiveArea::flat(0.5, 2.5, 4, 100.0).unwrap();
        let rmf =
            RedistributionMatrix::diagonal("PI", arf.elo().to_vec(), arf.ehi().to_vec()).unwrap();
        EventParameters::new(&spec, &arf, &rmf, 1.0e3, SkyPosition::new(30.0, 45.0), 12.0)
    }

    #[test]
    fn test_hdf5_events_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut events = EventList::new();
        events.insert_float(ENERGY, vec![1.0, 2.0, 3.0]).unwrap();
        events.insert_float(XPIX, vec![10.5, 20.5, 30.5]).unwrap();
        events.insert_int("PI", vec![1, 2, 3]).unwrap();
        let params = params();

        write_events_hdf5(file.path(), &events, &params, &EventWriteOptions::default()).unwrap();
        let (back, back_params) = read_events_hdf5(file.path()).unwrap();
        assert_eq!(back, events);
        assert_eq!(back_params, params);
    }

    #[test]
    fn test_hdf5_empty_events() {
        let file = NamedTempFile::new().unwrap();
        let mut events = EventList::new();
        events.insert_float(ENERGY, Vec::new()).unwrap();
        write_events_hdf5(file.path(), &events, &params(), &EventWriteOptions::default()).unwrap();
        let (back, _) = read_events_hdf5(file.path()).unwrap();
        assert!(back.is_empty());
        assert!(back.contains(ENERGY));
    }

    #[test]
    fn test_hdf5_image_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut image = Array2::<f64>::zeros((4, 3));
        image[[1, 2]] = 5.0;
        write_image_hdf5(file.path(), &image, &params(), Some(1)).unwrap();
        assert_eq!(read_image_hdf5(file.path()).unwrap(), image);
    }
}
