//! Sky to detector geometry.
//!
//! Photons are projected onto the sky pixel grid with a gnomonic (TAN)
//! projection, dithered, rotated into the detector frame by the roll angle,
//! scattered by the PSF and binned onto chip pixels. Photons that land
//! outside `[1, num_pixels]` on either axis are dropped.

use crate::psf::Psf;
use log::{info, warn};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;
use xrsim_core::events::{CHIPX, CHIPY, DEC, DETX, DETY, ENERGY, RA, XPIX, YPIX};
use xrsim_core::{Error, EventList, InstrumentSpec, Result, SkyPosition};

/// Gnomonic projection with the sky WCS conventions used for event files:
/// RA increases to the left, pixel coordinates are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TanProjection {
    crval: SkyPosition,
    crpix: [f64; 2],
    cdelt: [f64; 2],
}

impl TanProjection {
    /// Projection centered on `center`, with `plate_scale` degrees per pixel
    /// and reference pixel `crpix`.
    #[must_use]
    pub fn new(center: SkyPosition, crpix: [f64; 2], plate_scale: f64) -> Self {
        Self {
            crval: center,
            crpix,
            cdelt: [-plate_scale, plate_scale],
        }
    }

    /// Sky WCS of an instrument pointed at `center`.
    #[must_use]
    pub fn for_instrument(spec: &InstrumentSpec, center: SkyPosition) -> Self {
        let c = spec.pix_center();
        Self::new(center, [c, c], spec.plate_scale_deg())
    }

    #[must_use]
    pub fn crpix(&self) -> [f64; 2] {
        self.crpix
    }

    /// Converts sky coordinates (degrees) to pixel coordinates.
    ///
    /// Points on or behind the tangent plane horizon map to NaN.
    #[must_use]
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (sin_d0, cos_d0) = self.crval.dec.to_radians().sin_cos();
        let (sin_d, cos_d) = dec.to_radians().sin_cos();
        let (sin_da, cos_da) = (ra - self.crval.ra).to_radians().sin_cos();

        let cos_c = sin_d0 * sin_d + cos_d0 * cos_d * cos_da;
        if cos_c <= 0.0 {
            return (f64::NAN, f64::NAN);
        }
        let xi = (cos_d * sin_da / cos_c).to_degrees();
        let eta = ((cos_d0 * sin_d - sin_d0 * cos_d * cos_da) / cos_c).to_degrees();
        (
            self.crpix[0] + xi / self.cdelt[0],
            self.crpix[1] + eta / self.cdelt[1],
        )
    }

    /// Converts pixel coordinates to sky coordinates (degrees, RA in [0, 360)).
    #[must_use]
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let xi = ((x - self.crpix[0]) * self.cdelt[0]).to_radians();
        let eta = ((y - self.crpix[1]) * self.cdelt[1]).to_radians();
        let rho = xi.hypot(eta);
        if rho == 0.0 {
            return (self.crval.ra, self.crval.dec);
        }
        let (sin_d0, cos_d0) = self.crval.dec.to_radians().sin_cos();
        let c = rho.atan();
        let (sin_c, cos_c) = c.sin_cos();
        let dec = (cos_c * sin_d0 + eta * sin_c * cos_d0 / rho).asin();
        let dra = (xi * sin_c).atan2(rho * cos_d0 * cos_c - eta * sin_d0 * sin_c);
        let ra = (self.crval.ra + dra.to_degrees()).rem_euclid(360.0);
        (ra, dec.to_degrees())
    }
}

/// Roll rotation between the sky pixel frame and the detector frame.
///
/// The matrix `[[sin θ, -cos θ], [-cos θ, -sin θ]]` is its own inverse, so
/// the same transform maps detector offsets back to sky pixel offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollRotation {
    sin: f64,
    cos: f64,
}

impl RollRotation {
    /// Rotation for a roll angle in degrees.
    #[must_use]
    pub fn new(roll_angle_deg: f64) -> Self {
        let (sin, cos) = roll_angle_deg.to_radians().sin_cos();
        Self { sin, cos }
    }

    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.sin * x - self.cos * y, -self.cos * x - self.sin * y)
    }
}

/// Shape of the pointing dither pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DitherShape {
    /// Uniform in a square whose side is the dither size.
    #[default]
    Square,
    /// Uniform in a disk whose radius is the dither size.
    Circle,
}

impl FromStr for DitherShape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "square" => Ok(DitherShape::Square),
            "circle" => Ok(DitherShape::Circle),
            other => Err(Error::ConfigError(format!(
                "unknown dither shape {other}, expected \"square\" or \"circle\""
            ))),
        }
    }
}

impl fmt::Display for DitherShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DitherShape::Square => write!(f, "square"),
            DitherShape::Circle => write!(f, "circle"),
        }
    }
}

/// Per-photon dither with its size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dither {
    pub shape: DitherShape,
    pub size: f64,
}

impl Dither {
    /// Draws `n` offsets. All x offsets are drawn before the y offsets
    /// (square), or all radii before all angles (circle).
    pub fn offsets<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> (Vec<f64>, Vec<f64>) {
        match self.shape {
            DitherShape::Square => {
                let x = (0..n)
                    .map(|_| self.size * rng.gen_range(-0.5..0.5))
                    .collect();
                let y = (0..n)
                    .map(|_| self.size * rng.gen_range(-0.5..0.5))
                    .collect();
                (x, y)
            }
            DitherShape::Circle => {
                let r: Vec<f64> = (0..n)
                    .map(|_| self.size * rng.gen::<f64>().sqrt())
                    .collect();
                let theta: Vec<f64> = (0..n).map(|_| TAU * rng.gen::<f64>()).collect();
                r.iter()
                    .zip(&theta)
                    .map(|(r, t)| {
                        let (s, c) = t.sin_cos();
                        (r * c, r * s)
                    })
                    .unzip()
            }
        }
    }
}

/// Rounds to the nearest integer, ties to even.
#[must_use]
pub fn round_half_even(x: f64) -> f64 {
    x.round_ties_even()
}

/// Returns true if a chip coordinate lies on an `num_pixels`-wide chip.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn on_chip(chip: f64, num_pixels: usize) -> bool {
    chip >= 1.0 && chip <= num_pixels as f64
}

/// Detector-frame coordinate of a chip pixel with a fresh sub-pixel jitter.
pub fn chip_to_detector<R: Rng + ?Sized>(chip: f64, center: f64, rng: &mut R) -> f64 {
    round_half_even(chip - center + rng.gen_range(-0.5..0.5))
}

/// Geometry of one observation: sky WCS, roll, dither and chip size.
#[derive(Debug, Clone)]
pub struct DetectorGeometry {
    projection: TanProjection,
    rotation: RollRotation,
    dither: Option<Dither>,
    num_pixels: usize,
    center: [f64; 2],
}

impl DetectorGeometry {
    /// Builds the geometry of an instrument pointed at `sky_center`.
    ///
    /// `dither_size` is in arcseconds; dither is only applied when the
    /// instrument enables it.
    #[must_use]
    pub fn new(
        spec: &InstrumentSpec,
        sky_center: SkyPosition,
        roll_angle: f64,
        dither_shape: DitherShape,
        dither_size: f64,
    ) -> Self {
        let projection = TanProjection::for_instrument(spec, sky_center);
        let dither = spec.dither.then(|| Dither {
            shape: dither_shape,
            size: dither_size / spec.plate_scale_arcsec(),
        });
        Self {
            projection,
            rotation: RollRotation::new(roll_angle),
            dither,
            num_pixels: spec.num_pixels,
            center: projection.crpix(),
        }
    }

    #[must_use]
    pub fn projection(&self) -> &TanProjection {
        &self.projection
    }

    #[must_use]
    pub fn rotation(&self) -> RollRotation {
        self.rotation
    }

    #[must_use]
    pub fn dither(&self) -> Option<Dither> {
        self.dither
    }

    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.num_pixels
    }

    /// Assigns chip, detector and sky pixel coordinates to sky photons.
    ///
    /// The `ra` and `dec` fields are replaced by `chipx`, `chipy`, `detx`,
    /// `dety`, `xpix` and `ypix`. Photons falling off the chip are removed
    /// from every field. Returns the number of surviving photons.
    ///
    /// Detector coordinates of surviving photons are re-derived from their
    /// chip pixel with a second, independent sub-pixel jitter, so chip to
    /// detector is not an exact inverse of the forward path. This double
    /// jitter is kept as is for compatibility with existing event files,
    /// but it is suspect.
    ///
    /// # Errors
    /// Returns an error if a required field is missing or the PSF cannot
    /// scatter every photon.
    pub fn pixelize<R: Rng + ?Sized>(
        &self,
        events: &mut EventList,
        psf: Option<&Psf>,
        rng: &mut R,
    ) -> Result<usize> {
        let [cx, cy] = self.center;
        let (mut xpix, mut ypix): (Vec<f64>, Vec<f64>) = events
            .float(RA)?
            .par_iter()
            .zip(events.float(DEC)?.par_iter())
            .map(|(&ra, &dec)| {
                let (x, y) = self.projection.world_to_pixel(ra, dec);
                (x - cx, y - cy)
            })
            .unzip();
        events.remove(RA);
        events.remove(DEC);
        let n_evt = xpix.len();

        let (x_offset, y_offset) = match self.dither {
            Some(dither) => dither.offsets(n_evt, rng),
            None => (vec![0.0; n_evt], vec![0.0; n_evt]),
        };
        for i in 0..n_evt {
            xpix[i] -= x_offset[i];
            ypix[i] -= y_offset[i];
        }

        let (mut detx, mut dety): (Vec<f64>, Vec<f64>) = xpix
            .iter()
            .zip(&ypix)
            .map(|(&x, &y)| self.rotation.apply(x, y))
            .unzip();

        if let Some(psf) = psf {
            psf.scatter(&mut detx, &mut dety, events.float(ENERGY)?, rng)?;
        }

        let chipx: Vec<f64> = detx.iter().map(|d| round_half_even(d + cx)).collect();
        let chipy: Vec<f64> = dety.iter().map(|d| round_half_even(d + cy)).collect();
        let keep: Vec<bool> = chipx
            .iter()
            .zip(&chipy)
            .map(|(&x, &y)| on_chip(x, self.num_pixels) && on_chip(y, self.num_pixels))
            .collect();
        let n_keep = keep.iter().filter(|&&k| k).count();
        info!(
            "{} events were rejected because they fall outside the field of view.",
            n_evt - n_keep
        );

        events.insert_float(CHIPX, chipx)?;
        events.insert_float(CHIPY, chipy)?;
        events.retain_mask(&keep)?;
        if n_keep == 0 {
            warn!("No events are within the field of view for this source!!!");
        }

        let kept = |v: Vec<f64>| -> Vec<f64> {
            v.into_iter()
                .zip(&keep)
                .filter_map(|(x, &k)| k.then_some(x))
                .collect()
        };
        let x_offset = kept(x_offset);
        let y_offset = kept(y_offset);

        let detx: Vec<f64> = events
            .float(CHIPX)?
            .iter()
            .map(|&c| chip_to_detector(c, cx, rng))
            .collect();
        let dety: Vec<f64> = events
            .float(CHIPY)?
            .iter()
            .map(|&c| chip_to_detector(c, cy, rng))
            .collect();

        let (xpix, ypix): (Vec<f64>, Vec<f64>) = detx
            .iter()
            .zip(&dety)
            .zip(x_offset.iter().zip(&y_offset))
            .map(|((&dx, &dy), (&ox, &oy))| {
                let (px, py) = self.rotation.apply(dx, dy);
                (px + cx + ox, py + cy + oy)
            })
            .unzip();

        events.insert_float(DETX, detx)?;
        events.insert_float(DETY, dety)?;
        events.insert_float(XPIX, xpix)?;
        events.insert_float(YPIX, ypix)?;
        Ok(n_keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn spec(dither: bool) -> InstrumentSpec {
        InstrumentSpec {
            name: "test".to_string(),
            arf: PathBuf::from("a.arf"),
            rmf: PathBuf::from("a.rmf"),
            bkgnd: None,
            fov: 20.0,
            num_pixels: 1200,
            focal_length: 10.0,
            dither,
            psf: None,
            aimpt_coords: [0.0, 0.0],
        }
    }

    #[test]
    fn test_projection_center_and_orientation() {
        let wcs = TanProjection::new(SkyPosition::new(30.0, 45.0), [600.5, 600.5], 1.0 / 3600.0);
        let (x, y) = wcs.world_to_pixel(30.0, 45.0);
        assert_relative_eq!(x, 600.5);
        assert_relative_eq!(y, 600.5);
        // east is to the left, north is up
        let (x, _) = wcs.world_to_pixel(30.01, 45.0);
        assert!(x < 600.5);
        let (_, y) = wcs.world_to_pixel(30.0, 45.01);
        assert!(y > 600.5);
    }

    #[test]
    fn test_projection_inverse() {
        let wcs = TanProjection::new(SkyPosition::new(359.9, -30.0), [100.5, 100.5], 0.01);
        for &(ra, dec) in &[(359.5, -30.2), (0.3, -29.7), (359.9, -30.0)] {
            let (x, y) = wcs.world_to_pixel(ra, dec);
            let (ra2, dec2) = wcs.pixel_to_world(x, y);
            assert_relative_eq!(ra2, ra, epsilon = 1e-9);
            assert_relative_eq!(dec2, dec, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_far_side_is_nan() {
        let wcs = TanProjection::new(SkyPosition::new(0.0, 0.0), [1.0, 1.0], 0.01);
        let (x, y) = wcs.world_to_pixel(180.0, 0.0);
        assert!(x.is_nan() && y.is_nan());
    }

    #[test]
    fn test_roll_rotation_is_involution() {
        for angle in [0.0, 17.0, 90.0, 233.0] {
            let rot = RollRotation::new(angle);
            let (x, y) = rot.apply(3.0, -4.5);
            let (x2, y2) = rot.apply(x, y);
            assert_relative_eq!(x2, 3.0, epsilon = 1e-12);
            assert_relative_eq!(y2, -4.5, epsilon = 1e-12);
        }
        let (x, y) = RollRotation::new(0.0).apply(1.0, 0.0);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, -1.0);
    }

    #[test]
    fn test_dither_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let square = Dither {
            shape: DitherShape::Square,
            size: 8.0,
        };
        let (x, y) = square.offsets(1000, &mut rng);
        assert!(x.iter().chain(&y).all(|v| v.abs() <= 4.0));
        let circle = Dither {
            shape: DitherShape::Circle,
            size: 8.0,
        };
        let (x, y) = circle.offsets(1000, &mut rng);
        assert!(x.iter().zip(&y).all(|(a, b)| a.hypot(*b) <= 8.0 + 1e-12));
    }

    #[test]
    fn test_dither_shape_parsing() {
        assert_eq!("Circle".parse::<DitherShape>().unwrap(), DitherShape::Circle);
        assert_eq!("square".parse::<DitherShape>().unwrap(), DitherShape::Square);
        assert!("hexagon".parse::<DitherShape>().is_err());
    }

    #[test]
    fn test_chip_boundaries() {
        assert!(!on_chip(0.0, 1200));
        assert!(on_chip(1.0, 1200));
        assert!(on_chip(1200.0, 1200));
        assert!(!on_chip(1201.0, 1200));
        assert_relative_eq!(round_half_even(0.5), 0.0);
        assert_relative_eq!(round_half_even(1.5), 2.0);
        assert_relative_eq!(round_half_even(-2.5), -2.0);
    }

    #[test]
    fn test_chip_detector_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let center = 600.5;
        for chip in [1.0, 2.0, 600.0, 601.0, 1199.0, 1200.0] {
            let det = chip_to_detector(chip, center, &mut rng);
            let back = round_half_even(det + center);
            assert!((back - chip).abs() <= 1.0);
        }
    }

    #[test]
    fn test_pixelize_center_source() {
        let spec = spec(false);
        let geom = DetectorGeometry::new(
            &spec,
            SkyPosition::new(30.0, 45.0),
            0.0,
            DitherShape::Square,
            16.0,
        );
        let mut events =
            EventList::from_sky(vec![30.0; 50], vec![45.0; 50], vec![1.0; 50]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let n = geom.pixelize(&mut events, None, &mut rng).unwrap();
        assert_eq!(n, 50);
        assert!(!events.contains(RA));
        assert!(!events.contains(DEC));
        for name in [CHIPX, CHIPY, DETX, DETY, XPIX, YPIX] {
            assert_eq!(events.float(name).unwrap().len(), 50);
        }
        // pixel offset 0 rounds half-even from 600.5
        assert!(events.float(CHIPX).unwrap().iter().all(|&c| c == 600.0));
        assert!(events
            .float(XPIX)
            .unwrap()
            .iter()
            .all(|&x| (x - 600.5).abs() <= 1.0));
    }

    #[test]
    fn test_pixelize_clips_outside_fov() {
        let spec = spec(true);
        let geom = DetectorGeometry::new(
            &spec,
            SkyPosition::new(30.0, 45.0),
            45.0,
            DitherShape::Circle,
            16.0,
        );
        // second photon is a degree away, far outside a 20 arcmin field
        let mut events =
            EventList::from_sky(vec![30.0, 30.0], vec![45.0, 46.0], vec![1.0, 2.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let n = geom.pixelize(&mut events, None, &mut rng).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events.float(ENERGY).unwrap(), &[1.0]);

        let mut far = EventList::from_sky(vec![90.0], vec![0.0], vec![1.0]).unwrap();
        assert_eq!(geom.pixelize(&mut far, None, &mut rng).unwrap(), 0);
        assert!(far.is_empty());
    }
}
