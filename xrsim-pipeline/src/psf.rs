//! Point-spread function scattering.
//!
//! All PSF kinds share one entry point, [`Psf::scatter`], which displaces
//! detector coordinates in place.

use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use xrsim_core::constants::SIGMA_TO_FWHM;
use xrsim_core::{
    Error, InstrumentRegistry, InstrumentSpec, PsfImage, PsfImageSet, PsfSpec, Result,
};

/// A PSF image together with its pixel scale in detector pixels.
#[derive(Debug, Clone)]
pub struct ScaledImage {
    image: PsfImage,
    scale: [f64; 2],
}

impl ScaledImage {
    /// Wraps an image for a detector with `plate_scale_mm` millimeters per pixel.
    #[must_use]
    pub fn new(image: PsfImage, plate_scale_mm: f64) -> Self {
        let [sx, sy] = image.cdelt_mm();
        Self {
            image,
            scale: [sx / plate_scale_mm, sy / plate_scale_mm],
        }
    }

    /// Draws `n` offsets in detector pixels. Sub-pixel positions are uniform
    /// within the chosen image pixel.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> (Vec<f64>, Vec<f64>) {
        let pixels: Vec<(usize, usize)> = (0..n)
            .map(|_| self.image.pixel_for(rng.gen::<f64>()))
            .collect();
        let [cx, cy] = self.image.crpix;
        let dx = pixels
            .iter()
            .map(|&(col, _)| (col as f64 + rng.gen_range(0.5..1.5) - cx) * self.scale[0])
            .collect();
        let dy = pixels
            .iter()
            .map(|&(_, row)| (row as f64 + rng.gen_range(0.5..1.5) - cy) * self.scale[1])
            .collect();
        (dx, dy)
    }
}

/// Images binned by energy and off-axis radius.
#[derive(Debug, Clone)]
pub struct ImageGrid {
    /// Distinct image energies in keV, ascending.
    energies: Vec<f64>,
    /// Distinct squared off-axis radii in detector pixels², ascending.
    radii2: Vec<f64>,
    /// Each image with its (energy, radius) bin.
    images: Vec<(ScaledImage, usize, usize)>,
    /// Aim point in detector coordinates.
    center: [f64; 2],
}

impl ImageGrid {
    /// Builds the grid from an image set.
    ///
    /// Energies are taken to be in eV and converted to keV when every image
    /// energy exceeds 100.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if an image lacks its energy or
    /// off-axis angle.
    pub fn new(set: &PsfImageSet, spec: &InstrumentSpec) -> Result<Self> {
        let mut raw = Vec::with_capacity(set.images.len());
        for (i, image) in set.images.iter().enumerate() {
            let (Some(e), Some(r)) = (image.energy, image.offaxis) else {
                return Err(Error::ConfigError(format!(
                    "PSF image {i} in {} needs both an energy and an off-axis angle",
                    set.path().display()
                )));
            };
            raw.push((e, r));
        }

        let mut energies = distinct(raw.iter().map(|&(e, _)| e));
        let radii = distinct(raw.iter().map(|&(_, r)| r));
        let ie: Vec<usize> = raw.iter().map(|&(e, _)| position(&energies, e)).collect();
        let ir: Vec<usize> = raw.iter().map(|&(_, r)| position(&radii, r)).collect();

        if energies.iter().all(|&e| e > 100.0) {
            for e in &mut energies {
                *e *= 1.0e-3;
            }
        }
        let plate_scale_arcmin = spec.plate_scale_arcmin();
        let radii2 = radii
            .iter()
            .map(|r| (r / plate_scale_arcmin).powi(2))
            .collect();

        let plate_scale_mm = spec.plate_scale_mm();
        let images = set
            .images
            .iter()
            .zip(ie.into_iter().zip(ir))
            .map(|(image, (e, r))| (ScaledImage::new(image.clone(), plate_scale_mm), e, r))
            .collect();

        Ok(Self {
            energies,
            radii2,
            images,
            center: spec.aimpt_coords,
        })
    }

    #[must_use]
    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    #[must_use]
    pub fn radii2(&self) -> &[f64] {
        &self.radii2
    }
}

/// Sorted distinct values.
fn distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

fn position(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&v| v < value)
}

/// Index of the value in `sorted` closest to `value`.
#[must_use]
pub fn nearest_index(sorted: &[f64], value: f64) -> usize {
    let i = sorted.partition_point(|&v| v < value);
    if i == 0 {
        return 0;
    }
    if i == sorted.len() {
        return sorted.len() - 1;
    }
    if (value - sorted[i - 1]).abs() <= (sorted[i] - value).abs() {
        i - 1
    } else {
        i
    }
}

/// Point-spread function of an instrument.
#[derive(Debug, Clone)]
pub enum Psf {
    /// Independent normal offsets; `sigma` in detector pixels.
    Gaussian { sigma: f64 },
    /// Offsets drawn from a single PSF image.
    Image(ScaledImage),
    /// Offsets drawn from the image nearest in energy and off-axis radius.
    MultiImage(ImageGrid),
}

impl Psf {
    /// Gaussian PSF from its FWHM in arcseconds.
    #[must_use]
    pub fn gaussian(fwhm: f64, plate_scale_arcsec: f64) -> Self {
        Psf::Gaussian {
            sigma: fwhm / SIGMA_TO_FWHM / plate_scale_arcsec,
        }
    }

    /// Loads the PSF an instrument describes, resolving image files through
    /// the registry. Returns `None` for instruments without a PSF.
    ///
    /// # Errors
    /// Returns an error if an image file is missing or malformed.
    pub fn from_spec(spec: &InstrumentSpec, registry: &InstrumentRegistry) -> Result<Option<Self>> {
        let Some(psf) = &spec.psf else {
            return Ok(None);
        };
        let psf = match psf {
            PsfSpec::Gaussian { fwhm } => Psf::gaussian(*fwhm, spec.plate_scale_arcsec()),
            PsfSpec::Image { file, index } => {
                let set = PsfImageSet::from_file(registry.resolve_path(file)?)?;
                Psf::Image(ScaledImage::new(
                    set.image(*index)?.clone(),
                    spec.plate_scale_mm(),
                ))
            }
            PsfSpec::MultiImage { file } => {
                let set = PsfImageSet::from_file(registry.resolve_path(file)?)?;
                Psf::MultiImage(ImageGrid::new(&set, spec)?)
            }
        };
        Ok(Some(psf))
    }

    /// Scatters detector coordinates `x`, `y` of photons with `energy` (keV).
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the slices differ in length and
    /// [`Error::PsfMismatch`] if a multi-image PSF has no image for some
    /// photons.
    pub fn scatter<R: Rng + ?Sized>(
        &self,
        x: &mut [f64],
        y: &mut [f64],
        energy: &[f64],
        rng: &mut R,
    ) -> Result<()> {
        if y.len() != x.len() || energy.len() != x.len() {
            return Err(Error::LengthMismatch {
                field: "psf coordinates".to_string(),
                expected: x.len(),
                got: y.len().min(energy.len()),
            });
        }
        match self {
            Psf::Gaussian { sigma } => {
                if *sigma <= 0.0 {
                    return Ok(());
                }
                let normal = Normal::new(0.0, *sigma)
                    .map_err(|e| Error::ConfigError(format!("PSF sigma: {e}")))?;
                for v in x.iter_mut() {
                    *v += normal.sample(rng);
                }
                for v in y.iter_mut() {
                    *v += normal.sample(rng);
                }
            }
            Psf::Image(image) => {
                let (dx, dy) = image.sample(x.len(), rng);
                add_offsets(x, y, &dx, &dy, None);
            }
            Psf::MultiImage(grid) => {
                let [x0, y0] = grid.center;
                let bins: Vec<(usize, usize)> = x
                    .iter()
                    .zip(y.iter())
                    .zip(energy)
                    .map(|((&xi, &yi), &e)| {
                        let r2 = (xi - x0).powi(2) + (yi - y0).powi(2);
                        (
                            nearest_index(&grid.energies, e),
                            nearest_index(&grid.radii2, r2),
                        )
                    })
                    .collect();
                let mut n_out = 0;
                for (image, ie, ir) in &grid.images {
                    let idxs: Vec<usize> = bins
                        .iter()
                        .enumerate()
                        .filter_map(|(i, &b)| (b == (*ie, *ir)).then_some(i))
                        .collect();
                    n_out += idxs.len();
                    let (dx, dy) = image.sample(idxs.len(), rng);
                    add_offsets(x, y, &dx, &dy, Some(&idxs));
                }
                debug!("Multi-image PSF scattered {n_out} of {} photons", x.len());
                if n_out != x.len() {
                    return Err(Error::PsfMismatch {
                        received: x.len(),
                        scattered: n_out,
                    });
                }
            }
        }
        Ok(())
    }
}

fn add_offsets(x: &mut [f64], y: &mut [f64], dx: &[f64], dy: &[f64], idxs: Option<&[usize]>) {
    match idxs {
        Some(idxs) => {
            for (k, &i) in idxs.iter().enumerate() {
                x[i] += dx[k];
                y[i] += dy[k];
            }
        }
        None => {
            for (v, d) in x.iter_mut().zip(dx) {
                *v += d;
            }
            for (v, d) in y.iter_mut().zip(dy) {
                *v += d;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn spec() -> InstrumentSpec {
        InstrumentSpec {
            name: "test".to_string(),
            arf: PathBuf::from("a.arf"),
            rmf: PathBuf::from("a.rmf"),
            bkgnd: None,
            fov: 20.0,
            num_pixels: 1200,
            focal_length: 10.0,
            dither: false,
            psf: None,
            aimpt_coords: [0.0, 0.0],
        }
    }

    #[test]
    fn test_nearest_index() {
        let grid = [1.0, 2.0, 4.0];
        assert_eq!(nearest_index(&grid, -3.0), 0);
        assert_eq!(nearest_index(&grid, 1.4), 0);
        assert_eq!(nearest_index(&grid, 1.6), 1);
        assert_eq!(nearest_index(&grid, 3.1), 2);
        assert_eq!(nearest_index(&grid, 10.0), 2);
    }

    #[test]
    fn test_gaussian_sigma_and_spread() {
        let psf = Psf::gaussian(2.0 * SIGMA_TO_FWHM, 0.5);
        let Psf::Gaussian { sigma } = psf else {
            panic!("expected a Gaussian PSF");
        };
        assert_relative_eq!(sigma, 4.0);

        let n = 20_000;
        let mut x = vec![0.0; n];
        let mut y = vec![0.0; n];
        let mut rng = StdRng::seed_from_u64(1);
        psf.scatter(&mut x, &mut y, &vec![1.0; n], &mut rng).unwrap();
        let var = x.iter().map(|v| v * v).sum::<f64>() / n as f64;
        assert_relative_eq!(var.sqrt(), 4.0, max_relative = 0.05);
    }

    #[test]
    fn test_image_psf_offsets() {
        // a single bright pixel at column 2, row 0 of a 3x1 image
        let image = PsfImage::new([2.0, 1.0], [0.5, 0.5], vec![vec![0.0, 0.0, 1.0]]).unwrap();
        let psf = Psf::Image(ScaledImage::new(image, 0.25));
        let mut x = vec![10.0; 100];
        let mut y = vec![10.0; 100];
        let mut rng = StdRng::seed_from_u64(2);
        psf.scatter(&mut x, &mut y, &[1.0; 100], &mut rng).unwrap();
        // x in (2 + 0.5 - 2, 2 + 1.5 - 2) * 2 + 10
        assert!(x.iter().all(|&v| v >= 11.0 && v < 13.0));
        assert!(y.iter().all(|&v| v >= 9.0 && v < 11.0));
    }

    #[test]
    fn test_multi_image_selection() {
        let json = r#"{"images": [
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 1000.0, "offaxis": 0.0, "data": [[1.0]]},
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 6000.0, "offaxis": 0.0, "data": [[1.0]]},
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 1000.0, "offaxis": 5.0, "data": [[1.0]]},
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 6000.0, "offaxis": 5.0, "data": [[1.0]]}
        ]}"#;
        let set = PsfImageSet::from_json(json).unwrap();
        let grid = ImageGrid::new(&set, &spec()).unwrap();
        assert_eq!(grid.energies(), &[1.0, 6.0]);
        // 5 arcmin at 1 arcsec per pixel is 300 pixels
        assert_relative_eq!(grid.radii2()[1], 90_000.0, max_relative = 1e-9);

        let psf = Psf::MultiImage(grid);
        let mut x = vec![0.0, 250.0, 10.0];
        let mut y = vec![0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(3);
        psf.scatter(&mut x, &mut y, &[2.0, 5.0, 9.0], &mut rng).unwrap();
    }

    #[test]
    fn test_multi_image_incomplete_grid() {
        let json = r#"{"images": [
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 1.0, "offaxis": 0.0, "data": [[1.0]]},
            {"crpix": [1.0, 1.0], "cdelt": [0.0, 0.0], "energy": 6.0, "offaxis": 5.0, "data": [[1.0]]}
        ]}"#;
        let set = PsfImageSet::from_json(json).unwrap();
        let psf = Psf::MultiImage(ImageGrid::new(&set, &spec()).unwrap());
        let mut x = vec![0.0];
        let mut y = vec![0.0];
        let mut rng = StdRng::seed_from_u64(4);
        let err = psf.scatter(&mut x, &mut y, &[6.0], &mut rng).unwrap_err();
        assert!(matches!(
            err,
            Error::PsfMismatch {
                received: 1,
                scattered: 0
            }
        ));
    }
}
