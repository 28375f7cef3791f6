//! FITS cube reading and writing.
//!
//! Cube files use the common integral-field layout: a DATA extension with
//! the flux voxels, STAT with the variance, DQ with the defect mask, and a
//! one-dimensional WAVE extension holding the wavelength solution. Linear
//! WCS keywords ride on the DATA extension, and the zeropoint record is
//! stored in ZPVAL / ZPERR / ZPVALID keywords.

use std::path::Path;

use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::{Array2, Array3};
use thiserror::Error;

use crate::calibrate::ZeropointRecord;
use crate::cube::{CubeError, SpatialWcs, SpecCube, WavelengthSolution};

/// Errors from cube file I/O.
#[derive(Error, Debug)]
pub enum FitsError {
    /// Underlying FITS library failure.
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),

    /// A required extension is missing.
    #[error("missing extension {0}")]
    MissingHdu(String),

    /// On-disk shape does not describe a cube.
    #[error("bad cube shape in {hdu}: {reason}")]
    BadShape {
        /// Extension name.
        hdu: String,
        /// What went wrong.
        reason: String,
    },

    /// The arrays read back do not assemble into a valid cube.
    #[error(transparent)]
    Cube(#[from] CubeError),
}

fn read_cube_hdu_f64(
    fptr: &mut FitsFile,
    name: &str,
) -> Result<(Array3<f64>, (usize, usize, usize)), FitsError> {
    let hdu = fptr
        .hdu(name)
        .map_err(|_| FitsError::MissingHdu(name.to_string()))?;
    let naxis: i64 = hdu.read_key(fptr, "NAXIS")?;
    if naxis != 3 {
        return Err(FitsError::BadShape {
            hdu: name.to_string(),
            reason: format!("expected 3 axes, found {naxis}"),
        });
    }
    let cols: i64 = hdu.read_key(fptr, "NAXIS1")?;
    let rows: i64 = hdu.read_key(fptr, "NAXIS2")?;
    let bins: i64 = hdu.read_key(fptr, "NAXIS3")?;
    let shape = (bins as usize, rows as usize, cols as usize);

    let flat: Vec<f64> = hdu.read_image(fptr)?;
    let array = Array3::from_shape_vec(shape, flat).map_err(|_| FitsError::BadShape {
        hdu: name.to_string(),
        reason: "pixel count does not match NAXIS keywords".to_string(),
    })?;
    Ok((array, shape))
}

/// Read a cube file written by [`write_cube`] (or any file following the
/// DATA/STAT/DQ/WAVE layout).
pub fn read_cube<P: AsRef<Path>>(path: P) -> Result<SpecCube, FitsError> {
    let mut fptr = FitsFile::open(&path)?;

    let (flux, shape) = read_cube_hdu_f64(&mut fptr, "DATA")?;
    let (variance, var_shape) = read_cube_hdu_f64(&mut fptr, "STAT")?;
    let (mask_f64, mask_shape) = read_cube_hdu_f64(&mut fptr, "DQ")?;
    if var_shape != shape || mask_shape != shape {
        return Err(FitsError::BadShape {
            hdu: "STAT/DQ".to_string(),
            reason: format!("extension shapes disagree with DATA {shape:?}"),
        });
    }
    let mask = mask_f64.mapv(|v| v as u8);

    let wave_hdu = fptr
        .hdu("WAVE")
        .map_err(|_| FitsError::MissingHdu("WAVE".to_string()))?;
    let wavelengths: Vec<f64> = wave_hdu.read_image(&mut fptr)?;
    let wavelength = WavelengthSolution::new(wavelengths)?;

    let data_hdu = fptr.hdu("DATA")?;
    let wcs = SpatialWcs {
        crpix: [
            data_hdu.read_key(&mut fptr, "CRPIX1").unwrap_or(0.0),
            data_hdu.read_key(&mut fptr, "CRPIX2").unwrap_or(0.0),
        ],
        crval: [
            data_hdu.read_key(&mut fptr, "CRVAL1").unwrap_or(0.0),
            data_hdu.read_key(&mut fptr, "CRVAL2").unwrap_or(0.0),
        ],
        cdelt: [
            data_hdu.read_key(&mut fptr, "CDELT1").unwrap_or(1.0),
            data_hdu.read_key(&mut fptr, "CDELT2").unwrap_or(1.0),
        ],
    };

    let zeropoint = match data_hdu.read_key::<f64>(&mut fptr, "ZPVAL") {
        Ok(value) => {
            let uncertainty = data_hdu.read_key(&mut fptr, "ZPERR").unwrap_or(0.0);
            let valid: i64 = data_hdu.read_key(&mut fptr, "ZPVALID").unwrap_or(0);
            Some(ZeropointRecord {
                value,
                uncertainty,
                valid: valid != 0,
            })
        }
        Err(_) => None,
    };

    Ok(SpecCube::new(
        flux,
        variance,
        mask,
        wavelength,
        wcs,
        zeropoint,
    )?)
}

fn write_cube_hdu_f64(
    fptr: &mut FitsFile,
    name: &str,
    shape: (usize, usize, usize),
    flat: &[f64],
) -> Result<(), FitsError> {
    let dimensions = [shape.0, shape.1, shape.2];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let hdu = fptr.create_image(name.to_string(), &description)?;
    hdu.write_image(fptr, flat)?;
    Ok(())
}

/// Write `cube` to `path`, overwriting any existing file.
pub fn write_cube<P: AsRef<Path>>(cube: &SpecCube, path: P) -> Result<(), FitsError> {
    let mut fptr = FitsFile::create(&path).overwrite().open()?;
    let shape = cube.dim();

    let flux_flat: Vec<f64> = cube.flux().iter().copied().collect();
    write_cube_hdu_f64(&mut fptr, "DATA", shape, &flux_flat)?;

    let data_hdu = fptr.hdu("DATA")?;
    data_hdu.write_key(&mut fptr, "CRPIX1", cube.wcs().crpix[0])?;
    data_hdu.write_key(&mut fptr, "CRPIX2", cube.wcs().crpix[1])?;
    data_hdu.write_key(&mut fptr, "CRVAL1", cube.wcs().crval[0])?;
    data_hdu.write_key(&mut fptr, "CRVAL2", cube.wcs().crval[1])?;
    data_hdu.write_key(&mut fptr, "CDELT1", cube.wcs().cdelt[0])?;
    data_hdu.write_key(&mut fptr, "CDELT2", cube.wcs().cdelt[1])?;
    // Linear dispersion keywords for interoperability; WAVE is the source
    // of truth on read.
    data_hdu.write_key(&mut fptr, "CRVAL3", cube.wavelength().start())?;
    data_hdu.write_key(&mut fptr, "CD3_3", cube.wavelength().mean_step())?;
    if let Some(zp) = cube.zeropoint() {
        data_hdu.write_key(&mut fptr, "ZPVAL", zp.value)?;
        data_hdu.write_key(&mut fptr, "ZPERR", zp.uncertainty)?;
        data_hdu.write_key(&mut fptr, "ZPVALID", i64::from(zp.valid))?;
    }

    let var_flat: Vec<f64> = cube.variance().iter().copied().collect();
    write_cube_hdu_f64(&mut fptr, "STAT", shape, &var_flat)?;

    let mask_flat: Vec<f64> = cube.mask().iter().map(|&m| m as f64).collect();
    write_cube_hdu_f64(&mut fptr, "DQ", shape, &mask_flat)?;

    let wave_dims = [cube.n_bins()];
    let wave_description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &wave_dims,
    };
    let wave_hdu = fptr.create_image("WAVE".to_string(), &wave_description)?;
    wave_hdu.write_image(&mut fptr, cube.wavelength().as_slice())?;

    Ok(())
}

/// Write a 2D collapse product (white-light image) to its own file.
pub fn write_collapse_image<P: AsRef<Path>>(
    image: &Array2<f64>,
    name: &str,
    path: P,
) -> Result<(), FitsError> {
    let mut fptr = FitsFile::create(&path).overwrite().open()?;
    let (rows, cols) = image.dim();
    let dimensions = [rows, cols];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let hdu = fptr.create_image(name.to_string(), &description)?;
    let flat: Vec<f64> = image.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat)?;
    Ok(())
}
