//! In-memory model of a calibrated spectral data cube.
//!
//! A cube holds flux, variance, and defect-mask values for every voxel
//! (wavelength bin, spatial row, spatial column), together with the
//! wavelength solution, a linear spatial world-coordinate transform, and the
//! per-exposure zeropoint record used later for flux calibration.
//!
//! Cubes are immutable once constructed: every downstream stage (stacking,
//! detection, extraction) takes a shared reference and never mutates the
//! arrays in place.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibrate::ZeropointRecord;

/// Voxel defect flag bits. A voxel participates in downstream sums only when
/// its mask byte is exactly zero.
pub mod voxel {
    /// Voxel has no usable data (outside footprint, failed reduction).
    pub const NO_DATA: u8 = 1 << 0;
    /// Detector pixel was saturated.
    pub const SATURATED: u8 = 1 << 1;
    /// Cosmic-ray hit flagged by the upstream reduction.
    pub const COSMIC_RAY: u8 = 1 << 2;
    /// Voxel lies on the resampled field edge.
    pub const EDGE: u8 = 1 << 3;

    /// A voxel is valid when no defect bit is set.
    #[inline]
    pub fn is_valid(mask: u8) -> bool {
        mask == 0
    }
}

/// Sentinel flux value stored in invalid voxels.
pub const INVALID_FLUX: f64 = f64::NAN;
/// Sentinel variance value stored in invalid voxels.
pub const INVALID_VARIANCE: f64 = f64::INFINITY;

/// Errors raised while constructing cube metadata or the cube itself.
#[derive(Error, Debug)]
pub enum CubeError {
    /// Flux, variance, and mask arrays must share one shape.
    #[error("cube array shapes disagree: flux {flux:?}, variance {variance:?}, mask {mask:?}")]
    ShapeMismatch {
        /// Shape of the flux array.
        flux: (usize, usize, usize),
        /// Shape of the variance array.
        variance: (usize, usize, usize),
        /// Shape of the mask array.
        mask: (usize, usize, usize),
    },

    /// Wavelength solution length must equal the cube's wavelength axis.
    #[error("wavelength solution has {solution} entries but cube has {axis} bins")]
    WavelengthLength {
        /// Entries in the wavelength solution.
        solution: usize,
        /// Bins along the cube's wavelength axis.
        axis: usize,
    },

    /// Wavelength values must increase strictly monotonically.
    #[error("wavelength solution is not monotonic increasing at index {index}")]
    NonMonotonicWavelength {
        /// First index violating monotonicity.
        index: usize,
    },

    /// A wavelength solution needs at least one bin.
    #[error("wavelength solution is empty")]
    EmptyWavelength,
}

/// Monotonic mapping from wavelength-bin index to physical wavelength in
/// Angstroms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthSolution {
    values: Vec<f64>,
}

impl WavelengthSolution {
    /// Build a solution from explicit per-bin wavelengths, validating strict
    /// monotonic increase.
    pub fn new(values: Vec<f64>) -> Result<Self, CubeError> {
        if values.is_empty() {
            return Err(CubeError::EmptyWavelength);
        }
        for i in 1..values.len() {
            if values[i] <= values[i - 1] {
                return Err(CubeError::NonMonotonicWavelength { index: i });
            }
        }
        Ok(Self { values })
    }

    /// Build a linear solution: `start + step * index` for `len` bins.
    pub fn linear(start: f64, step: f64, len: usize) -> Result<Self, CubeError> {
        if step <= 0.0 {
            return Err(CubeError::NonMonotonicWavelength { index: 1 });
        }
        Self::new((0..len).map(|i| start + step * i as f64).collect())
    }

    /// Wavelength of bin `index` in Angstroms.
    #[inline]
    pub fn at(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Number of wavelength bins.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the solution has no bins.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All wavelengths as a slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// First wavelength.
    pub fn start(&self) -> f64 {
        self.values[0]
    }

    /// Mean bin width, used when exporting a linear dispersion keyword.
    pub fn mean_step(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        (self.values[self.values.len() - 1] - self.values[0]) / (self.values.len() - 1) as f64
    }

    /// Compare two solutions within a relative tolerance.
    pub fn approx_eq(&self, other: &Self, rel_tol: f64) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| (a - b).abs() <= rel_tol * a.abs().max(b.abs()).max(1.0))
    }
}

/// Linear spatial world-coordinate transform (CRPIX/CRVAL/CDELT convention).
///
/// Converts between fractional pixel coordinates `(x, y)` and world
/// coordinates `(ra, dec)` in degrees. Sufficient for the small fields this
/// pipeline handles; catalog positions supplied in world coordinates are
/// converted through this before aperture construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialWcs {
    /// Reference pixel `(x, y)`, zero-based.
    pub crpix: [f64; 2],
    /// World coordinate at the reference pixel, degrees.
    pub crval: [f64; 2],
    /// Degrees per pixel along each axis.
    pub cdelt: [f64; 2],
}

impl SpatialWcs {
    /// Identity-like transform: pixel coordinates map directly to degrees.
    pub fn pixel_grid() -> Self {
        Self {
            crpix: [0.0, 0.0],
            crval: [0.0, 0.0],
            cdelt: [1.0, 1.0],
        }
    }

    /// Pixel `(x, y)` to world `(ra, dec)` in degrees.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.crval[0] + (x - self.crpix[0]) * self.cdelt[0],
            self.crval[1] + (y - self.crpix[1]) * self.cdelt[1],
        )
    }

    /// World `(ra, dec)` in degrees to pixel `(x, y)`.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        (
            self.crpix[0] + (ra - self.crval[0]) / self.cdelt[0],
            self.crpix[1] + (dec - self.crval[1]) / self.cdelt[1],
        )
    }
}

/// A calibrated spectral data cube: flux, variance, and defect mask per
/// voxel, indexed `[wavelength bin, row, column]`.
#[derive(Debug, Clone)]
pub struct SpecCube {
    flux: Array3<f64>,
    variance: Array3<f64>,
    mask: Array3<u8>,
    wavelength: WavelengthSolution,
    wcs: SpatialWcs,
    zeropoint: Option<ZeropointRecord>,
}

impl SpecCube {
    /// Assemble a cube, validating the shared-shape and wavelength-length
    /// invariants.
    pub fn new(
        flux: Array3<f64>,
        variance: Array3<f64>,
        mask: Array3<u8>,
        wavelength: WavelengthSolution,
        wcs: SpatialWcs,
        zeropoint: Option<ZeropointRecord>,
    ) -> Result<Self, CubeError> {
        if flux.dim() != variance.dim() || flux.dim() != mask.dim() {
            return Err(CubeError::ShapeMismatch {
                flux: flux.dim(),
                variance: variance.dim(),
                mask: mask.dim(),
            });
        }
        if wavelength.len() != flux.dim().0 {
            return Err(CubeError::WavelengthLength {
                solution: wavelength.len(),
                axis: flux.dim().0,
            });
        }
        Ok(Self {
            flux,
            variance,
            mask,
            wavelength,
            wcs,
            zeropoint,
        })
    }

    /// Flux array, `[bin, row, col]`.
    pub fn flux(&self) -> &Array3<f64> {
        &self.flux
    }

    /// Variance array, `[bin, row, col]`. Invalid voxels hold
    /// [`INVALID_VARIANCE`].
    pub fn variance(&self) -> &Array3<f64> {
        &self.variance
    }

    /// Defect-mask array, `[bin, row, col]`.
    pub fn mask(&self) -> &Array3<u8> {
        &self.mask
    }

    /// Wavelength solution along the cube's first axis.
    pub fn wavelength(&self) -> &WavelengthSolution {
        &self.wavelength
    }

    /// Spatial world-coordinate transform.
    pub fn wcs(&self) -> &SpatialWcs {
        &self.wcs
    }

    /// Per-exposure zeropoint record, when known.
    pub fn zeropoint(&self) -> Option<&ZeropointRecord> {
        self.zeropoint.as_ref()
    }

    /// Number of wavelength bins.
    pub fn n_bins(&self) -> usize {
        self.flux.dim().0
    }

    /// Spatial dimensions `(rows, cols)`.
    pub fn spatial_dim(&self) -> (usize, usize) {
        let (_, rows, cols) = self.flux.dim();
        (rows, cols)
    }

    /// Full shape `(bins, rows, cols)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.flux.dim()
    }

    /// Whether the voxel at `[bin, row, col]` may contribute to sums.
    ///
    /// Validity is decided by the mask byte and a finite, positive variance;
    /// the numeric flux sentinel is never consulted.
    #[inline]
    pub fn is_voxel_valid(&self, bin: usize, row: usize, col: usize) -> bool {
        voxel::is_valid(self.mask[[bin, row, col]]) && {
            let v = self.variance[[bin, row, col]];
            v.is_finite() && v >= 0.0
        }
    }
}
