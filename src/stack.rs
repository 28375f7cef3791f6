//! Combination of aligned exposures into one stacked cube.
//!
//! Each output voxel is an inverse-variance-weighted mean of the valid
//! contributors across the input cubes, after iterative outlier rejection
//! against each value's own reported uncertainty. Exposures with sub-pixel
//! spatial offsets are first re-registered onto the output grid with
//! bilinear resampling (see [`crate::resample`]).

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use thiserror::Error;

use crate::cube::{voxel, CubeError, SpecCube, INVALID_FLUX, INVALID_VARIANCE};
use crate::resample::{shift_slice, SpatialOffset};

/// Stacking parameters.
///
/// The rejection threshold and iteration cap are deliberately explicit
/// configuration: there is no hidden default beyond the documented values
/// below, and callers tuning a reduction are expected to set them.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    /// Minimum number of valid contributors a voxel needs; below this the
    /// output voxel is marked invalid. Default 1.
    pub min_valid_inputs: usize,
    /// Rejection threshold: a value is discarded when its deviation from the
    /// running weighted mean exceeds this multiple of its own reported
    /// sigma. Default 3.0.
    pub clip_sigma: f64,
    /// Iteration cap for the rejection loop. Default 5.
    pub clip_iterations: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            min_valid_inputs: 1,
            clip_sigma: 3.0,
            clip_iterations: 5,
        }
    }
}

impl StackConfig {
    /// Reject nonsensical parameters before any work starts.
    pub fn validate(&self) -> Result<(), StackError> {
        if self.clip_sigma <= 0.0 {
            return Err(StackError::InvalidConfig(format!(
                "clip_sigma must be positive, got {}",
                self.clip_sigma
            )));
        }
        if self.min_valid_inputs == 0 {
            return Err(StackError::InvalidConfig(
                "min_valid_inputs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Errors from a stacking operation. Structural mismatches are fatal for the
/// whole operation; per-voxel data shortfalls are not errors and surface as
/// invalid-mask flags instead.
#[derive(Error, Debug)]
pub enum StackError {
    /// No input cubes were supplied.
    #[error("no input cubes to stack")]
    NoInput,

    /// An input cube disagrees with the first cube's grid and no offsets
    /// were supplied.
    #[error(
        "cube {index} has shape {found:?} / wavelength grid differing from \
         cube 0 ({expected:?}) and no resampling offsets were supplied"
    )]
    StructuralMismatch {
        /// Index of the offending cube in the input sequence.
        index: usize,
        /// Shape of cube 0.
        expected: (usize, usize, usize),
        /// Shape of the offending cube.
        found: (usize, usize, usize),
    },

    /// Offset list length does not match the cube list length.
    #[error("got {offsets} offsets for {cubes} cubes")]
    OffsetCount {
        /// Number of offsets supplied.
        offsets: usize,
        /// Number of cubes supplied.
        cubes: usize,
    },

    /// Configuration failed validation.
    #[error("invalid stack configuration: {0}")]
    InvalidConfig(String),

    /// Assembling the output cube failed.
    #[error(transparent)]
    Cube(#[from] CubeError),
}

/// One gathered contributor for a voxel.
#[derive(Clone, Copy)]
struct Contributor {
    flux: f64,
    variance: f64,
}

/// Inverse-variance weighted mean of the active contributors.
fn weighted_mean(values: &[Contributor]) -> (f64, f64) {
    let mut num = 0.0;
    let mut den = 0.0;
    for v in values {
        let w = 1.0 / v.variance;
        num += v.flux * w;
        den += w;
    }
    (num / den, 1.0 / den)
}

/// Combine one voxel's contributors: iterative sigma rejection against each
/// value's own uncertainty, then inverse-variance weighting of the
/// survivors. A single contributor passes through unchanged.
fn combine_voxel(values: &mut Vec<Contributor>, config: &StackConfig) -> (f64, f64, u8) {
    if values.len() < config.min_valid_inputs {
        return (INVALID_FLUX, INVALID_VARIANCE, voxel::NO_DATA);
    }
    if values.len() == 1 {
        return (values[0].flux, values[0].variance, 0);
    }

    // At most one value is rejected per iteration, the worst deviator in
    // sigma units, and the running mean is re-derived from the survivors.
    for _ in 0..config.clip_iterations {
        if values.len() <= 1 {
            break;
        }
        let (mean, _) = weighted_mean(values);
        let (worst, ratio) = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i, (v.flux - mean).abs() / v.variance.sqrt()))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .expect("non-empty contributor list");
        if ratio <= config.clip_sigma {
            break;
        }
        values.swap_remove(worst);
    }

    let (flux, variance) = weighted_mean(values);
    (flux, variance, 0)
}

/// Per-cube registered view of one wavelength slice.
struct RegisteredSlice {
    flux: Array2<f64>,
    variance: Array2<f64>,
    mask: Array2<u8>,
}

fn registered_slice(
    cube: &SpecCube,
    bin: usize,
    offset: Option<SpatialOffset>,
    out_shape: (usize, usize),
) -> RegisteredSlice {
    let flux = cube.flux().index_axis(ndarray::Axis(0), bin);
    let variance = cube.variance().index_axis(ndarray::Axis(0), bin);
    let mask = cube.mask().index_axis(ndarray::Axis(0), bin);

    let needs_resampling = cube.spatial_dim() != out_shape
        || offset.is_some_and(|off| off.dx != 0.0 || off.dy != 0.0);
    if needs_resampling {
        let off = offset.unwrap_or(SpatialOffset { dx: 0.0, dy: 0.0 });
        let resampled = shift_slice(&flux, &variance, &mask, off, out_shape);
        RegisteredSlice {
            flux: resampled.flux,
            variance: resampled.variance,
            mask: resampled.mask,
        }
    } else {
        RegisteredSlice {
            flux: flux.to_owned(),
            variance: variance.to_owned(),
            mask: mask.to_owned(),
        }
    }
}

/// Stack `cubes` into one cube on the grid of the first input.
///
/// All cubes must share the first cube's wavelength solution. When
/// `offsets` is supplied (one entry per cube, relative to the output grid),
/// exposures are bilinearly re-registered onto the first cube's spatial
/// grid before combination and their grids may differ; without offsets any
/// grid disagreement is a fatal [`StackError::StructuralMismatch`].
///
/// The output carries the first cube's wavelength solution, WCS, and
/// zeropoint record. Combination runs in parallel across wavelength slices.
pub fn stack_cubes(
    cubes: &[SpecCube],
    offsets: Option<&[SpatialOffset]>,
    config: &StackConfig,
) -> Result<SpecCube, StackError> {
    config.validate()?;
    let first = cubes.first().ok_or(StackError::NoInput)?;
    let dim = first.dim();

    if let Some(offsets) = offsets {
        if offsets.len() != cubes.len() {
            return Err(StackError::OffsetCount {
                offsets: offsets.len(),
                cubes: cubes.len(),
            });
        }
    }

    // Wavelength solutions must always agree; spatial grids may differ only
    // when offsets make re-registration possible.
    for (index, cube) in cubes.iter().enumerate().skip(1) {
        let shape_ok = cube.dim() == dim || (offsets.is_some() && cube.n_bins() == dim.0);
        let wave_ok = cube.wavelength().approx_eq(first.wavelength(), 1e-9);
        if !(shape_ok && wave_ok) {
            return Err(StackError::StructuralMismatch {
                index,
                expected: dim,
                found: cube.dim(),
            });
        }
    }

    let (n_bins, rows, cols) = dim;
    log::debug!(
        "stacking {} cubes of {} bins x {}x{} pixels",
        cubes.len(),
        n_bins,
        rows,
        cols
    );

    // Each wavelength slice is independent; fan out across bins.
    let planes: Vec<(Array2<f64>, Array2<f64>, Array2<u8>)> = (0..n_bins)
        .into_par_iter()
        .map(|bin| {
            let registered: Vec<RegisteredSlice> = cubes
                .iter()
                .enumerate()
                .map(|(i, cube)| registered_slice(cube, bin, offsets.map(|o| o[i]), (rows, cols)))
                .collect();

            let mut flux = Array2::from_elem((rows, cols), INVALID_FLUX);
            let mut variance = Array2::from_elem((rows, cols), INVALID_VARIANCE);
            let mut mask = Array2::from_elem((rows, cols), voxel::NO_DATA);

            let mut contributors = Vec::with_capacity(cubes.len());
            for r in 0..rows {
                for c in 0..cols {
                    contributors.clear();
                    for slice in &registered {
                        let m = slice.mask[[r, c]];
                        let v = slice.variance[[r, c]];
                        if voxel::is_valid(m) && v.is_finite() && v > 0.0 {
                            contributors.push(Contributor {
                                flux: slice.flux[[r, c]],
                                variance: v,
                            });
                        }
                    }
                    let mut active = contributors.clone();
                    let (f, v, m) = combine_voxel(&mut active, config);
                    flux[[r, c]] = f;
                    variance[[r, c]] = v;
                    mask[[r, c]] = m;
                }
            }
            (flux, variance, mask)
        })
        .collect();

    let mut flux = Array3::from_elem(dim, INVALID_FLUX);
    let mut variance = Array3::from_elem(dim, INVALID_VARIANCE);
    let mut mask = Array3::from_elem(dim, voxel::NO_DATA);
    for (bin, (f, v, m)) in planes.into_iter().enumerate() {
        flux.index_axis_mut(ndarray::Axis(0), bin).assign(&f);
        variance.index_axis_mut(ndarray::Axis(0), bin).assign(&v);
        mask.index_axis_mut(ndarray::Axis(0), bin).assign(&m);
    }

    Ok(SpecCube::new(
        flux,
        variance,
        mask,
        first.wavelength().clone(),
        *first.wcs(),
        first.zeropoint().cloned(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{SpatialWcs, WavelengthSolution};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn uniform_cube(flux: f64, variance: f64, dim: (usize, usize, usize)) -> SpecCube {
        SpecCube::new(
            Array3::from_elem(dim, flux),
            Array3::from_elem(dim, variance),
            Array3::zeros(dim),
            WavelengthSolution::linear(4750.0, 1.25, dim.0).unwrap(),
            SpatialWcs::pixel_grid(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_single_cube_identity() {
        let cube = uniform_cube(3.5, 0.25, (3, 4, 4));
        let stacked = stack_cubes(&[cube.clone()], None, &StackConfig::default()).unwrap();

        for ((k, r, c), &f) in cube.flux().indexed_iter() {
            assert_relative_eq!(stacked.flux()[[k, r, c]], f, epsilon = 1e-12);
            assert_relative_eq!(
                stacked.variance()[[k, r, c]],
                cube.variance()[[k, r, c]],
                epsilon = 1e-12
            );
            assert_eq!(stacked.mask()[[k, r, c]], 0);
        }
    }

    #[test]
    fn test_single_valid_contributor_passes_through() {
        let dim = (2, 3, 3);
        let good = uniform_cube(7.0, 0.5, dim);

        let mut mask = Array3::<u8>::zeros(dim);
        mask.fill(voxel::COSMIC_RAY);
        let bad = SpecCube::new(
            Array3::from_elem(dim, 99.0),
            Array3::from_elem(dim, 0.01),
            mask,
            WavelengthSolution::linear(4750.0, 1.25, dim.0).unwrap(),
            SpatialWcs::pixel_grid(),
            None,
        )
        .unwrap();

        let stacked = stack_cubes(&[good, bad], None, &StackConfig::default()).unwrap();
        assert_relative_eq!(stacked.flux()[[0, 1, 1]], 7.0, epsilon = 1e-12);
        assert_relative_eq!(stacked.variance()[[0, 1, 1]], 0.5, epsilon = 1e-12);
        assert_eq!(stacked.mask()[[0, 1, 1]], 0);
    }

    #[test]
    fn test_inverse_variance_weighting() {
        let dim = (1, 2, 2);
        let a = uniform_cube(10.0, 1.0, dim);
        let b = uniform_cube(12.0, 4.0, dim);

        let config = StackConfig {
            clip_sigma: 100.0, // no rejection in this test
            ..StackConfig::default()
        };
        let stacked = stack_cubes(&[a, b], None, &config).unwrap();

        // mean = (10/1 + 12/4) / (1/1 + 1/4) = 13 / 1.25 = 10.4
        assert_relative_eq!(stacked.flux()[[0, 0, 0]], 10.4, epsilon = 1e-12);
        // variance = 1 / 1.25
        assert_relative_eq!(stacked.variance()[[0, 0, 0]], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_outlier_rejected() {
        let dim = (1, 1, 1);
        let cubes = vec![
            uniform_cube(10.0, 1.0, dim),
            uniform_cube(10.2, 1.0, dim),
            uniform_cube(9.9, 1.0, dim),
            uniform_cube(60.0, 1.0, dim), // cosmic ray survivor
        ];
        let stacked = stack_cubes(&cubes, None, &StackConfig::default()).unwrap();

        let expected = (10.0 + 10.2 + 9.9) / 3.0;
        assert_relative_eq!(stacked.flux()[[0, 0, 0]], expected, epsilon = 1e-9);
        assert_relative_eq!(stacked.variance()[[0, 0, 0]], 1.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_min_valid_inputs_marks_invalid() {
        let dim = (1, 1, 1);
        let cubes = vec![uniform_cube(5.0, 1.0, dim), uniform_cube(5.0, 1.0, dim)];
        let config = StackConfig {
            min_valid_inputs: 3,
            ..StackConfig::default()
        };
        let stacked = stack_cubes(&cubes, None, &config).unwrap();
        assert!(stacked.flux()[[0, 0, 0]].is_nan());
        assert!(stacked.variance()[[0, 0, 0]].is_infinite());
        assert_ne!(stacked.mask()[[0, 0, 0]], 0);
    }

    #[test]
    fn test_structural_mismatch_is_fatal() {
        let a = uniform_cube(1.0, 1.0, (2, 4, 4));
        let b = uniform_cube(1.0, 1.0, (2, 5, 4));
        let result = stack_cubes(&[a, b], None, &StackConfig::default());
        assert!(matches!(
            result,
            Err(StackError::StructuralMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_offset_count_mismatch() {
        let a = uniform_cube(1.0, 1.0, (1, 3, 3));
        let b = uniform_cube(1.0, 1.0, (1, 3, 3));
        let offsets = vec![SpatialOffset { dx: 0.0, dy: 0.0 }];
        let result = stack_cubes(&[a, b], Some(&offsets), &StackConfig::default());
        assert!(matches!(
            result,
            Err(StackError::OffsetCount {
                offsets: 1,
                cubes: 2
            })
        ));
    }

    #[test]
    fn test_offset_registration_shifts_signal() {
        let dim = (1, 6, 6);
        // Cube A holds the source at (2, 2); cube B observed it dithered by
        // one pixel in both axes, at (3, 3).
        let mut flux_a = Array3::from_elem(dim, 0.0);
        flux_a[[0, 2, 2]] = 50.0;
        let a = SpecCube::new(
            flux_a,
            Array3::from_elem(dim, 1.0),
            Array3::zeros(dim),
            WavelengthSolution::linear(4750.0, 1.25, 1).unwrap(),
            SpatialWcs::pixel_grid(),
            None,
        )
        .unwrap();

        let mut flux_b = Array3::from_elem(dim, 0.0);
        flux_b[[0, 3, 3]] = 50.0;
        let b = SpecCube::new(
            flux_b,
            Array3::from_elem(dim, 1.0),
            Array3::zeros(dim),
            WavelengthSolution::linear(4750.0, 1.25, 1).unwrap(),
            SpatialWcs::pixel_grid(),
            None,
        )
        .unwrap();

        let offsets = vec![
            SpatialOffset { dx: 0.0, dy: 0.0 },
            SpatialOffset { dx: 1.0, dy: 1.0 },
        ];
        let config = StackConfig {
            clip_sigma: 100.0,
            ..StackConfig::default()
        };
        let stacked = stack_cubes(&[a, b], Some(&offsets), &config).unwrap();

        // Both exposures now agree at (2, 2); the mean stays 50.
        assert_relative_eq!(stacked.flux()[[0, 2, 2]], 50.0, epsilon = 1e-9);
        assert_relative_eq!(stacked.variance()[[0, 2, 2]], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_differing_grids_allowed_with_offsets() {
        // A larger second exposure re-registers onto the first cube's grid.
        let a = uniform_cube(10.0, 1.0, (1, 4, 4));
        let b = uniform_cube(10.0, 1.0, (1, 6, 6));
        let offsets = vec![
            SpatialOffset { dx: 0.0, dy: 0.0 },
            SpatialOffset { dx: 1.0, dy: 1.0 },
        ];
        let config = StackConfig {
            clip_sigma: 100.0,
            ..StackConfig::default()
        };
        let stacked = stack_cubes(&[a, b], Some(&offsets), &config).unwrap();
        assert_eq!(stacked.dim(), (1, 4, 4));
        // Interior voxels see both exposures.
        assert_relative_eq!(stacked.flux()[[0, 1, 1]], 10.0, epsilon = 1e-9);
        assert_relative_eq!(stacked.variance()[[0, 1, 1]], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cube = uniform_cube(1.0, 1.0, (1, 2, 2));
        let config = StackConfig {
            clip_sigma: -1.0,
            ..StackConfig::default()
        };
        assert!(matches!(
            stack_cubes(&[cube], None, &config),
            Err(StackError::InvalidConfig(_))
        ));
    }
}
