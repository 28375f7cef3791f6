//! Wavelength collapse of a cube into 2D signal, noise, and significance
//! maps.
//!
//! The collapse feeds source detection and doubles as the white-light
//! quick-look product written by the stacking tool.

use ndarray::Array2;
use rayon::prelude::*;

use crate::cube::SpecCube;

/// Collapsed 2D maps over the cube's spatial grid.
#[derive(Debug, Clone)]
pub struct CollapseMap {
    /// Summed mask-clear flux per spatial pixel; NaN where no bin was valid.
    pub signal: Array2<f64>,
    /// Propagated noise (square root of summed variance); infinite where no
    /// bin was valid.
    pub noise: Array2<f64>,
    /// Per-pixel significance = signal / noise; 0 where no bin was valid so
    /// empty pixels can never cross a detection threshold.
    pub significance: Array2<f64>,
    /// Count of valid wavelength bins per spatial pixel.
    pub n_valid: Array2<usize>,
}

/// Collapse `cube` along its wavelength axis.
///
/// For each spatial pixel the mask-clear voxels are summed: signal is the
/// plain flux sum and the noise is propagated from the summed variance.
/// Pixels with no valid bin at all yield NaN signal, infinite noise, and
/// zero significance.
pub fn collapse(cube: &SpecCube) -> CollapseMap {
    let (rows, cols) = cube.spatial_dim();
    let n_bins = cube.n_bins();

    let per_row: Vec<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<usize>)> = (0..rows)
        .into_par_iter()
        .map(|r| {
            let mut signal = vec![f64::NAN; cols];
            let mut noise = vec![f64::INFINITY; cols];
            let mut significance = vec![0.0; cols];
            let mut n_valid = vec![0usize; cols];
            for c in 0..cols {
                let mut flux_sum = 0.0;
                let mut var_sum = 0.0;
                let mut count = 0usize;
                for k in 0..n_bins {
                    if cube.is_voxel_valid(k, r, c) {
                        flux_sum += cube.flux()[[k, r, c]];
                        var_sum += cube.variance()[[k, r, c]];
                        count += 1;
                    }
                }
                if count > 0 && var_sum > 0.0 {
                    signal[c] = flux_sum;
                    noise[c] = var_sum.sqrt();
                    significance[c] = flux_sum / var_sum.sqrt();
                    n_valid[c] = count;
                }
            }
            (signal, noise, significance, n_valid)
        })
        .collect();

    let mut map = CollapseMap {
        signal: Array2::from_elem((rows, cols), f64::NAN),
        noise: Array2::from_elem((rows, cols), f64::INFINITY),
        significance: Array2::zeros((rows, cols)),
        n_valid: Array2::from_elem((rows, cols), 0),
    };
    for (r, (signal, noise, significance, n_valid)) in per_row.into_iter().enumerate() {
        for c in 0..cols {
            map.signal[[r, c]] = signal[c];
            map.noise[[r, c]] = noise[c];
            map.significance[[r, c]] = significance[c];
            map.n_valid[[r, c]] = n_valid[c];
        }
    }
    map
}
