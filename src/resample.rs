//! Bilinear re-registration of cube slices onto a common spatial grid.
//!
//! Used by the stacker when exposures carry non-integer spatial offsets.
//! Resampling redistributes mask flags conservatively: an output voxel is
//! invalid if any source voxel that contributes weight to it is invalid, and
//! pixels shifted in from outside the input grid are flagged as edge voxels.

use ndarray::{Array2, ArrayView2};

use crate::cube::{voxel, INVALID_FLUX, INVALID_VARIANCE};

/// Spatial offset of one exposure's pixel grid relative to the output grid.
///
/// Output pixel `(row, col)` samples the input at
/// `(row + dy, col + dx)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialOffset {
    /// Column offset, pixels.
    pub dx: f64,
    /// Row offset, pixels.
    pub dy: f64,
}

impl SpatialOffset {
    /// True when both components are whole pixels (within float tolerance).
    pub fn is_integer(&self) -> bool {
        (self.dx - self.dx.round()).abs() < 1e-9 && (self.dy - self.dy.round()).abs() < 1e-9
    }
}

/// One resampled slice: flux, variance, and redistributed mask.
pub struct ResampledSlice {
    /// Resampled flux plane.
    pub flux: Array2<f64>,
    /// Resampled variance plane, propagated as a weighted square sum.
    pub variance: Array2<f64>,
    /// Redistributed mask plane.
    pub mask: Array2<u8>,
}

/// Bilinearly resample one wavelength slice onto an `out_shape` grid,
/// shifted by `offset`.
///
/// The input slice may have a different spatial shape than the output grid;
/// output voxels whose footprint falls outside the input are edge-flagged.
/// Variance propagates with squared weights, consistent with the independent
/// noise treatment used at extraction. Corners with zero bilinear weight do
/// not contribute and therefore cannot invalidate the output voxel.
pub fn shift_slice(
    flux: &ArrayView2<f64>,
    variance: &ArrayView2<f64>,
    mask: &ArrayView2<u8>,
    offset: SpatialOffset,
    out_shape: (usize, usize),
) -> ResampledSlice {
    let (in_rows, in_cols) = flux.dim();
    let (rows, cols) = out_shape;
    let mut out_flux = Array2::from_elem((rows, cols), INVALID_FLUX);
    let mut out_var = Array2::from_elem((rows, cols), INVALID_VARIANCE);
    let mut out_mask = Array2::from_elem((rows, cols), voxel::NO_DATA);

    for r in 0..rows {
        let src_y = r as f64 + offset.dy;
        for c in 0..cols {
            let src_x = c as f64 + offset.dx;

            let y0 = src_y.floor();
            let x0 = src_x.floor();
            let wy = src_y - y0;
            let wx = src_x - x0;

            // Corner coordinates and bilinear weights.
            let corners = [
                (y0 as isize, x0 as isize, (1.0 - wy) * (1.0 - wx)),
                (y0 as isize, x0 as isize + 1, (1.0 - wy) * wx),
                (y0 as isize + 1, x0 as isize, wy * (1.0 - wx)),
                (y0 as isize + 1, x0 as isize + 1, wy * wx),
            ];

            let mut f_sum = 0.0;
            let mut v_sum = 0.0;
            let mut w_sum = 0.0;
            let mut defect = 0u8;
            let mut off_grid = false;

            for &(cy, cx, w) in &corners {
                if w <= 0.0 {
                    continue;
                }
                if cy < 0 || cx < 0 || cy as usize >= in_rows || cx as usize >= in_cols {
                    off_grid = true;
                    continue;
                }
                let (cy, cx) = (cy as usize, cx as usize);
                let m = mask[[cy, cx]];
                if !voxel::is_valid(m) || !variance[[cy, cx]].is_finite() {
                    defect |= if m == 0 { voxel::NO_DATA } else { m };
                    continue;
                }
                f_sum += w * flux[[cy, cx]];
                v_sum += w * w * variance[[cy, cx]];
                w_sum += w;
            }

            if defect != 0 || off_grid || w_sum <= 0.0 {
                // Any invalid contributor poisons the resampled voxel.
                out_mask[[r, c]] = defect | if off_grid { voxel::EDGE } else { 0 } | voxel::NO_DATA;
            } else {
                out_flux[[r, c]] = f_sum / w_sum;
                out_var[[r, c]] = v_sum / (w_sum * w_sum);
                out_mask[[r, c]] = 0;
            }
        }
    }

    ResampledSlice {
        flux: out_flux,
        variance: out_var,
        mask: out_mask,
    }
}
