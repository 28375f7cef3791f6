//! Flux-weighted centroids and second-moment extents for labeled regions.

use ndarray::ArrayView2;

/// Centroid and elliptical shape of one region, from intensity-weighted
/// image moments.
#[derive(Debug, Clone)]
pub struct RegionMoments {
    /// Centroid column coordinate, fractional pixels.
    pub x: f64,
    /// Centroid row coordinate, fractional pixels.
    pub y: f64,
    /// Semi-major axis from the larger moment eigenvalue, pixels.
    pub a: f64,
    /// Semi-minor axis from the smaller moment eigenvalue, pixels.
    pub b: f64,
    /// Position angle of the semi-major axis, radians.
    pub theta: f64,
    /// Total weight (summed signal) of the region.
    pub flux: f64,
}

/// Minimum semi-axis, so single-pixel regions still carry a usable extent.
const MIN_SEMI_AXIS: f64 = 0.5;

/// Compute intensity-weighted moments over the member pixels of one region.
///
/// Negative signal values (noise troughs inside a region) are clamped to
/// zero weight. If the region carries no positive weight at all, the plain
/// geometric mean of the member coordinates is used instead.
pub fn region_moments(signal: &ArrayView2<f64>, pixels: &[(usize, usize)]) -> RegionMoments {
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    let mut m20 = 0.0;
    let mut m02 = 0.0;
    let mut m11 = 0.0;

    for &(r, c) in pixels {
        let value = signal[[r, c]];
        let w = if value.is_finite() { value.max(0.0) } else { 0.0 };
        let x = c as f64;
        let y = r as f64;
        m00 += w;
        m10 += x * w;
        m01 += y * w;
        m20 += x * x * w;
        m02 += y * y * w;
        m11 += x * y * w;
    }

    if m00 <= f64::EPSILON {
        let n = pixels.len().max(1) as f64;
        let x = pixels.iter().map(|&(_, c)| c as f64).sum::<f64>() / n;
        let y = pixels.iter().map(|&(r, _)| r as f64).sum::<f64>() / n;
        return RegionMoments {
            x,
            y,
            a: MIN_SEMI_AXIS,
            b: MIN_SEMI_AXIS,
            theta: 0.0,
            flux: 0.0,
        };
    }

    let x = m10 / m00;
    let y = m01 / m00;

    // Central second moments.
    let mu20 = m20 / m00 - x * x;
    let mu02 = m02 / m00 - y * y;
    let mu11 = m11 / m00 - x * y;

    // Eigenvalues of the moment matrix give the squared semi-axes.
    let sum = mu20 + mu02;
    let diff = mu20 - mu02;
    let discriminant = (4.0 * mu11 * mu11 + diff * diff).sqrt();
    let lambda1 = (sum + discriminant) / 2.0;
    let lambda2 = (sum - discriminant) / 2.0;

    let a = lambda1.max(0.0).sqrt().max(MIN_SEMI_AXIS);
    let b = lambda2.max(0.0).sqrt().max(MIN_SEMI_AXIS);
    let theta = 0.5 * (2.0 * mu11).atan2(diff);

    RegionMoments {
        x,
        y,
        a,
        b,
        theta,
        flux: m00,
    }
}
