//! Flux calibration of extracted spectra against a per-exposure zeropoint.
//!
//! The zeropoint record is an explicit value loaded once per batch and
//! passed in; there is no process-wide calibration state. An invalid record
//! fails closed: the spectrum passes through unscaled with every bin marked
//! invalid, so an unverified calibration can never be applied silently.

use serde::{Deserialize, Serialize};

use crate::spectrum::{bin, CalibratedSpectrum, ExtractedSpectrum};

/// Multiplicative calibration record for one exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeropointRecord {
    /// Scale factor from instrumental to physical flux units.
    pub value: f64,
    /// Relative (fractional) one-sigma uncertainty of the scale.
    pub uncertainty: f64,
    /// Whether the record passed upstream quality checks.
    pub valid: bool,
}

impl ZeropointRecord {
    /// The identity calibration: scale 1, no uncertainty.
    pub fn identity() -> Self {
        Self {
            value: 1.0,
            uncertainty: 0.0,
            valid: true,
        }
    }

    /// An explicitly invalid record, used when lookup failed.
    pub fn invalid() -> Self {
        Self {
            value: f64::NAN,
            uncertainty: f64::NAN,
            valid: false,
        }
    }
}

/// Calibrate `spectrum` with `zeropoint`.
///
/// For a valid record with scale z and relative uncertainty s:
/// flux' = flux * z and variance' = variance * z^2 + flux^2 * s^2. The
/// cross-term carries the calibration uncertainty, which dominates when the
/// flux is large compared to its own noise. An invalid record marks every
/// bin INVALID and UNCALIBRATED and leaves the values unscaled.
pub fn calibrate(spectrum: &ExtractedSpectrum, zeropoint: &ZeropointRecord) -> CalibratedSpectrum {
    let n = spectrum.len();
    let mut out = CalibratedSpectrum {
        wavelength: spectrum.wavelength.clone(),
        flux: Vec::with_capacity(n),
        variance: Vec::with_capacity(n),
        flags: Vec::with_capacity(n),
    };

    if !zeropoint.valid || !zeropoint.value.is_finite() {
        log::warn!("zeropoint record invalid; spectrum passes through uncalibrated");
        out.flux.extend_from_slice(&spectrum.flux);
        out.variance.extend_from_slice(&spectrum.variance);
        out.flags.extend(
            spectrum
                .flags
                .iter()
                .map(|f| f | bin::INVALID | bin::UNCALIBRATED),
        );
        return out;
    }

    let z = zeropoint.value;
    let s = zeropoint.uncertainty;
    for k in 0..n {
        let flux = spectrum.flux[k];
        let variance = spectrum.variance[k];
        out.flux.push(flux * z);
        out.variance.push(variance * z * z + flux * flux * s * s);
        out.flags.push(spectrum.flags[k]);
    }
    out
}
