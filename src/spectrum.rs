//! Extracted and calibrated spectrum types.
//!
//! A spectrum always has exactly one entry per wavelength bin of the cube it
//! came from; bins that could not be measured are flagged, never dropped.

use serde::{Deserialize, Serialize};

/// Per-bin quality flag bits. A bin is fully trustworthy only when its flag
/// byte is zero.
pub mod bin {
    /// No valid voxel contributed to this bin.
    pub const INVALID: u8 = 1 << 0;
    /// Fewer valid voxels contributed than the full aperture support;
    /// the measurement stands but with reduced reliability.
    pub const PARTIAL: u8 = 1 << 1;
    /// No trustworthy zeropoint was available; the value is instrumental,
    /// not physical.
    pub const UNCALIBRATED: u8 = 1 << 2;

    /// A bin is usable for fitting when it is neither invalid nor
    /// uncalibrated.
    #[inline]
    pub fn is_usable(flag: u8) -> bool {
        flag & (INVALID | UNCALIBRATED) == 0
    }
}

/// Instrumental spectrum produced by the extractor.
///
/// All four vectors share the cube's wavelength-axis length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSpectrum {
    /// Wavelength per bin, Angstroms.
    pub wavelength: Vec<f64>,
    /// Weighted flux sum per bin, instrumental units.
    pub flux: Vec<f64>,
    /// Propagated variance per bin; infinite for invalid bins.
    pub variance: Vec<f64>,
    /// Per-bin flag bits (see [`bin`]).
    pub flags: Vec<u8>,
}

impl ExtractedSpectrum {
    /// Number of wavelength bins.
    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    /// True when the spectrum has no bins.
    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Count of bins with a clean flag byte.
    pub fn n_clean_bins(&self) -> usize {
        self.flags.iter().filter(|&&f| f == 0).count()
    }
}

/// Flux-calibrated spectrum, physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedSpectrum {
    /// Wavelength per bin, Angstroms.
    pub wavelength: Vec<f64>,
    /// Calibrated flux per bin.
    pub flux: Vec<f64>,
    /// Combined variance per bin: extraction noise scaled to physical units
    /// plus the zeropoint uncertainty cross-term.
    pub variance: Vec<f64>,
    /// Per-bin flag bits (see [`bin`]).
    pub flags: Vec<u8>,
}

impl CalibratedSpectrum {
    /// Number of wavelength bins.
    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    /// True when the spectrum has no bins.
    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }
}

/// A spectrum tagged with the source it was extracted for.
#[derive(Debug, Clone)]
pub struct SourceSpectrum {
    /// Originating source id.
    pub source_id: u32,
    /// The extracted instrumental spectrum.
    pub spectrum: ExtractedSpectrum,
}
