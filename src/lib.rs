//! Spectral extraction toolkit for astronomical data cubes.
//!
//! Extracts one-dimensional spectra for discrete sources from 3D
//! spectroscopic cubes (two spatial axes, one wavelength axis), calibrates
//! their flux against a per-exposure zeropoint, and packages them for an
//! external redshift-fitting engine.
//!
//! # Pipeline
//!
//! raw cubes -> [`stack`] -> stacked [`cube::SpecCube`] -> [`detect`] ->
//! source list -> [`aperture`] -> per-source weight masks -> [`extract`] ->
//! instrumental spectra -> [`calibrate`] -> calibrated spectra ->
//! [`redshift`] adapter -> external engine.
//!
//! All stages operate on immutable cubes shared by reference; per-source
//! work fans out across a rayon pool. Data shortfalls (masked voxels,
//! missing calibration, empty detections) propagate as flags, never as
//! aborts; only structural mismatches and bad configuration are fatal.

pub mod aperture;
pub mod calibrate;
pub mod cube;
pub mod detect;
pub mod error;
pub mod extract;
pub mod io;
pub mod psf;
pub mod redshift;
pub mod resample;
pub mod source;
pub mod spectrum;
pub mod stack;

// Re-export the core pipeline surface.
pub use aperture::{build_weight_mask, AperturePolicy, ApertureError, WeightMask, WeightPlane};
pub use calibrate::{calibrate, ZeropointRecord};
pub use cube::{SpatialWcs, SpecCube, WavelengthSolution};
pub use detect::{detect_sources, DetectConfig};
pub use error::PipelineError;
pub use extract::{extract_sources, extract_spectrum, BinMeasurement, BinMeasurements};
pub use psf::GaussianPsf;
pub use redshift::{fit_batch, EngineFit, EngineRequest, RedshiftEngine};
pub use resample::SpatialOffset;
pub use source::Source;
pub use spectrum::{CalibratedSpectrum, ExtractedSpectrum, SourceSpectrum};
pub use stack::{stack_cubes, StackConfig, StackError};
