//! Top-level error aggregation for pipeline drivers.

use thiserror::Error;

use crate::aperture::ApertureError;
use crate::cube::CubeError;
use crate::io::fits::FitsError;
use crate::redshift::EngineError;
use crate::stack::StackError;

/// Any fatal error a pipeline driver can hit. Non-fatal conditions
/// (insufficient data, invalid calibration, empty detections) never reach
/// this type; they travel as mask flags or per-source results.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Cube construction or validation failed.
    #[error(transparent)]
    Cube(#[from] CubeError),

    /// Stacking failed structurally.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Aperture configuration or construction failed.
    #[error(transparent)]
    Aperture(#[from] ApertureError),

    /// Redshift engine failed for a source being handled individually.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Cube file I/O failed.
    #[error(transparent)]
    Fits(#[from] FitsError),
}
