//! Translation boundary to the external redshift-fitting engine.
//!
//! This module performs no scientific computation. It packages calibrated
//! spectra into the engine's input contract, invokes the engine with an
//! explicit per-source timeout, and associates each result (or failure)
//! back to the originating source id. One slow or failing source never
//! aborts the rest of the batch.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spectrum::CalibratedSpectrum;

/// Input contract for one source: everything the engine needs to fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Originating source id.
    pub source_id: u32,
    /// Wavelength per bin, Angstroms.
    pub wavelength: Vec<f64>,
    /// Calibrated flux per bin.
    pub flux: Vec<f64>,
    /// Combined variance per bin.
    pub variance: Vec<f64>,
    /// Per-bin flag bytes; nonzero bins carry reduced or no weight.
    pub mask: Vec<u8>,
}

impl EngineRequest {
    /// Package a calibrated spectrum for the engine.
    pub fn from_spectrum(source_id: u32, spectrum: &CalibratedSpectrum) -> Self {
        Self {
            source_id,
            wavelength: spectrum.wavelength.clone(),
            flux: spectrum.flux.clone(),
            variance: spectrum.variance.clone(),
            mask: spectrum.flags.clone(),
        }
    }
}

/// One fit result returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFit {
    /// Best-fit redshift.
    pub redshift: f64,
    /// Classification label (galaxy, star, quasar, ...).
    pub classification: String,
    /// Fit quality score; larger is better.
    pub quality: f64,
}

/// Per-source engine failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine did not answer within the allotted time.
    #[error("engine timed out after {0:.1} s for source {1}")]
    Timeout(f64, u32),

    /// The engine reported a failure for this source.
    #[error("engine failed for source {source_id}: {reason}")]
    Failed {
        /// Source the failure applies to.
        source_id: u32,
        /// Engine-reported reason.
        reason: String,
    },
}

/// The external redshift engine, seen from this side of the boundary.
///
/// Implementations wrap whatever transport the deployment uses; the
/// pipeline only relies on this synchronous fit call.
pub trait RedshiftEngine: Send + Sync {
    /// Fit one source's spectrum, returning the best-fit result.
    fn fit(&self, request: &EngineRequest) -> Result<EngineFit, EngineError>;
}

/// Fit a batch of requests with a per-source timeout.
///
/// Requests run sequentially against the engine, each on a worker thread so
/// a hung call can be abandoned at the deadline. Results keep the input
/// order and every entry is either a fit or a per-source error; the batch
/// itself always completes.
pub fn fit_batch<E>(
    engine: Arc<E>,
    requests: Vec<EngineRequest>,
    timeout: Duration,
) -> Vec<(u32, Result<EngineFit, EngineError>)>
where
    E: RedshiftEngine + 'static,
{
    requests
        .into_iter()
        .map(|request| {
            let source_id = request.source_id;
            let engine = Arc::clone(&engine);
            let (tx, rx) = mpsc::channel();
            // The worker is detached on timeout; it finishes (or hangs) on
            // its own while the batch moves on.
            thread::spawn(move || {
                let result = engine.fit(&request);
                let _ = tx.send(result);
            });
            let result = match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "redshift engine timed out after {:.1} s for source {}",
                        timeout.as_secs_f64(),
                        source_id
                    );
                    Err(EngineError::Timeout(timeout.as_secs_f64(), source_id))
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Failed {
                    source_id,
                    reason: "engine worker terminated without a result".into(),
                }),
            };
            (source_id, result)
        })
        .collect()
}
