//! End-to-end pipeline test on synthetic cubes: stack dithered exposures,
//! detect the source, extract its spectrum, calibrate, and fit with a stub
//! engine.

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use cubex::aperture::AperturePolicy;
use cubex::calibrate::{calibrate, ZeropointRecord};
use cubex::cube::{SpatialWcs, SpecCube, WavelengthSolution};
use cubex::detect::{detect_sources, DetectConfig};
use cubex::extract::extract_sources;
use cubex::redshift::{fit_batch, EngineError, EngineFit, EngineRequest, RedshiftEngine};
use cubex::spectrum::bin;
use cubex::stack::{stack_cubes, StackConfig};

const N_BINS: usize = 20;
const FIELD: usize = 32;
const SOURCE_X: f64 = 15.0;
const SOURCE_Y: f64 = 14.0;
const PEAK_FLUX: f64 = 200.0;
const BACKGROUND_SIGMA: f64 = 1.0;

/// One synthetic exposure: Gaussian source on a noisy background, constant
/// along wavelength, with seeded read noise so the test is reproducible.
fn synthetic_exposure(seed: u64) -> SpecCube {
    let dim = (N_BINS, FIELD, FIELD);
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, BACKGROUND_SIGMA).unwrap();
    let sigma_psf = 1.5_f64;

    let mut flux = Array3::zeros(dim);
    for k in 0..N_BINS {
        for r in 0..FIELD {
            for c in 0..FIELD {
                let dx = c as f64 - SOURCE_X;
                let dy = r as f64 - SOURCE_Y;
                let signal =
                    PEAK_FLUX * (-(dx * dx + dy * dy) / (2.0 * sigma_psf * sigma_psf)).exp();
                flux[[k, r, c]] = signal + noise.sample(&mut rng);
            }
        }
    }

    SpecCube::new(
        flux,
        Array3::from_elem(dim, BACKGROUND_SIGMA * BACKGROUND_SIGMA),
        Array3::zeros(dim),
        WavelengthSolution::linear(4750.0, 1.25, N_BINS).unwrap(),
        SpatialWcs::pixel_grid(),
        Some(ZeropointRecord {
            value: 2.0,
            uncertainty: 0.02,
            valid: true,
        }),
    )
    .unwrap()
}

struct ConstantEngine;

impl RedshiftEngine for ConstantEngine {
    fn fit(&self, request: &EngineRequest) -> Result<EngineFit, EngineError> {
        // A real engine fits templates; the stub just checks the contract.
        assert_eq!(request.wavelength.len(), N_BINS);
        assert_eq!(request.flux.len(), N_BINS);
        assert_eq!(request.variance.len(), N_BINS);
        assert_eq!(request.mask.len(), N_BINS);
        Ok(EngineFit {
            redshift: 0.731,
            classification: "GALAXY".into(),
            quality: 0.97,
        })
    }
}

#[test]
fn test_full_pipeline_on_synthetic_exposures() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Three exposures of the same field with different noise realizations.
    let exposures = vec![
        synthetic_exposure(11),
        synthetic_exposure(12),
        synthetic_exposure(13),
    ];

    let stacked = stack_cubes(&exposures, None, &StackConfig::default()).unwrap();
    assert_eq!(stacked.dim(), (N_BINS, FIELD, FIELD));

    // Stacking three equal-variance exposures cuts the variance to a third.
    let stacked_var = stacked.variance()[[0, 2, 2]];
    assert_relative_eq!(
        stacked_var,
        BACKGROUND_SIGMA * BACKGROUND_SIGMA / 3.0,
        max_relative = 0.01
    );

    // The source stands out well above 5 sigma in the collapse.
    let sources = detect_sources(&stacked, &DetectConfig::default());
    assert_eq!(sources.len(), 1, "expected exactly one detection");
    let source = &sources[0];
    assert_relative_eq!(source.x, SOURCE_X, epsilon = 0.2);
    assert_relative_eq!(source.y, SOURCE_Y, epsilon = 0.2);
    assert!(source.significance > 50.0);

    // Extract with a generous fixed aperture.
    let policy = AperturePolicy::Fixed { scale: 3.0 };
    let results = extract_sources(&stacked, &sources, &policy);
    assert_eq!(results.len(), 1);
    let extraction = results[0].1.as_ref().expect("extraction should succeed");
    let spectrum = &extraction.spectrum;
    assert_eq!(spectrum.len(), N_BINS);

    // Each bin should recover most of the Gaussian's integrated flux,
    // 2*pi*peak*sigma^2, with all bins clean.
    let total_flux = 2.0 * std::f64::consts::PI * PEAK_FLUX * 1.5 * 1.5;
    for k in 0..N_BINS {
        assert_eq!(spectrum.flags[k], 0);
        assert_relative_eq!(spectrum.flux[k], total_flux, max_relative = 0.1);
    }

    // Calibrate with the stacked cube's zeropoint.
    let zeropoint = stacked.zeropoint().copied().expect("zeropoint present");
    let calibrated = calibrate(spectrum, &zeropoint);
    for k in 0..N_BINS {
        assert_relative_eq!(
            calibrated.flux[k],
            spectrum.flux[k] * 2.0,
            epsilon = 1e-9
        );
        assert!(bin::is_usable(calibrated.flags[k]));
    }

    // Hand the calibrated spectrum to the engine adapter.
    let request = EngineRequest::from_spectrum(source.id, &calibrated);
    let fits = fit_batch(
        Arc::new(ConstantEngine),
        vec![request],
        Duration::from_secs(5),
    );
    assert_eq!(fits.len(), 1);
    assert_eq!(fits[0].0, source.id);
    let fit = fits[0].1.as_ref().unwrap();
    assert_relative_eq!(fit.redshift, 0.731, epsilon = 1e-12);
    assert_eq!(fit.classification, "GALAXY");
}

#[test]
fn test_pipeline_with_dithered_offsets() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Exposure B is dithered one pixel in each axis: the same sky position
    // lands at (SOURCE_X + 1, SOURCE_Y + 1) on its grid. Supplying the
    // offsets registers it back onto the reference grid.
    let a = synthetic_exposure(21);
    let b_dim = (N_BINS, FIELD, FIELD);
    let mut rng = StdRng::seed_from_u64(22);
    let noise = Normal::new(0.0, BACKGROUND_SIGMA).unwrap();
    let mut flux = Array3::zeros(b_dim);
    for k in 0..N_BINS {
        for r in 0..FIELD {
            for c in 0..FIELD {
                let dx = c as f64 - (SOURCE_X + 1.0);
                let dy = r as f64 - (SOURCE_Y + 1.0);
                let signal = PEAK_FLUX * (-(dx * dx + dy * dy) / (2.0 * 1.5 * 1.5)).exp();
                flux[[k, r, c]] = signal + noise.sample(&mut rng);
            }
        }
    }
    let b = SpecCube::new(
        flux,
        Array3::from_elem(b_dim, BACKGROUND_SIGMA * BACKGROUND_SIGMA),
        Array3::zeros(b_dim),
        WavelengthSolution::linear(4750.0, 1.25, N_BINS).unwrap(),
        SpatialWcs::pixel_grid(),
        None,
    )
    .unwrap();

    let offsets = vec![
        cubex::SpatialOffset { dx: 0.0, dy: 0.0 },
        cubex::SpatialOffset { dx: 1.0, dy: 1.0 },
    ];
    let stacked = stack_cubes(&[a, b], Some(&offsets), &StackConfig::default()).unwrap();

    let sources = detect_sources(&stacked, &DetectConfig::default());
    assert_eq!(sources.len(), 1);
    assert_relative_eq!(sources[0].x, SOURCE_X, epsilon = 0.2);
    assert_relative_eq!(sources[0].y, SOURCE_Y, epsilon = 0.2);
}

#[test]
fn test_invalid_zeropoint_propagates_to_engine_mask() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cube = synthetic_exposure(31);
    let sources = detect_sources(&cube, &DetectConfig::default());
    assert!(!sources.is_empty());

    let results = extract_sources(&cube, &sources, &AperturePolicy::Fixed { scale: 3.0 });
    let spectrum = &results[0].1.as_ref().unwrap().spectrum;

    let calibrated = calibrate(spectrum, &ZeropointRecord::invalid());
    let request = EngineRequest::from_spectrum(sources[0].id, &calibrated);

    // Every bin the engine sees is flagged unusable.
    assert!(request.mask.iter().all(|&m| !bin::is_usable(m)));
}
