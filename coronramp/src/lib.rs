//! Coronramp - ramp-level corrections for coronagraphic infrared exposures.
//!
//! This library turns raw up-the-ramp detector cubes into rate images with
//! corrections tuned for high-contrast imaging:
//! - Saturation flag growth without diagonal neighbors
//! - Pseudo reference pixels on subarrays
//! - kTC bias removal from robust per-pixel ramp fits
//! - 1/f stripe removal with masked per-channel row models
//! - Rate-cube outlier flags folded back into the ramp
//!
//! Standard calibration steps, reference files and product storage are
//! supplied by the caller through [`StepRunner`], [`ReferenceLookup`] and
//! [`ProductSink`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use coronramp::{Coron1Pipeline, CorrectionConfig};
//!
//! let config = CorrectionConfig::from_file(Path::new("coron1.yaml"))?;
//! let mut pipeline = Coron1Pipeline::new(config, runner, references)?;
//! let output = pipeline.process(ramp)?;
//! ```

pub(crate) mod common;
pub mod config;
pub mod dq;
pub mod error;
pub mod fnoise;
pub mod mask;
pub mod math;
pub mod outliers;
pub mod pipeline;
pub mod ramp;
pub mod slope_fit;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Data model
// ============================================================================

pub use ::common::Frame;
pub use dq::DqFlags;
pub use error::{Error, Result};
pub use ramp::{
    CoronagraphGeometry, ExposureMeta, Instrument, RampCube, RampShape, RateCube, RateImage,
    RateProducts,
};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{CorrectionConfig, RefPixBorders, SaturationConfig, SavePolicy, StepSkips};

// ============================================================================
// Corrections
// ============================================================================

pub use fnoise::{FnoiseConfig, FnoiseModel, SavgolConfig, subtract_fnoise};
pub use mask::{Connectivity, expand_mask};
pub use outliers::{
    CubeOutlierDetector, OutlierConfig, OutlierStatus, SigmaClipOutlierDetector,
    apply_rateint_outliers,
};
pub use slope_fit::{ExposureSlopes, RampFit, SlopeFitConfig, fit_exposure_slopes, fit_integration};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{
    CachedReferenceLookup, Coron1Pipeline, MaxCores, NullSink, PipelineOutput, ProductSink,
    RampFitParams, ReferenceKind, ReferenceLookup, StandardStep, StepKind, StepOutput, StepRunner,
};
