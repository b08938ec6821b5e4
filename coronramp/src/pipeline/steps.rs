//! Contracts of the collaborators the pipeline drives.
//!
//! Standard calibration steps, reference data and product storage live
//! outside this crate; the pipeline only sequences them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::common::Frame;
use crate::ramp::{ExposureMeta, Instrument, RampCube, RateCube, RateImage, RateProducts};

/// Identity of a standard step, used for skipping, saving and logging.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    GroupScale,
    DqInit,
    Saturation,
    Ipc,
    Superbias,
    Refpix,
    Linearity,
    Persistence,
    DarkCurrent,
    ChargeMigration,
    Jump,
    Firstframe,
    Lastframe,
    Reset,
    Rscd,
    RampFit,
    GainScale,
}

impl StepKind {
    /// Scale steps report themselves skipped when the data needs no scaling;
    /// such results are never saved.
    pub fn is_scale_step(self) -> bool {
        matches!(self, StepKind::GroupScale | StepKind::GainScale)
    }
}

/// A standard ramp-level step with the parameters the pipeline controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardStep {
    GroupScale,
    DqInit,
    Saturation {
        n_pix_grow_sat: usize,
        grow_diagonal: bool,
    },
    Ipc,
    Superbias,
    RefPix {
        use_side_ref_pixels: bool,
    },
    Linearity,
    Persistence,
    DarkCurrent,
    ChargeMigration,
    Jump,
    FirstFrame,
    LastFrame,
    Reset,
    Rscd,
}

impl StandardStep {
    pub fn kind(&self) -> StepKind {
        match self {
            StandardStep::GroupScale => StepKind::GroupScale,
            StandardStep::DqInit => StepKind::DqInit,
            StandardStep::Saturation { .. } => StepKind::Saturation,
            StandardStep::Ipc => StepKind::Ipc,
            StandardStep::Superbias => StepKind::Superbias,
            StandardStep::RefPix { .. } => StepKind::Refpix,
            StandardStep::Linearity => StepKind::Linearity,
            StandardStep::Persistence => StepKind::Persistence,
            StandardStep::DarkCurrent => StepKind::DarkCurrent,
            StandardStep::ChargeMigration => StepKind::ChargeMigration,
            StandardStep::Jump => StepKind::Jump,
            StandardStep::FirstFrame => StepKind::Firstframe,
            StandardStep::LastFrame => StepKind::Lastframe,
            StandardStep::Reset => StepKind::Reset,
            StandardStep::Rscd => StepKind::Rscd,
        }
    }
}

/// Product of a step plus whether the step reported itself skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput<T> {
    pub product: T,
    pub skipped: bool,
}

impl<T> StepOutput<T> {
    pub fn ran(product: T) -> Self {
        Self {
            product,
            skipped: false,
        }
    }

    pub fn skipped(product: T) -> Self {
        Self {
            product,
            skipped: true,
        }
    }
}

/// Worker budget handed to the external ramp fit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MaxCores {
    None,
    #[default]
    Quarter,
    Half,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RampFitParams {
    pub max_cores: MaxCores,
    /// Skip pixels whose ramp has a single usable group.
    pub suppress_one_group: bool,
}

/// Runs standard calibration steps.
pub trait StepRunner {
    fn run_ramp_step(
        &mut self,
        step: StandardStep,
        ramp: RampCube,
    ) -> anyhow::Result<StepOutput<RampCube>>;

    /// Fit slopes. `rateints` is present for multi-integration exposures.
    fn ramp_fit(
        &mut self,
        ramp: &RampCube,
        params: &RampFitParams,
    ) -> anyhow::Result<StepOutput<RateProducts>>;

    fn gain_scale_rate(&mut self, rate: RateImage) -> anyhow::Result<StepOutput<RateImage>>;

    fn gain_scale_rateints(&mut self, rateints: RateCube)
    -> anyhow::Result<StepOutput<RateCube>>;
}

/// Per-pixel reference data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReferenceKind {
    Saturation,
}

/// Source of per-pixel reference arrays already cut to the exposure's
/// subarray.
pub trait ReferenceLookup {
    fn get_reference(&mut self, meta: &ExposureMeta, kind: ReferenceKind)
    -> anyhow::Result<Frame<f32>>;
}

/// Memoizes an inner lookup per `(kind, instrument, subarray)`.
///
/// Entries are never invalidated.
#[derive(Debug)]
pub struct CachedReferenceLookup<L> {
    inner: L,
    cache: HashMap<(ReferenceKind, Instrument, String), Frame<f32>>,
}

impl<L: ReferenceLookup> CachedReferenceLookup<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<L: ReferenceLookup> ReferenceLookup for CachedReferenceLookup<L> {
    fn get_reference(
        &mut self,
        meta: &ExposureMeta,
        kind: ReferenceKind,
    ) -> anyhow::Result<Frame<f32>> {
        let key = (kind, meta.instrument, meta.subarray.to_ascii_uppercase());
        match self.cache.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let frame = self
                    .inner
                    .get_reference(meta, kind)
                    .with_context(|| {
                        format!(
                            "Failed to get {kind} reference for {} {}",
                            meta.instrument, meta.subarray
                        )
                    })?;
                debug!(
                    %kind,
                    instrument = %meta.instrument,
                    subarray = %meta.subarray,
                    "Cached reference"
                );
                Ok(entry.insert(frame).clone())
            }
        }
    }
}

/// Destination for intermediate and final products.
pub trait ProductSink {
    fn save_ramp(&mut self, ramp: &RampCube, suffix: &str) -> anyhow::Result<()>;

    fn save_rate(&mut self, rate: &RateImage, suffix: &str) -> anyhow::Result<()>;

    fn save_rateints(&mut self, rateints: &RateCube, suffix: &str) -> anyhow::Result<()>;
}

/// Drops every product.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProductSink for NullSink {
    fn save_ramp(&mut self, _ramp: &RampCube, _suffix: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn save_rate(&mut self, _rate: &RateImage, _suffix: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn save_rateints(&mut self, _rateints: &RateCube, _suffix: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
