//! Stage-1 correction pipeline for coronagraphic ramps.
//!
//! [`Coron1Pipeline`] sequences the standard calibration steps, supplied by
//! a [`StepRunner`], with the custom corrections of this crate: saturation
//! flag growth, pseudo reference pixels, kTC bias removal, 1/f stripe
//! removal and rateint outlier flagging.

pub mod corrections;
pub mod refpix;
pub mod saturation;
pub mod steps;

#[cfg(test)]
mod tests;

use anyhow::Context;
use tracing::info;

use crate::config::CorrectionConfig;
use crate::outliers::{SigmaClipOutlierDetector, apply_rateint_outliers};
use crate::ramp::{Instrument, RampCube, RateCube, RateImage, RateProducts};

pub use crate::outliers::{CubeOutlierDetector, OutlierStatus};
pub use corrections::{remove_bias, remove_stripes, subtract_bias};
pub use refpix::{BorderRegions, run_refpix, uses_pseudo_refpix};
pub use saturation::run_custom_saturation;
pub use steps::{
    CachedReferenceLookup, MaxCores, NullSink, ProductSink, RampFitParams, ReferenceKind,
    ReferenceLookup, StandardStep, StepKind, StepOutput, StepRunner,
};

/// Final products of [`Coron1Pipeline::process`].
pub type PipelineOutput = RateProducts;

/// Ramp-to-rate pipeline driving external steps and in-crate corrections.
pub struct Coron1Pipeline<R, L, D = SigmaClipOutlierDetector, S = NullSink> {
    config: CorrectionConfig,
    runner: R,
    references: CachedReferenceLookup<L>,
    detector: D,
    sink: S,
}

impl<R: StepRunner, L: ReferenceLookup> Coron1Pipeline<R, L> {
    pub fn new(config: CorrectionConfig, runner: R, references: L) -> anyhow::Result<Self> {
        config
            .validate()
            .context("Invalid pipeline configuration")?;
        Ok(Self {
            config,
            runner,
            references: CachedReferenceLookup::new(references),
            detector: SigmaClipOutlierDetector,
            sink: NullSink,
        })
    }
}

impl<R, L, D, S> Coron1Pipeline<R, L, D, S>
where
    R: StepRunner,
    L: ReferenceLookup,
    D: CubeOutlierDetector,
    S: ProductSink,
{
    pub fn with_detector<D2: CubeOutlierDetector>(
        self,
        detector: D2,
    ) -> Coron1Pipeline<R, L, D2, S> {
        Coron1Pipeline {
            config: self.config,
            runner: self.runner,
            references: self.references,
            detector,
            sink: self.sink,
        }
    }

    pub fn with_sink<S2: ProductSink>(self, sink: S2) -> Coron1Pipeline<R, L, D, S2> {
        Coron1Pipeline {
            config: self.config,
            runner: self.runner,
            references: self.references,
            detector: self.detector,
            sink,
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn references(&self) -> &CachedReferenceLookup<L> {
        &self.references
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Correct `ramp` and fit it into rate products.
    pub fn process(&mut self, ramp: RampCube) -> anyhow::Result<PipelineOutput> {
        let shape = ramp.shape();
        info!(
            instrument = %ramp.meta.instrument,
            subarray = %ramp.meta.subarray,
            nints = shape.nints,
            ngroups = shape.ngroups,
            "Starting coron1 pipeline"
        );

        let ramp = match ramp.meta.instrument {
            Instrument::Miri => self.miri_corrections(ramp)?,
            Instrument::Nircam | Instrument::Niriss => self.near_ir_corrections(ramp)?,
        };

        if self.config.save.save_ramp() {
            self.sink
                .save_ramp(&ramp, "ramp")
                .context("Failed to save calibrated ramp")?;
        }

        let first = self.fit_ramp(&ramp)?;
        let flagged = match (&first.rateints, self.config.rate_int_outliers) {
            (Some(rateints), true) => {
                let (ramp, status) =
                    apply_rateint_outliers(rateints, ramp, &self.detector, &self.config.outliers)?;
                (!status.is_skipped()).then_some(ramp)
            }
            _ => None,
        };
        let products = match flagged {
            Some(ramp) => {
                info!("Refitting ramp after outlier flagging");
                self.fit_ramp(&ramp)?
            }
            None => first,
        };

        self.finish_products(products)
    }

    fn miri_corrections(&mut self, ramp: RampCube) -> anyhow::Result<RampCube> {
        let saturation = StandardStep::Saturation {
            n_pix_grow_sat: self.config.saturation.n_pix_grow_sat,
            grow_diagonal: self.config.saturation.grow_diagonal,
        };
        let mut ramp = ramp;
        for step in [
            StandardStep::GroupScale,
            StandardStep::DqInit,
            saturation,
            StandardStep::Ipc,
            StandardStep::FirstFrame,
            StandardStep::LastFrame,
            StandardStep::Reset,
            StandardStep::Linearity,
            StandardStep::Rscd,
            StandardStep::DarkCurrent,
        ] {
            ramp = self.run_step(step, ramp)?;
        }
        ramp = self.do_refpix(ramp)?;
        ramp = self.run_step(StandardStep::ChargeMigration, ramp)?;
        self.run_step(StandardStep::Jump, ramp)
    }

    fn near_ir_corrections(&mut self, ramp: RampCube) -> anyhow::Result<RampCube> {
        let mut ramp = self.run_step(StandardStep::GroupScale, ramp)?;
        ramp = self.run_step(StandardStep::DqInit, ramp)?;
        ramp = self.do_saturation(ramp)?;
        ramp = self.run_step(StandardStep::Ipc, ramp)?;
        ramp = self.run_step(StandardStep::Superbias, ramp)?;
        ramp = self.do_refpix(ramp)?;
        for step in [
            StandardStep::Linearity,
            StandardStep::Persistence,
            StandardStep::DarkCurrent,
            StandardStep::ChargeMigration,
            StandardStep::Jump,
        ] {
            ramp = self.run_step(step, ramp)?;
        }

        if self.config.bias_removal_enabled() {
            let sat_thresh = self
                .references
                .get_reference(&ramp.meta, ReferenceKind::Saturation)?;
            ramp = remove_bias(ramp, &sat_thresh, &self.config.slope_fit())
                .context("kTC bias removal failed")?;
            if self.config.remove_fnoise {
                ramp = remove_stripes(ramp, &sat_thresh, &self.config.fnoise())
                    .context("1/f noise removal failed")?;
            }
        }
        Ok(ramp)
    }

    /// Run one standard step unless configuration skips it.
    fn run_step(&mut self, step: StandardStep, ramp: RampCube) -> anyhow::Result<RampCube> {
        let kind = step.kind();
        if self.config.skips.is_skipped(kind) {
            info!(step = %kind, "Step skipped by configuration");
            return Ok(ramp);
        }
        let output = self
            .runner
            .run_ramp_step(step, ramp)
            .with_context(|| format!("Step {kind} failed"))?;
        self.finish_step(kind, output)
    }

    fn do_saturation(&mut self, mut ramp: RampCube) -> anyhow::Result<RampCube> {
        let kind = StepKind::Saturation;
        if self.config.skips.is_skipped(kind) {
            // RC pixels are saturated even without the step.
            if self.config.saturation.flag_rcsat {
                saturation::flag_rc_saturated(&mut ramp);
            }
            info!(step = %kind, "Step skipped by configuration");
            return Ok(ramp);
        }
        let output = run_custom_saturation(&mut self.runner, ramp, &self.config.saturation)
            .with_context(|| format!("Step {kind} failed"))?;
        self.finish_step(kind, output)
    }

    fn do_refpix(&mut self, ramp: RampCube) -> anyhow::Result<RampCube> {
        let kind = StepKind::Refpix;
        if self.config.skips.is_skipped(kind) {
            info!(step = %kind, "Step skipped by configuration");
            return Ok(ramp);
        }
        let output = run_refpix(&mut self.runner, ramp, &self.config.refpix)
            .with_context(|| format!("Step {kind} failed"))?;
        self.finish_step(kind, output)
    }

    /// Save a step's ramp product when the save policy asks for it.
    fn finish_step(
        &mut self,
        kind: StepKind,
        output: StepOutput<RampCube>,
    ) -> anyhow::Result<RampCube> {
        let suppressed = kind.is_scale_step() && output.skipped;
        if !suppressed && self.config.save.should_save_step(kind, None) {
            self.sink
                .save_ramp(&output.product, &kind.to_string())
                .with_context(|| format!("Failed to save {kind} product"))?;
        }
        Ok(output.product)
    }

    fn fit_ramp(&mut self, ramp: &RampCube) -> anyhow::Result<RateProducts> {
        if self.config.skips.is_skipped(StepKind::RampFit) {
            info!(step = %StepKind::RampFit, "Step skipped by configuration");
            return Ok(RateProducts::default());
        }
        let params = self.config.ramp_fit_params();
        let output = self
            .runner
            .ramp_fit(ramp, &params)
            .context("Ramp fit failed")?;
        Ok(output.product)
    }

    /// Gain-scale both products and save them.
    fn finish_products(&mut self, products: RateProducts) -> anyhow::Result<PipelineOutput> {
        let skip_gain = self.config.skips.is_skipped(StepKind::GainScale);
        let save = self.config.save.save_products();

        let rate = match products.rate {
            Some(rate) => Some(self.gain_scale_rate(rate, skip_gain)?),
            None => {
                info!("No rate image from ramp fit, gain scale skipped");
                None
            }
        };

        let rateints = match products.rateints {
            Some(rateints) => {
                let rateints = self.gain_scale_rateints(rateints, skip_gain)?;
                if save {
                    self.sink
                        .save_rateints(&rateints, "rateints")
                        .context("Failed to save rateints")?;
                }
                Some(rateints)
            }
            None => None,
        };

        if let (Some(rate), true) = (&rate, save) {
            self.sink
                .save_rate(rate, "rate")
                .context("Failed to save rate")?;
        }

        info!(
            rate = rate.is_some(),
            rateints = rateints.as_ref().map_or(0, RateCube::nints),
            "Coron1 pipeline finished"
        );
        Ok(PipelineOutput { rate, rateints })
    }

    fn gain_scale_rate(&mut self, rate: RateImage, skip: bool) -> anyhow::Result<RateImage> {
        if skip {
            return Ok(rate);
        }
        let output = self
            .runner
            .gain_scale_rate(rate)
            .context("Gain scale of rate failed")?;
        Ok(output.product)
    }

    fn gain_scale_rateints(&mut self, rateints: RateCube, skip: bool) -> anyhow::Result<RateCube> {
        if skip {
            return Ok(rateints);
        }
        let output = self
            .runner
            .gain_scale_rateints(rateints)
            .context("Gain scale of rateints failed")?;
        Ok(output.product)
    }
}
