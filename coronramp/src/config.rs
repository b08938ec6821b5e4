//! Typed configuration for the correction pipeline.
//!
//! Every field has a default, so a YAML file only needs the keys it changes.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fnoise::{FnoiseConfig, FnoiseModel, SavgolConfig};
use crate::outliers::OutlierConfig;
use crate::pipeline::{MaxCores, RampFitParams, StepKind};
use crate::slope_fit::SlopeFitConfig;

/// Border width used when neither side of an axis has reference pixels.
pub const DEFAULT_BORDER: usize = 4;

/// Saturation flag growth policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationConfig {
    /// Pixels to grow saturation flags by.
    /// Default: 1
    pub n_pix_grow_sat: usize,
    /// Let the outermost growth ring include diagonal neighbors.
    /// Default: false
    pub grow_diagonal: bool,
    /// Treat RC pixels as saturated in every group.
    /// Default: true
    pub flag_rcsat: bool,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self {
            n_pix_grow_sat: 1,
            grow_diagonal: false,
            flag_rcsat: true,
        }
    }
}

/// Rows and columns temporarily treated as reference pixels on subarrays.
///
/// Lower is the row-0 side, left the column-0 side. Offsets move the border
/// inward from the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefPixBorders {
    pub nlower: usize,
    pub nupper: usize,
    pub nleft: usize,
    pub nright: usize,
    pub nrow_off: usize,
    pub ncol_off: usize,
}

impl Default for RefPixBorders {
    fn default() -> Self {
        Self {
            nlower: DEFAULT_BORDER,
            nupper: DEFAULT_BORDER,
            nleft: 0,
            nright: 0,
            nrow_off: 0,
            ncol_off: 0,
        }
    }
}

impl RefPixBorders {
    pub fn none() -> Self {
        Self {
            nlower: 0,
            nupper: 0,
            nleft: 0,
            nright: 0,
            nrow_off: 0,
            ncol_off: 0,
        }
    }

    /// Borders from known per-aperture counts `[lower, upper, left, right]`.
    ///
    /// An axis with no reference pixels on either side gets
    /// [`DEFAULT_BORDER`] on both sides.
    pub fn with_aperture_defaults(known: Option<[usize; 4]>) -> Self {
        let [mut nlower, mut nupper, mut nleft, mut nright] = known.unwrap_or([0; 4]);
        if nlower + nupper == 0 {
            nlower = DEFAULT_BORDER;
            nupper = DEFAULT_BORDER;
        }
        if nleft + nright == 0 {
            nleft = DEFAULT_BORDER;
            nright = DEFAULT_BORDER;
        }
        Self {
            nlower,
            nupper,
            nleft,
            nright,
            ..Self::none()
        }
    }

    pub fn with_offsets(mut self, nrow_off: usize, ncol_off: usize) -> Self {
        self.nrow_off = nrow_off;
        self.ncol_off = ncol_off;
        self
    }

    /// Sum of the four border widths.
    pub fn total(&self) -> usize {
        self.nlower + self.nupper + self.nleft + self.nright
    }

    pub fn has_side_columns(&self) -> bool {
        self.nleft + self.nright > 0
    }
}

/// Standard steps turned off by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSkips {
    pub group_scale: bool,
    pub dq_init: bool,
    pub saturation: bool,
    pub ipc: bool,
    pub superbias: bool,
    pub refpix: bool,
    pub linearity: bool,
    pub persistence: bool,
    pub dark_current: bool,
    pub charge_migration: bool,
    pub jump: bool,
    pub firstframe: bool,
    pub lastframe: bool,
    pub reset: bool,
    pub rscd: bool,
    pub ramp_fit: bool,
    pub gain_scale: bool,
}

impl Default for StepSkips {
    fn default() -> Self {
        Self {
            group_scale: false,
            dq_init: false,
            saturation: false,
            ipc: true,
            superbias: false,
            refpix: false,
            linearity: false,
            persistence: true,
            dark_current: true,
            charge_migration: false,
            jump: false,
            firstframe: false,
            lastframe: false,
            reset: false,
            rscd: false,
            ramp_fit: false,
            gain_scale: false,
        }
    }
}

impl StepSkips {
    pub fn is_skipped(&self, kind: StepKind) -> bool {
        match kind {
            StepKind::GroupScale => self.group_scale,
            StepKind::DqInit => self.dq_init,
            StepKind::Saturation => self.saturation,
            StepKind::Ipc => self.ipc,
            StepKind::Superbias => self.superbias,
            StepKind::Refpix => self.refpix,
            StepKind::Linearity => self.linearity,
            StepKind::Persistence => self.persistence,
            StepKind::DarkCurrent => self.dark_current,
            StepKind::ChargeMigration => self.charge_migration,
            StepKind::Jump => self.jump,
            StepKind::Firstframe => self.firstframe,
            StepKind::Lastframe => self.lastframe,
            StepKind::Reset => self.reset,
            StepKind::Rscd => self.rscd,
            StepKind::RampFit => self.ramp_fit,
            StepKind::GainScale => self.gain_scale,
        }
    }

    /// Every step enabled.
    pub fn none() -> Self {
        Self {
            ipc: false,
            persistence: false,
            dark_current: false,
            ..Self::default()
        }
    }

    pub fn with_skipped(mut self, kind: StepKind, skip: bool) -> Self {
        let slot = match kind {
            StepKind::GroupScale => &mut self.group_scale,
            StepKind::DqInit => &mut self.dq_init,
            StepKind::Saturation => &mut self.saturation,
            StepKind::Ipc => &mut self.ipc,
            StepKind::Superbias => &mut self.superbias,
            StepKind::Refpix => &mut self.refpix,
            StepKind::Linearity => &mut self.linearity,
            StepKind::Persistence => &mut self.persistence,
            StepKind::DarkCurrent => &mut self.dark_current,
            StepKind::ChargeMigration => &mut self.charge_migration,
            StepKind::Jump => &mut self.jump,
            StepKind::Firstframe => &mut self.firstframe,
            StepKind::Lastframe => &mut self.lastframe,
            StepKind::Reset => &mut self.reset,
            StepKind::Rscd => &mut self.rscd,
            StepKind::RampFit => &mut self.ramp_fit,
            StepKind::GainScale => &mut self.gain_scale,
        };
        *slot = skip;
        self
    }
}

/// Which products are written through the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavePolicy {
    /// Save the final rate and rateints products.
    /// Default: true
    pub save_results: bool,
    /// Save the product of every step that ran.
    /// Default: false
    pub save_intermediates: bool,
    /// Save the corrected ramp before ramp fitting.
    /// Default: false
    pub save_calibrated_ramp: bool,
    /// Steps whose own results are saved.
    pub step_results: Vec<StepKind>,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            save_results: true,
            save_intermediates: false,
            save_calibrated_ramp: false,
            step_results: Vec::new(),
        }
    }
}

impl SavePolicy {
    /// Whether a step that ran should have its product saved.
    ///
    /// An explicit per-call choice wins, then `save_intermediates`, then the
    /// step's own setting.
    pub fn should_save_step(&self, kind: StepKind, explicit: Option<bool>) -> bool {
        match explicit {
            Some(save) => save,
            None => self.save_intermediates || self.step_results.contains(&kind),
        }
    }

    pub fn save_ramp(&self) -> bool {
        self.save_calibrated_ramp || self.save_intermediates
    }

    pub fn save_products(&self) -> bool {
        self.save_results || self.save_intermediates
    }
}

/// Every tunable of the ramp corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub saturation: SaturationConfig,
    pub refpix: RefPixBorders,
    /// Remove the per-integration kTC bias.
    /// Default: true
    pub remove_ktc: bool,
    /// Remove 1/f stripes. Implies bias removal.
    /// Default: true
    pub remove_fnoise: bool,
    pub fnoise_model: FnoiseModel,
    pub savgol: SavgolConfig,
    /// Flag rateint outliers in the ramp and refit.
    /// Default: true
    pub rate_int_outliers: bool,
    pub outliers: OutlierConfig,
    /// Default: 0.5
    pub sat_frac: f32,
    /// Default: 1
    pub polynomial_degree: usize,
    /// Default: false
    pub fit_zero: bool,
    /// Default: false
    pub suppress_one_group: bool,
    pub skips: StepSkips,
    pub save: SavePolicy,
    pub max_cores: MaxCores,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        let slope_fit = SlopeFitConfig::default();
        Self {
            saturation: SaturationConfig::default(),
            refpix: RefPixBorders::default(),
            remove_ktc: true,
            remove_fnoise: true,
            fnoise_model: FnoiseModel::default(),
            savgol: SavgolConfig::default(),
            rate_int_outliers: true,
            outliers: OutlierConfig::default(),
            sat_frac: slope_fit.sat_frac,
            polynomial_degree: slope_fit.degree,
            fit_zero: slope_fit.fit_zero,
            suppress_one_group: false,
            skips: StepSkips::default(),
            save: SavePolicy::default(),
            max_cores: MaxCores::default(),
        }
    }
}

impl CorrectionConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_yml::from_str(yaml).context("Failed to parse correction config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&yaml)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        serde_yml::to_string(self).context("Failed to serialize correction config")
    }

    pub fn validate(&self) -> Result<()> {
        self.slope_fit().validate()?;
        if self.remove_fnoise && self.fnoise_model == FnoiseModel::Savgol {
            self.savgol.validate()?;
        }
        if self.outliers.sigma_cut.is_nan() || self.outliers.sigma_cut <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "outlier sigma_cut must be positive, got {}",
                self.outliers.sigma_cut
            )));
        }
        Ok(())
    }

    /// Whether the kTC bias is fit and subtracted.
    ///
    /// Stripe removal needs bias-free groups, so it turns bias removal on.
    pub fn bias_removal_enabled(&self) -> bool {
        self.remove_ktc || self.remove_fnoise
    }

    pub fn slope_fit(&self) -> SlopeFitConfig {
        SlopeFitConfig {
            sat_frac: self.sat_frac,
            degree: self.polynomial_degree,
            fit_zero: self.fit_zero,
        }
    }

    pub fn fnoise(&self) -> FnoiseConfig {
        FnoiseConfig {
            model: self.fnoise_model,
            savgol: self.savgol,
        }
    }

    pub fn ramp_fit_params(&self) -> RampFitParams {
        RampFitParams {
            max_cores: self.max_cores,
            suppress_one_group: self.suppress_one_group,
        }
    }

    pub fn with_saturation(mut self, saturation: SaturationConfig) -> Self {
        self.saturation = saturation;
        self
    }

    pub fn with_refpix(mut self, refpix: RefPixBorders) -> Self {
        self.refpix = refpix;
        self
    }

    pub fn with_noise_removal(mut self, remove_ktc: bool, remove_fnoise: bool) -> Self {
        self.remove_ktc = remove_ktc;
        self.remove_fnoise = remove_fnoise;
        self
    }

    pub fn with_fnoise_model(mut self, model: FnoiseModel) -> Self {
        self.fnoise_model = model;
        self
    }

    pub fn with_rate_int_outliers(mut self, enabled: bool) -> Self {
        self.rate_int_outliers = enabled;
        self
    }

    pub fn with_outliers(mut self, outliers: OutlierConfig) -> Self {
        self.outliers = outliers;
        self
    }

    pub fn with_skips(mut self, skips: StepSkips) -> Self {
        self.skips = skips;
        self
    }

    pub fn with_save(mut self, save: SavePolicy) -> Self {
        self.save = save;
        self
    }
}
