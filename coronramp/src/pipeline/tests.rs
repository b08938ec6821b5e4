use super::*;
use crate::common::Frame;
use crate::config::{RefPixBorders, SaturationConfig, SavePolicy, StepSkips};
use crate::dq::DqFlags;
use crate::fnoise::{FnoiseConfig, FnoiseModel};
use crate::math::variance;
use crate::ramp::{ExposureMeta, RampShape};
use crate::slope_fit::SlopeFitConfig;
use crate::testing::mocks::{
    ConstantReference, FixedOutliers, MemorySink, MissingReference, RecordingRunner, RunnerCall,
};
use crate::testing::{TestRng, add_gaussian_noise, init_tracing, linear_ramp, subarray_meta};

const ROWS: usize = 8;
const COLS: usize = 8;
const SATURATION: f32 = 1.0e6;

fn nircam_ramp(nints: usize) -> RampCube {
    linear_ramp(subarray_meta(Instrument::Nircam, nints, 5), ROWS, COLS, 100.0, 10.0)
}

fn miri_ramp(nints: usize) -> RampCube {
    linear_ramp(subarray_meta(Instrument::Miri, nints, 5), ROWS, COLS, 100.0, 10.0)
}

fn pipeline_with(
    config: CorrectionConfig,
    runner: RecordingRunner,
    hits: Vec<(usize, usize, usize)>,
) -> Coron1Pipeline<RecordingRunner, ConstantReference, FixedOutliers, MemorySink> {
    Coron1Pipeline::new(config, runner, ConstantReference::new(SATURATION, ROWS, COLS))
        .unwrap()
        .with_detector(FixedOutliers::new(hits))
        .with_sink(MemorySink::default())
}

fn pipeline(
    config: CorrectionConfig,
    hits: Vec<(usize, usize, usize)>,
) -> Coron1Pipeline<RecordingRunner, ConstantReference, FixedOutliers, MemorySink> {
    pipeline_with(config, RecordingRunner::new(), hits)
}

fn dq_at(
    groupdq: &[u32],
    shape: RampShape,
    int: usize,
    group: usize,
    row: usize,
    col: usize,
) -> u32 {
    groupdq[int * shape.integration_len() + group * shape.frame_len() + row * shape.cols + col]
}

// ---------------------------------------------------------------------------
// Step sequencing
// ---------------------------------------------------------------------------

#[test]
fn test_near_ir_step_order() {
    init_tracing();
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![]);
    let output = pipeline.process(nircam_ramp(2)).unwrap();

    let runner = pipeline.runner();
    assert_eq!(
        runner.calls,
        vec![
            RunnerCall::Step(StandardStep::GroupScale),
            RunnerCall::Step(StandardStep::DqInit),
            RunnerCall::Step(StandardStep::Saturation {
                n_pix_grow_sat: 0,
                grow_diagonal: false
            }),
            RunnerCall::Step(StandardStep::Superbias),
            RunnerCall::Step(StandardStep::RefPix {
                use_side_ref_pixels: false
            }),
            RunnerCall::Step(StandardStep::Linearity),
            RunnerCall::Step(StandardStep::ChargeMigration),
            RunnerCall::Step(StandardStep::Jump),
            RunnerCall::RampFit,
            RunnerCall::GainScaleRate,
            RunnerCall::GainScaleRateints,
        ]
    );
    assert!(output.rate.is_some());
    assert_eq!(output.rateints.as_ref().map(RateCube::nints), Some(2));
    assert_eq!(pipeline.references().inner().calls, 1);
}

#[test]
fn test_miri_step_order_skips_custom_corrections() {
    init_tracing();
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![]);
    pipeline.process(miri_ramp(2)).unwrap();

    assert_eq!(
        pipeline.runner().step_kinds(),
        vec![
            StepKind::GroupScale,
            StepKind::DqInit,
            StepKind::Saturation,
            StepKind::Firstframe,
            StepKind::Lastframe,
            StepKind::Reset,
            StepKind::Linearity,
            StepKind::Rscd,
            StepKind::Refpix,
            StepKind::ChargeMigration,
            StepKind::Jump,
        ]
    );
    // The standard step grows saturation itself on MIRI.
    assert!(pipeline.runner().calls.contains(&RunnerCall::Step(StandardStep::Saturation {
        n_pix_grow_sat: 1,
        grow_diagonal: false
    })));
    assert_eq!(pipeline.references().inner().calls, 0);
}

#[test]
fn test_all_steps_enabled() {
    let config = CorrectionConfig::default().with_skips(StepSkips::none());
    let mut pipeline = pipeline(config, vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();

    let kinds = pipeline.runner().step_kinds();
    assert_eq!(kinds.len(), 11);
    assert!(kinds.contains(&StepKind::Ipc));
    assert!(kinds.contains(&StepKind::Persistence));
    assert!(kinds.contains(&StepKind::DarkCurrent));
}

#[test]
fn test_skipped_steps_are_not_sent_to_runner() {
    let skips = StepSkips::default()
        .with_skipped(StepKind::Jump, true)
        .with_skipped(StepKind::Saturation, true)
        .with_skipped(StepKind::Refpix, true);
    let mut pipeline = pipeline(CorrectionConfig::default().with_skips(skips), vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();

    let kinds = pipeline.runner().step_kinds();
    assert!(!kinds.contains(&StepKind::Jump));
    assert!(!kinds.contains(&StepKind::Saturation));
    assert!(!kinds.contains(&StepKind::Refpix));
    assert!(kinds.contains(&StepKind::Linearity));
}

#[test]
fn test_skipped_ramp_fit_yields_no_products() {
    let skips = StepSkips::default().with_skipped(StepKind::RampFit, true);
    let mut pipeline = pipeline(CorrectionConfig::default().with_skips(skips), vec![]);
    let output = pipeline.process(nircam_ramp(2)).unwrap();

    assert_eq!(output, PipelineOutput::default());
    let runner = pipeline.runner();
    assert_eq!(runner.count(RunnerCall::RampFit), 0);
    assert_eq!(runner.count(RunnerCall::GainScaleRate), 0);
    assert_eq!(runner.count(RunnerCall::GainScaleRateints), 0);
    assert!(pipeline.sink().rates.is_empty());
}

#[test]
fn test_skipped_gain_scale_keeps_products() {
    let skips = StepSkips::default().with_skipped(StepKind::GainScale, true);
    let mut pipeline = pipeline(CorrectionConfig::default().with_skips(skips), vec![]);
    let output = pipeline.process(nircam_ramp(2)).unwrap();

    assert!(output.rate.is_some());
    assert!(output.rateints.is_some());
    assert_eq!(pipeline.runner().count(RunnerCall::GainScaleRate), 0);
    assert_eq!(pipeline.sink().rates, vec!["rate"]);
}

#[test]
fn test_step_failure_carries_context() {
    let runner = RecordingRunner::new().failing_on(StepKind::Linearity);
    let mut pipeline = pipeline_with(CorrectionConfig::default(), runner, vec![]);
    let err = pipeline.process(nircam_ramp(1)).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Step linearity failed"), "{message}");
    assert!(message.contains("linearity exploded"), "{message}");
    assert_eq!(pipeline.runner().count(RunnerCall::RampFit), 0);
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let config = CorrectionConfig {
        sat_frac: 0.0,
        ..Default::default()
    };
    let result = Coron1Pipeline::new(
        config,
        RecordingRunner::new(),
        ConstantReference::new(SATURATION, ROWS, COLS),
    );
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Reference lookups
// ---------------------------------------------------------------------------

#[test]
fn test_reference_cached_across_exposures() {
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();
    pipeline.process(nircam_ramp(2)).unwrap();

    assert_eq!(pipeline.references().inner().calls, 1);
    assert_eq!(pipeline.references().len(), 1);
}

#[test]
fn test_cache_keys_on_subarray() {
    let mut lookup = CachedReferenceLookup::new(ConstantReference::new(1.0, 2, 2));
    let mut meta = subarray_meta(Instrument::Nircam, 1, 2);
    lookup.get_reference(&meta, ReferenceKind::Saturation).unwrap();
    meta.subarray = meta.subarray.to_lowercase();
    lookup.get_reference(&meta, ReferenceKind::Saturation).unwrap();
    assert_eq!(lookup.inner().calls, 1);

    meta.subarray = "SUB160".into();
    lookup.get_reference(&meta, ReferenceKind::Saturation).unwrap();
    assert_eq!(lookup.inner().calls, 2);
    assert_eq!(lookup.len(), 2);
}

#[test]
fn test_missing_reference_fails_bias_removal() {
    let mut pipeline = Coron1Pipeline::new(
        CorrectionConfig::default(),
        RecordingRunner::new(),
        MissingReference,
    )
    .unwrap();
    let err = pipeline.process(nircam_ramp(1)).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Failed to get saturation reference"), "{message}");
}

#[test]
fn test_reference_not_needed_without_noise_removal() {
    let config = CorrectionConfig::default().with_noise_removal(false, false);
    let mut pipeline =
        Coron1Pipeline::new(config, RecordingRunner::new(), MissingReference).unwrap();
    assert!(pipeline.process(nircam_ramp(1)).is_ok());
}

// ---------------------------------------------------------------------------
// Outlier recheck
// ---------------------------------------------------------------------------

#[test]
fn test_outliers_trigger_single_refit() {
    init_tracing();
    let config = CorrectionConfig::default().with_noise_removal(false, false);
    let mut pipeline = pipeline(config, vec![(2, 3, 3)]);
    pipeline.process(nircam_ramp(5)).unwrap();

    let runner = pipeline.runner();
    assert_eq!(runner.count(RunnerCall::RampFit), 2);
    assert_eq!(pipeline_detector_calls(&pipeline), 1);

    let shape = RampShape::new(5, 5, ROWS, COLS);
    let refit = &runner.fitted_groupdq[1];
    let expected = (DqFlags::DO_NOT_USE | DqFlags::JUMP_DET).bits();
    for g in 0..5 {
        assert_eq!(dq_at(refit, shape, 2, g, 3, 3), expected);
        assert_eq!(dq_at(refit, shape, 1, g, 3, 3), 0);
        assert_eq!(dq_at(refit, shape, 2, g, 3, 4), 0);
    }
    assert!(runner.fitted_groupdq[0].iter().all(|&dq| dq == 0));
}

fn pipeline_detector_calls(
    pipeline: &Coron1Pipeline<RecordingRunner, ConstantReference, FixedOutliers, MemorySink>,
) -> usize {
    pipeline.detector.calls.get()
}

#[test]
fn test_too_few_integrations_keeps_first_fit() {
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![(0, 1, 1)]);
    pipeline.process(nircam_ramp(2)).unwrap();

    assert_eq!(pipeline.runner().count(RunnerCall::RampFit), 1);
    assert_eq!(pipeline_detector_calls(&pipeline), 1);
}

#[test]
fn test_outlier_recheck_disabled() {
    let config = CorrectionConfig::default().with_rate_int_outliers(false);
    let mut pipeline = pipeline(config, vec![(0, 1, 1)]);
    pipeline.process(nircam_ramp(6)).unwrap();

    assert_eq!(pipeline.runner().count(RunnerCall::RampFit), 1);
    assert_eq!(pipeline_detector_calls(&pipeline), 0);
}

#[test]
fn test_single_integration_has_no_rateints() {
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![(0, 1, 1)]);
    let output = pipeline.process(nircam_ramp(1)).unwrap();

    assert!(output.rateints.is_none());
    assert_eq!(pipeline_detector_calls(&pipeline), 0);
    assert_eq!(pipeline.runner().count(RunnerCall::GainScaleRateints), 0);
}

#[test]
fn test_miri_outliers_skip_first_integration() {
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![(0, 1, 1)]);
    pipeline.process(miri_ramp(6)).unwrap();

    assert_eq!(pipeline.detector.frames_seen.get(), 5);
    let runner = pipeline.runner();
    assert_eq!(runner.count(RunnerCall::RampFit), 2);

    let shape = RampShape::new(6, 5, ROWS, COLS);
    let refit = &runner.fitted_groupdq[1];
    for g in 0..5 {
        assert_eq!(dq_at(refit, shape, 0, g, 1, 1), 0);
        assert!(DqFlags::DO_NOT_USE.is_set_in(dq_at(refit, shape, 1, g, 1, 1)));
    }
}

// ---------------------------------------------------------------------------
// Saving
// ---------------------------------------------------------------------------

#[test]
fn test_default_saves_final_products_only() {
    let mut pipeline = pipeline(CorrectionConfig::default(), vec![]);
    pipeline.process(nircam_ramp(2)).unwrap();

    let sink = pipeline.sink();
    assert!(sink.ramps.is_empty());
    assert_eq!(sink.rates, vec!["rate"]);
    assert_eq!(sink.rateints, vec!["rateints"]);
}

#[test]
fn test_save_intermediates() {
    let save = SavePolicy {
        save_results: false,
        save_intermediates: true,
        ..Default::default()
    };
    let mut pipeline = pipeline(CorrectionConfig::default().with_save(save), vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();

    let sink = pipeline.sink();
    assert_eq!(
        sink.ramps,
        vec![
            "group_scale",
            "dq_init",
            "saturation",
            "superbias",
            "refpix",
            "linearity",
            "charge_migration",
            "jump",
            "ramp",
        ]
    );
    assert_eq!(sink.rates, vec!["rate"]);
    assert!(sink.rateints.is_empty());
}

#[test]
fn test_scale_step_reported_skipped_is_not_saved() {
    let save = SavePolicy {
        save_intermediates: true,
        ..Default::default()
    };
    let runner = RecordingRunner {
        report_scale_skipped: true,
        ..Default::default()
    };
    let mut pipeline = pipeline_with(CorrectionConfig::default().with_save(save), runner, vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();

    let sink = pipeline.sink();
    assert!(!sink.ramps.iter().any(|s| s == "group_scale"));
    assert!(sink.ramps.iter().any(|s| s == "dq_init"));
}

#[test]
fn test_per_step_save() {
    let save = SavePolicy {
        save_results: false,
        step_results: vec![StepKind::Jump, StepKind::DarkCurrent],
        ..Default::default()
    };
    let mut pipeline = pipeline(CorrectionConfig::default().with_save(save), vec![]);
    pipeline.process(nircam_ramp(2)).unwrap();

    // Dark current is skipped by default and so never saved.
    let sink = pipeline.sink();
    assert_eq!(sink.ramps, vec!["jump"]);
    assert!(sink.rates.is_empty());
    assert!(sink.rateints.is_empty());
}

#[test]
fn test_calibrated_ramp_saved_before_fit() {
    let save = SavePolicy {
        save_calibrated_ramp: true,
        ..Default::default()
    };
    let mut pipeline = pipeline(CorrectionConfig::default().with_save(save), vec![]);
    pipeline.process(nircam_ramp(1)).unwrap();
    assert_eq!(pipeline.sink().ramps, vec!["ramp"]);
}

// ---------------------------------------------------------------------------
// Saturation growth
// ---------------------------------------------------------------------------

fn saturating_ramp() -> RampCube {
    let mut ramp = linear_ramp(subarray_meta(Instrument::Nircam, 1, 6), 10, 10, 0.0, 1.0);
    for g in 3..6 {
        ramp.frame_mut(0, g)[5 * 10 + 5] = 1000.0;
    }
    ramp
}

fn saturated(ramp: &RampCube, group: usize, row: usize, col: usize) -> bool {
    DqFlags::SATURATED.is_set_in(ramp.group_dq(0, group)[row * ramp.shape().cols + col])
}

#[test]
fn test_saturation_grows_without_diagonals() {
    init_tracing();
    let mut runner = RecordingRunner::new().with_saturation_level(500.0);
    let output = run_custom_saturation(
        &mut runner,
        saturating_ramp(),
        &SaturationConfig::default(),
    )
    .unwrap();
    let ramp = output.product;

    assert_eq!(
        runner.calls,
        vec![RunnerCall::Step(StandardStep::Saturation {
            n_pix_grow_sat: 0,
            grow_diagonal: false
        })]
    );
    for g in 3..6 {
        for (r, c) in [(5, 5), (4, 5), (6, 5), (5, 4), (5, 6)] {
            assert!(saturated(&ramp, g, r, c), "({r}, {c}) at group {g}");
        }
        for (r, c) in [(4, 4), (6, 6), (3, 5), (5, 7)] {
            assert!(!saturated(&ramp, g, r, c), "({r}, {c}) at group {g}");
        }
    }
    for g in 0..3 {
        assert!(!ramp.group_flag_mask(0, g, DqFlags::SATURATED).any());
    }
}

#[test]
fn test_diagonal_growth_left_to_standard_step() {
    let mut runner = RecordingRunner::new().with_saturation_level(500.0);
    let config = SaturationConfig {
        grow_diagonal: true,
        ..Default::default()
    };
    let ramp = run_custom_saturation(&mut runner, saturating_ramp(), &config)
        .unwrap()
        .product;

    assert_eq!(
        runner.calls,
        vec![RunnerCall::Step(StandardStep::Saturation {
            n_pix_grow_sat: 1,
            grow_diagonal: true
        })]
    );
    assert!(saturated(&ramp, 4, 4, 4));
}

#[test]
fn test_no_growth() {
    let mut runner = RecordingRunner::new().with_saturation_level(500.0);
    let config = SaturationConfig {
        n_pix_grow_sat: 0,
        ..Default::default()
    };
    let ramp = run_custom_saturation(&mut runner, saturating_ramp(), &config)
        .unwrap()
        .product;

    assert!(saturated(&ramp, 3, 5, 5));
    assert!(!saturated(&ramp, 3, 4, 5));
}

#[test]
fn test_rc_pixels_flagged_when_saturation_skipped() {
    let skips = StepSkips::default().with_skipped(StepKind::Saturation, true);
    let mut pipeline = pipeline(CorrectionConfig::default().with_skips(skips), vec![]);
    let mut ramp = nircam_ramp(1);
    ramp.pixeldq_mut()[(2, 3)] = DqFlags::RC.bits();
    let shape = ramp.shape();
    pipeline.process(ramp).unwrap();

    let runner = pipeline.runner();
    assert!(!runner.step_kinds().contains(&StepKind::Saturation));
    let fitted = &runner.fitted_groupdq[0];
    for g in 0..shape.ngroups {
        assert!(DqFlags::SATURATED.is_set_in(dq_at(fitted, shape, 0, g, 2, 3)));
        assert_eq!(dq_at(fitted, shape, 0, g, 2, 4), 0);
    }
}

#[test]
fn test_rc_pixels_saturated_in_every_group() {
    let mut ramp = saturating_ramp();
    ramp.pixeldq_mut()[(0, 0)] = DqFlags::RC.bits();
    let mut runner = RecordingRunner::new();
    let ramp = run_custom_saturation(&mut runner, ramp, &SaturationConfig::default())
        .unwrap()
        .product;

    for g in 0..6 {
        assert!(saturated(&ramp, g, 0, 0));
        assert!(saturated(&ramp, g, 0, 1));
        assert!(saturated(&ramp, g, 1, 0));
        assert!(!saturated(&ramp, g, 1, 1));
    }

    let config = SaturationConfig {
        flag_rcsat: false,
        ..Default::default()
    };
    let mut ramp = saturating_ramp();
    ramp.pixeldq_mut()[(0, 0)] = DqFlags::RC.bits();
    let ramp = run_custom_saturation(&mut runner, ramp, &config).unwrap().product;
    assert!(!saturated(&ramp, 0, 0, 0));
}

#[test]
fn test_zeroframe_saturation_grown() {
    let mut zeroframe = vec![1.0f32; 100];
    zeroframe[2 * 10 + 2] = 0.0;
    let mut ramp = saturating_ramp().with_zeroframe(zeroframe).unwrap();
    ramp.pixeldq_mut()[(9, 9)] = DqFlags::RC.bits();

    let mut runner = RecordingRunner::new();
    let ramp = run_custom_saturation(&mut runner, ramp, &SaturationConfig::default())
        .unwrap()
        .product;

    let zf = ramp.zeroframe(0).unwrap();
    let at = |r: usize, c: usize| zf[r * 10 + c];
    for (r, c) in [(2, 2), (1, 2), (3, 2), (2, 1), (2, 3), (9, 9), (8, 9), (9, 8)] {
        assert_eq!(at(r, c), 0.0, "({r}, {c})");
    }
    for (r, c) in [(3, 3), (1, 1), (8, 8), (5, 5)] {
        assert_eq!(at(r, c), 1.0, "({r}, {c})");
    }
}

// ---------------------------------------------------------------------------
// Pseudo reference pixels
// ---------------------------------------------------------------------------

fn refpix_ramp() -> RampCube {
    let mut ramp = linear_ramp(subarray_meta(Instrument::Nircam, 1, 3), 12, 10, 0.0, 1.0);
    let pixeldq = ramp.pixeldq_mut();
    pixeldq[(0, 0)] = DqFlags::HOT.bits();
    pixeldq[(1, 7)] = (DqFlags::RC | DqFlags::REFERENCE_PIXEL).bits();
    pixeldq[(5, 5)] = DqFlags::DEAD.bits();
    pixeldq[(11, 9)] = DqFlags::WARM.bits();
    ramp
}

fn reference_flagged(pixeldq: &Frame<u32>, row: usize, col: usize) -> bool {
    DqFlags::REFERENCE_PIXEL.is_set_in(pixeldq[(row, col)])
}

#[test]
fn test_pseudo_refpix_round_trip() {
    init_tracing();
    let ramp = refpix_ramp();
    let original = ramp.pixeldq().clone();
    let mut runner = RecordingRunner::new();
    let output = run_refpix(&mut runner, ramp, &RefPixBorders::default()).unwrap();

    assert_eq!(output.product.pixeldq(), &original);
    assert_eq!(
        runner.calls,
        vec![RunnerCall::Step(StandardStep::RefPix {
            use_side_ref_pixels: false
        })]
    );

    let seen = runner.refpix_pixeldq.as_ref().unwrap();
    for r in 0..12 {
        let border = r < 4 || r >= 8;
        for c in 0..10 {
            assert_eq!(reference_flagged(seen, r, c), border, "({r}, {c})");
        }
    }
    assert!(DqFlags::HOT.is_set_in(seen[(0, 0)]));
    assert_eq!(seen[(5, 5)], DqFlags::DEAD.bits());
}

#[test]
fn test_pseudo_refpix_columns_and_offsets() {
    let borders = RefPixBorders::with_aperture_defaults(None).with_offsets(1, 0);
    let mut runner = RecordingRunner::new();
    let original = refpix_ramp().pixeldq().clone();
    let output = run_refpix(&mut runner, refpix_ramp(), &borders).unwrap();

    assert_eq!(output.product.pixeldq(), &original);
    assert_eq!(
        runner.calls,
        vec![RunnerCall::Step(StandardStep::RefPix {
            use_side_ref_pixels: true
        })]
    );
    let seen = runner.refpix_pixeldq.as_ref().unwrap();
    // Rows 1..5 and 7..11, columns 0..4 and 6..10.
    assert!(reference_flagged(seen, 1, 5));
    assert!(reference_flagged(seen, 10, 5));
    assert!(!reference_flagged(seen, 0, 5));
    assert!(!reference_flagged(seen, 11, 5));
    assert!(!reference_flagged(seen, 6, 5));
    assert!(!reference_flagged(seen, 6, 4));
    assert!(reference_flagged(seen, 6, 3));
    assert!(reference_flagged(seen, 6, 6));
    assert!(reference_flagged(seen, 0, 0));
}

#[test]
fn test_full_frame_uses_standard_refpix() {
    let mut meta = subarray_meta(Instrument::Nircam, 1, 2);
    meta.subarray = "FULL".into();
    meta.noutputs = 4;
    let ramp = linear_ramp(meta, 8, 8, 0.0, 1.0);
    let mut runner = RecordingRunner::new();
    run_refpix(&mut runner, ramp, &RefPixBorders::default()).unwrap();

    assert_eq!(
        runner.calls,
        vec![RunnerCall::Step(StandardStep::RefPix {
            use_side_ref_pixels: true
        })]
    );
    let seen = runner.refpix_pixeldq.as_ref().unwrap();
    assert!(seen.iter().all(|&dq| dq == 0));
}

#[test]
fn test_zero_borders_use_standard_refpix() {
    let ramp = refpix_ramp();
    assert!(!uses_pseudo_refpix(&ramp, &RefPixBorders::none()));
    assert!(uses_pseudo_refpix(&ramp, &RefPixBorders::default()));
    let mut runner = RecordingRunner::new();
    run_refpix(&mut runner, ramp, &RefPixBorders::none()).unwrap();
    let seen = runner.refpix_pixeldq.as_ref().unwrap();
    assert!(!reference_flagged(seen, 0, 3));
}

#[test]
fn test_border_regions() {
    let borders = RefPixBorders {
        nlower: 2,
        nupper: 1,
        nleft: 0,
        nright: 2,
        nrow_off: 1,
        ncol_off: 0,
    };
    let regions = BorderRegions::new(&borders, 10, 6);
    assert_eq!(regions.rows, vec![1..3, 8..9]);
    assert_eq!(regions.cols, vec![4..6]);
    assert_eq!(regions.mask(10, 6).count_true(), 3 * 6 + 7 * 2);

    let wide = RefPixBorders {
        nlower: 20,
        ..RefPixBorders::none()
    };
    assert_eq!(BorderRegions::new(&wide, 10, 6).rows, vec![0..10]);
}

// ---------------------------------------------------------------------------
// Bias and stripe removal
// ---------------------------------------------------------------------------

#[test]
fn test_remove_bias_leaves_signal() {
    let ramp = nircam_ramp(2);
    let sat = Frame::new_filled(ROWS, COLS, SATURATION);
    let ramp = remove_bias(ramp, &sat, &SlopeFitConfig::default()).unwrap();
    for int in 0..2 {
        for g in 0..5 {
            let expected = 10.0 * (g + 1) as f32;
            for &v in ramp.frame(int, g) {
                assert!((v - expected).abs() < 1e-2, "{v} vs {expected}");
            }
        }
    }
}

#[test]
fn test_single_group_bias_untouched() {
    let ramp = linear_ramp(subarray_meta(Instrument::Nircam, 1, 1), 4, 4, 100.0, 10.0);
    let sat = Frame::new_filled(4, 4, SATURATION);
    let out = remove_bias(ramp.clone(), &sat, &SlopeFitConfig::default()).unwrap();
    assert_eq!(out, ramp);
}

#[test]
fn test_subtract_bias_shape_mismatch() {
    let ramp = nircam_ramp(2);
    let sat = Frame::new_filled(ROWS, COLS, SATURATION);
    let slopes =
        crate::slope_fit::fit_exposure_slopes(&nircam_ramp(1), &sat, &SlopeFitConfig::default())
            .unwrap();
    assert!(subtract_bias(ramp, &slopes).is_err());
}

const E2E_ROWS: usize = 20;
const E2E_COLS: usize = 20;
const E2E_GROUPS: usize = 10;
const STRIPE: f32 = 30.0;
const DARK: f32 = 5.0;

/// Row carrying the stripe in group `g`; every group has its own row.
fn stripe_row(group: usize) -> usize {
    2 * group
}

fn striped_exposure(seed: u64) -> (RampCube, Vec<f32>) {
    let meta: ExposureMeta = subarray_meta(Instrument::Nircam, 2, E2E_GROUPS);
    let shape = RampShape::new(2, E2E_GROUPS, E2E_ROWS, E2E_COLS);
    let npix = shape.frame_len();

    let mut rng = TestRng::new(seed);
    let bias: Vec<f32> = (0..shape.nints * npix)
        .map(|_| 100.0 + 20.0 * rng.next_gaussian_f32())
        .collect();

    let mut data = Vec::with_capacity(shape.len());
    for int in 0..shape.nints {
        for g in 0..E2E_GROUPS {
            let t = (g + 1) as f32;
            for p in 0..npix {
                let stripe = if p / E2E_COLS == stripe_row(g) { STRIPE } else { 0.0 };
                data.push(bias[int * npix + p] + DARK * t + stripe);
            }
        }
    }
    add_gaussian_noise(&mut data, 1.0, seed + 1);

    let ramp = RampCube::new(
        meta,
        shape,
        data,
        vec![0; shape.len()],
        Frame::new_default(E2E_ROWS, E2E_COLS),
    )
    .unwrap();
    (ramp, bias)
}

fn row_mean_variance(frame: &[f32]) -> f64 {
    let means: Vec<f32> = frame
        .chunks(E2E_COLS)
        .map(|row| row.iter().sum::<f32>() / E2E_COLS as f32)
        .collect();
    variance(&means)
}

fn mean_row_variance(ramp: &RampCube, int: usize, bias: Option<&[f32]>) -> f64 {
    let npix = E2E_ROWS * E2E_COLS;
    let total: f64 = (0..E2E_GROUPS)
        .map(|g| {
            let frame: Vec<f32> = match bias {
                Some(bias) => ramp
                    .frame(int, g)
                    .iter()
                    .zip(&bias[int * npix..(int + 1) * npix])
                    .map(|(&v, &b)| v - b)
                    .collect(),
                None => ramp.frame(int, g).to_vec(),
            };
            row_mean_variance(&frame)
        })
        .sum();
    total / E2E_GROUPS as f64
}

fn assert_stripes_removed(model: FnoiseModel, seed: u64) {
    init_tracing();
    let (raw, bias) = striped_exposure(seed);
    let sat = Frame::new_filled(E2E_ROWS, E2E_COLS, SATURATION);

    let corrected = remove_bias(raw.clone(), &sat, &SlopeFitConfig::default()).unwrap();
    let corrected =
        remove_stripes(corrected, &sat, &FnoiseConfig::default().with_model(model)).unwrap();

    for int in 0..2 {
        let before = mean_row_variance(&raw, int, Some(&bias));
        let after = mean_row_variance(&corrected, int, None);
        assert!(
            after <= 0.1 * before,
            "{model} integration {int}: row variance {after} vs {before}"
        );
    }
}

#[test]
fn test_stripe_removal_reduces_row_variance_savgol() {
    assert_stripes_removed(FnoiseModel::Savgol, 11);
}

#[test]
fn test_stripe_removal_reduces_row_variance_median() {
    assert_stripes_removed(FnoiseModel::Median, 23);
}

#[test]
fn test_pipeline_stripe_removal_end_to_end() {
    let (raw, _) = striped_exposure(5);
    let config = CorrectionConfig::default();
    let mut pipeline = Coron1Pipeline::new(
        config,
        RecordingRunner::new(),
        ConstantReference::new(SATURATION, E2E_ROWS, E2E_COLS),
    )
    .unwrap();
    let output = pipeline.process(raw).unwrap();

    // Stripes and the constant dark are modeled out, so end-point rates
    // are close to zero everywhere.
    let rate = output.rate.unwrap();
    let worst = rate.data.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    assert!(worst < 2.0, "largest residual rate {worst}");
}
