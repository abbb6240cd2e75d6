//! End-to-end pipeline scenarios on synthetic product shots
//!
//! Every test drives [`CutoutProcessor::process`] with the in-process mock
//! backends, so no model files are needed.

mod common;

use common::{
    gray_square_on_white, in_square, processor, processor_with, transparent_square, well_inside,
    well_outside, GRAY, SIDE,
};
use imgly_cutout::{
    backends::mock::{FailingBackend, FixedMaskBackend, MockBackend, SlowBackend},
    AcceptedStrategy, BackendId, BackendRegistry, CallbackProgressReporter,
    ProcessingSettings, ProcessorConfig, ProductCategory, QualityPreset, Result,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const EXPECTED_COVERAGE: f32 = 0.0625;

fn mock_registry() -> BackendRegistry {
    BackendRegistry::new().with_backend(MockBackend::new(BackendId::U2Net))
}

#[test]
fn test_gray_square_remove_mode() -> Result<()> {
    let processor = processor(mock_registry());
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    assert_eq!(result.dimensions(), (SIDE, SIDE));
    assert_eq!(result.metadata.category, ProductCategory::UniformLightBackground);
    assert_eq!(result.metadata.strategy, AcceptedStrategy::Backend(BackendId::U2Net));
    assert!(result.metadata.gate_verdict.as_ref().is_some_and(|v| v.passed()));

    let coverage = result.mask.coverage();
    assert!(
        (coverage - EXPECTED_COVERAGE).abs() < 0.01,
        "coverage {} too far from {}",
        coverage,
        EXPECTED_COVERAGE
    );

    for (x, y, pixel) in result.image.enumerate_pixels() {
        if well_inside(x, y, 3) {
            assert_eq!(pixel[3], 255, "inside pixel ({}, {})", x, y);
        } else if well_outside(x, y, 3) {
            assert_eq!(pixel[3], 0, "outside pixel ({}, {})", x, y);
        }
    }
    Ok(())
}

#[test]
fn test_color_mode_fills_background_exactly() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::builder()
        .background_color("#00FF00")
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(!result.metadata.composition_degraded);
    for (x, y, pixel) in result.image.enumerate_pixels() {
        match result.mask.get(x, y) {
            0 => assert_eq!(pixel.0, [0, 255, 0, 255], "background pixel ({}, {})", x, y),
            255 => assert_eq!(
                pixel.0,
                [GRAY[0], GRAY[1], GRAY[2], 255],
                "foreground pixel ({}, {})",
                x,
                y
            ),
            other => panic!("light backgrounds force binary alpha, got {}", other),
        }
    }
    Ok(())
}

#[test]
fn test_force_binary_alpha_with_explicit_backend() -> Result<()> {
    let processor = processor(
        BackendRegistry::new().with_backend(MockBackend::new(BackendId::IsNet)),
    );
    let settings = ProcessingSettings::builder()
        .backend(BackendId::IsNet)
        .force_binary_alpha(true)
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;
    assert!(result.mask.is_binary());
    assert!(result.image.pixels().all(|p| p[3] == 0 || p[3] == 255));
    Ok(())
}

#[test]
fn test_feathering_softens_the_outline() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::builder().feather_radius(4).build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(!result.mask.is_binary());
    assert!(result.mask.get(200, 200) >= 250);
    assert!(result.mask.get(5, 5) <= 5);
    Ok(())
}

#[test]
fn test_reprocessing_a_cutout_keeps_the_foreground() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::default();
    let first = processor.process(&gray_square_on_white(), &settings, None)?;
    let second = processor.process(&transparent_square(), &settings, None)?;

    assert!(second.mask.coverage() >= first.mask.coverage() * 0.95);
    // Transparent input pixels stay transparent
    for (x, y, pixel) in second.image.enumerate_pixels() {
        if !in_square(x, y) {
            assert_eq!(pixel[3], 0);
        }
    }
    Ok(())
}

#[test]
fn test_png_round_trip() -> Result<()> {
    let processor = processor(mock_registry());
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    let bytes = result.to_png_bytes()?;
    let decoded = image::load_from_memory(&bytes)?.to_rgba8();
    assert_eq!(decoded, result.image);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cutout.png");
    result.save_png(&path)?;
    assert_eq!(image::open(&path)?.to_rgba8(), result.image);
    Ok(())
}

#[test]
fn test_process_bytes_decodes_first() -> Result<()> {
    let mut encoded = Vec::new();
    gray_square_on_white()
        .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)?;

    let processor = processor(mock_registry());
    let result = processor.process_bytes(&encoded, &ProcessingSettings::default(), None)?;
    assert_eq!(result.dimensions(), (SIDE, SIDE));
    Ok(())
}

#[test]
fn test_failed_backend_is_retried_with_next_priority() -> Result<()> {
    let processor = processor(
        BackendRegistry::new()
            .with_backend(FailingBackend::new(BackendId::U2Net))
            .with_backend(MockBackend::new(BackendId::IsNet)),
    );
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    assert_eq!(result.metadata.strategy, AcceptedStrategy::Backend(BackendId::IsNet));
    assert_eq!(
        result.metadata.attempted_backends,
        vec![BackendId::U2Net, BackendId::IsNet]
    );
    assert_eq!(result.metadata.retries, 1);
    Ok(())
}

#[test]
fn test_gate_rejection_triggers_retry() -> Result<()> {
    // A mask covering everything fails the coverage check
    let processor = processor(
        BackendRegistry::new()
            .with_backend(FixedMaskBackend::uniform(BackendId::U2Net, 255))
            .with_backend(MockBackend::new(BackendId::IsNet)),
    );
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    assert_eq!(result.metadata.strategy, AcceptedStrategy::Backend(BackendId::IsNet));
    assert_eq!(result.metadata.retries, 1);
    let coverage = result.mask.coverage();
    assert!(coverage > 0.05 && coverage < 0.95);
    Ok(())
}

#[test]
fn test_retry_budget_is_bounded() -> Result<()> {
    let blank = |id| FixedMaskBackend::uniform(id, 0);
    let u2net = blank(BackendId::U2Net);
    let silueta = blank(BackendId::Silueta);
    let u2netp = blank(BackendId::U2NetP);
    let isnet = blank(BackendId::IsNet);
    let counters = [
        u2net.call_counter(),
        silueta.call_counter(),
        u2netp.call_counter(),
        isnet.call_counter(),
    ];
    let processor = processor_with(
        BackendRegistry::new()
            .with_backend(u2net)
            .with_backend(silueta)
            .with_backend(u2netp)
            .with_backend(isnet),
        ProcessorConfig::builder().max_retries(1).build()?,
    );
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    let calls: usize = counters
        .iter()
        .map(|c| c.load(std::sync::atomic::Ordering::SeqCst))
        .sum();
    assert_eq!(calls, 2);
    assert_eq!(result.metadata.attempted_backends.len(), 2);
    assert!(!matches!(result.metadata.strategy, AcceptedStrategy::Backend(_)));
    Ok(())
}

#[test]
fn test_timeout_is_treated_as_failure() -> Result<()> {
    let processor = processor_with(
        BackendRegistry::new()
            .with_backend(SlowBackend::new(BackendId::U2Net, Duration::from_millis(500)))
            .with_backend(MockBackend::new(BackendId::IsNet)),
        ProcessorConfig::builder()
            .backend_timeout(Duration::from_millis(25))
            .build()?,
    );
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;
    assert_eq!(result.metadata.strategy, AcceptedStrategy::Backend(BackendId::IsNet));
    Ok(())
}

#[test]
fn test_empty_registry_uses_classical_fallbacks() -> Result<()> {
    let processor = processor(BackendRegistry::new());
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    assert!(result.metadata.attempted_backends.is_empty());
    assert!(matches!(
        result.metadata.strategy,
        AcceptedStrategy::Fallback(_) | AcceptedStrategy::Emergency
    ));
    assert_eq!(result.mask.get(200, 200), 255);
    assert_eq!(result.mask.get(10, 10), 0);
    Ok(())
}

#[test]
fn test_rejected_backends_fall_through_to_fallback() -> Result<()> {
    let processor = processor(
        BackendRegistry::new().with_backend(FixedMaskBackend::uniform(BackendId::U2Net, 0)),
    );
    let settings = ProcessingSettings::builder().debug_masks(true).build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(matches!(
        result.metadata.strategy,
        AcceptedStrategy::Fallback(_) | AcceptedStrategy::Emergency
    ));
    let diagnostics = result.diagnostics.as_ref().expect("debug masks were requested");
    assert!(diagnostics.names().any(|n| n.starts_with("fallback:")));
    Ok(())
}

#[test]
fn test_ultra_preset_fuses_an_ensemble() -> Result<()> {
    let processor = processor(
        BackendRegistry::new()
            .with_backend(MockBackend::new(BackendId::U2Net))
            .with_backend(MockBackend::new(BackendId::IsNet))
            .with_backend(MockBackend::new(BackendId::Silueta))
            .with_backend(MockBackend::new(BackendId::U2NetP)),
    );
    let settings = ProcessingSettings::builder()
        .quality(QualityPreset::Ultra)
        .debug_masks(true)
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert_eq!(
        result.metadata.strategy,
        AcceptedStrategy::Ensemble(vec![BackendId::U2Net, BackendId::IsNet, BackendId::Silueta])
    );
    let diagnostics = result.diagnostics.as_ref().expect("debug masks were requested");
    assert!(diagnostics.get("fused").is_some());
    Ok(())
}

#[test]
fn test_debug_masks_record_each_stage() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::builder().debug_masks(true).build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    let diagnostics = result.diagnostics.as_ref().expect("debug masks were requested");
    for name in ["backend:u2net", "post_processed", "refined", "final"] {
        assert!(diagnostics.get(name).is_some(), "missing {}", name);
    }
    assert_eq!(diagnostics.get("final"), Some(&result.mask));

    let dir = tempfile::tempdir()?;
    let written = diagnostics.save_to_dir(dir.path())?;
    assert_eq!(written.len(), diagnostics.len());

    let quiet = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;
    assert!(quiet.diagnostics.is_none());
    Ok(())
}

#[test]
fn test_fast_preset_skips_refinement() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::builder()
        .quality(QualityPreset::Fast)
        .debug_masks(true)
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;
    let diagnostics = result.diagnostics.as_ref().expect("debug masks were requested");
    assert!(diagnostics.get("refined").is_none());
    assert!(diagnostics.get("post_processed").is_some());
    Ok(())
}

#[test]
fn test_progress_reaches_completion() -> Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reporter = CallbackProgressReporter::new(move |progress, _message: &str| {
        sink.lock().unwrap().push(progress);
    });

    let processor = processor(mock_registry());
    processor.process(
        &gray_square_on_white(),
        &ProcessingSettings::default(),
        Some(&reporter),
    )?;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&30), "segmentation stage missing: {:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    Ok(())
}

#[test]
fn test_force_binary_alpha_with_soft_input_alpha() -> Result<()> {
    // Anti-aliased cutout: opaque square inside a 4 px rim at alpha 100
    let (start, end) = common::square_bounds();
    let rimmed = image::DynamicImage::ImageRgba8(image::RgbaImage::from_fn(SIDE, SIDE, |x, y| {
        let inside = |m: u32| x + m >= start && x < end + m && y + m >= start && y < end + m;
        if inside(0) {
            image::Rgba([GRAY[0], GRAY[1], GRAY[2], 255])
        } else if inside(4) {
            image::Rgba([GRAY[0], GRAY[1], GRAY[2], 100])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    }));

    let processor = processor(
        BackendRegistry::new()
            .with_backend(MockBackend::new(BackendId::U2Net).with_tolerance(20.0)),
    );
    let settings = ProcessingSettings::builder().force_binary_alpha(true).build()?;
    let result = processor.process(&rimmed, &settings, None)?;

    assert!(result.mask.is_binary());
    assert!(result.image.pixels().all(|p| p[3] == 0 || p[3] == 255));
    assert_eq!(result.mask.get(200, 200), 255);
    assert_eq!(result.mask.get(start - 2, 200), 0);
    Ok(())
}

#[test]
fn test_feathering_stays_inside_input_alpha() -> Result<()> {
    let processor = processor(mock_registry());
    let settings = ProcessingSettings::builder().feather_radius(6).build()?;
    let result = processor.process(&transparent_square(), &settings, None)?;

    assert!(!result.mask.is_binary());
    for (x, y, pixel) in result.image.enumerate_pixels() {
        if !in_square(x, y) {
            assert_eq!(pixel[3], 0, "pixel ({}, {}) outside the input alpha", x, y);
        }
    }
    Ok(())
}
