//! Error conditions and degraded paths
//!
//! Only invalid input and invalid settings may surface as errors; every
//! other failure has to be absorbed and reported through the metadata.

mod common;

use common::{gray_square_on_white, processor, SIDE};
use image::{DynamicImage, Rgb, RgbImage};
use imgly_cutout::{
    backends::mock::{FailingBackend, MockBackend, UnavailableBackend},
    compositor::BackgroundSource,
    config::MAX_FEATHER_RADIUS,
    AcceptedStrategy, BackendId, BackendRegistry, BackgroundMode, CutoutError, CutoutProcessor,
    PipelineTuning, ProcessingSettings, ProcessorConfig, Result,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_settings_validation_boundaries() -> Result<()> {
    let settings = ProcessingSettings::builder()
        .feather_radius(MAX_FEATHER_RADIUS)
        .build()?;
    assert_eq!(settings.feather_radius, MAX_FEATHER_RADIUS);

    let error = ProcessingSettings::builder()
        .feather_radius(MAX_FEATHER_RADIUS + 1)
        .build()
        .unwrap_err();
    assert!(matches!(error, CutoutError::InvalidConfig(_)));
    assert!(error.to_string().contains("51"));

    assert!(ProcessingSettings::builder()
        .background_color("#12345")
        .build()
        .is_err());

    // Color mode needs a color
    let mut settings = ProcessingSettings::default();
    settings.background_mode = BackgroundMode::Color;
    assert!(settings.validate().is_err());
    Ok(())
}

#[test]
fn test_settings_from_json() -> Result<()> {
    let settings = ProcessingSettings::from_json_str(
        r##"{"background_mode": "color", "background_color": "#00FF00", "feather_radius": 2}"##,
    )?;
    assert_eq!(settings.background_mode, BackgroundMode::Color);
    assert_eq!(settings.feather_radius, 2);
    assert!(settings.edge_refinement);

    assert!(ProcessingSettings::from_json_str(r#"{"feather_radius": 99}"#).is_err());
    assert!(ProcessingSettings::from_json_str("not json").is_err());
    Ok(())
}

#[test]
fn test_invalid_settings_fail_before_processing() {
    let failing = FailingBackend::new(BackendId::U2Net);
    let calls = failing.call_counter();
    let processor = processor(BackendRegistry::new().with_backend(failing));

    let mut settings = ProcessingSettings::default();
    settings.feather_radius = 200;
    let result = processor.process(&gray_square_on_white(), &settings, None);
    assert!(matches!(result, Err(CutoutError::InvalidConfig(_))));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn test_processor_config_validation() -> Result<()> {
    assert!(ProcessorConfig::builder()
        .backend_timeout(Duration::ZERO)
        .build()
        .is_err());

    let config = ProcessorConfig::builder().max_retries(10).build()?;
    assert_eq!(config.max_retries, 2);

    let tuning = PipelineTuning::from_json_str(r#"{"gate": {"min_coverage": 0.1}}"#)?;
    assert!((tuning.gate.min_coverage - 0.1).abs() < f32::EPSILON);
    assert!((tuning.gate.max_coverage - 0.95).abs() < f32::EPSILON);
    Ok(())
}

#[test]
fn test_zero_sized_and_undecodable_input() {
    let processor = processor(BackendRegistry::new());
    let settings = ProcessingSettings::default();

    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
    assert!(matches!(
        processor.process(&empty, &settings, None),
        Err(CutoutError::InvalidInput(_))
    ));
    assert!(matches!(
        processor.process_bytes(&[0x89, 0x50, 0x4e, 0x47], &settings, None),
        Err(CutoutError::InvalidInput(_))
    ));
    assert!(matches!(
        processor.process_file("/nonexistent/product.jpg", &settings, None),
        Err(CutoutError::InvalidInput(_))
    ));
}

#[test]
fn test_tiny_images_still_produce_output() -> Result<()> {
    let processor = processor(
        BackendRegistry::new().with_backend(MockBackend::new(BackendId::U2Net)),
    );
    for side in [1, 2, 3, 8] {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(side, side, Rgb([90, 30, 30])));
        let result = processor.process(&image, &ProcessingSettings::default(), None)?;
        assert_eq!(result.dimensions(), (side, side));
        assert_eq!(result.mask.dimensions(), (side, side));
    }
    Ok(())
}

#[test]
fn test_all_backends_failing_falls_back() -> Result<()> {
    let processor = processor(
        BackendRegistry::new()
            .with_backend(FailingBackend::new(BackendId::U2Net))
            .with_backend(FailingBackend::new(BackendId::IsNet))
            .with_backend(UnavailableBackend::new(BackendId::Sam)),
    );
    let result = processor.process(&gray_square_on_white(), &ProcessingSettings::default(), None)?;

    assert!(!result.metadata.attempted_backends.contains(&BackendId::Sam));
    assert!(matches!(
        result.metadata.strategy,
        AcceptedStrategy::Fallback(_) | AcceptedStrategy::Emergency
    ));
    assert_eq!(result.dimensions(), (SIDE, SIDE));
    Ok(())
}

#[test]
fn test_missing_background_image_degrades_to_white() -> Result<()> {
    let processor = processor(
        BackendRegistry::new().with_backend(MockBackend::new(BackendId::U2Net)),
    );
    let settings = ProcessingSettings::builder()
        .background_image("/nonexistent/studio.jpg")
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(result.metadata.composition_degraded);
    assert_eq!(result.image.get_pixel(0, 0).0, [255, 255, 255, 255]);
    Ok(())
}

struct StripedBackground;

impl BackgroundSource for StripedBackground {
    fn load(&self, _path: &Path) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            800,
            800,
            Rgb([20, 40, 200]),
        )))
    }
}

#[test]
fn test_background_image_from_injected_source() -> Result<()> {
    let processor = CutoutProcessor::new(
        Arc::new(BackendRegistry::new().with_backend(MockBackend::new(BackendId::U2Net))),
        ProcessorConfig::default(),
    )
    .with_background_source(Box::new(StripedBackground));
    let settings = ProcessingSettings::builder()
        .background_image("studio.png")
        .build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(!result.metadata.composition_degraded);
    assert_eq!(result.image.get_pixel(0, 0).0, [20, 40, 200, 255]);
    Ok(())
}

#[test]
fn test_background_image_file_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("backdrop.png");
    RgbImage::from_pixel(120, 60, Rgb([200, 10, 10])).save(&path)?;

    let processor = processor(
        BackendRegistry::new().with_backend(MockBackend::new(BackendId::U2Net)),
    );
    let settings = ProcessingSettings::builder().background_image(&path).build()?;
    let result = processor.process(&gray_square_on_white(), &settings, None)?;

    assert!(!result.metadata.composition_degraded);
    assert_eq!(result.image.get_pixel(0, 0).0, [200, 10, 10, 255]);
    Ok(())
}
