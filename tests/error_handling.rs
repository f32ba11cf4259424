//! Failure-path behavior: intake rejections, rate limits, circuit
//! breaking, and uncached pipeline failures.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use deckscan::cache::CacheStore;
use deckscan::catalogue::{CardLayout, CatalogueStore};
use deckscan::config::{LimitConfig, PipelineConfig, ServiceConfig, VisionConfig};
use deckscan::fallback::{CircuitState, VisionGate};
use deckscan::intake::validate_upload;
use deckscan::jobs::{JobState, JobStore};
use deckscan::ocr::stub::FaultyOcr;
use deckscan::pipeline::Pipeline;
use deckscan::progress::ProgressChannel;
use deckscan::ratelimit::{RateLimiter, RateLimits};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgb([(x % 250) as u8, (y % 245) as u8, ((x + y) % 247) as u8]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn relaxed_limits() -> LimitConfig {
    LimitConfig {
        min_image_bytes: 16,
        ..LimitConfig::default()
    }
}

#[test]
fn dimension_boundaries_are_exclusive() {
    let limits = relaxed_limits();
    // Just below the minimum.
    assert_eq!(
        validate_upload(None, &png_bytes(99, 100), &limits)
            .unwrap_err()
            .code(),
        "BAD_IMAGE"
    );
    // Exactly at the minimum.
    assert!(validate_upload(None, &png_bytes(100, 100), &limits).is_ok());

    let mut small_max = relaxed_limits();
    small_max.max_dimension = 200;
    assert!(validate_upload(None, &png_bytes(200, 150), &small_max).is_ok());
    assert_eq!(
        validate_upload(None, &png_bytes(201, 150), &small_max)
            .unwrap_err()
            .code(),
        "BAD_IMAGE"
    );
}

#[test]
fn declared_type_never_overrides_magic_bytes() {
    // A text payload with an allowed extension and plausible size.
    let mut payload = b"P6 not actually an image ".to_vec();
    payload.resize(4096, b'x');
    let err = validate_upload(Some("sneaky.jpg"), &payload, &relaxed_limits()).unwrap_err();
    assert_eq!(err.code(), "BAD_IMAGE");
}

#[tokio::test]
async fn rate_limit_boundary_is_exact() {
    let limiter = RateLimiter::new(Arc::new(CacheStore::in_memory(1024)), "submit");
    let limits = RateLimits {
        per_minute: 10,
        burst: 100,
    };
    // N spaced requests pass.
    for i in 0..10 {
        assert!(
            limiter
                .check_at("client", &limits, i as f64 * 5.5)
                .await
                .allowed,
            "request {i}"
        );
    }
    // N+1 fails with a positive retry hint.
    let denied = limiter.check_at("client", &limits, 55.0).await;
    assert!(!denied.allowed);
    assert!(denied.retry_after_secs >= 1);
    // Sixty seconds after the oldest request the window frees a slot.
    assert!(limiter.check_at("client", &limits, 60.5).await.allowed);
}

#[test]
fn circuit_transitions_on_exact_threshold() {
    let gate = VisionGate::new(VisionConfig {
        enabled: true,
        failure_threshold: 5,
        recovery_timeout_secs: 0,
        ..VisionConfig::default()
    });
    for _ in 0..4 {
        gate.record_failure();
    }
    assert_eq!(gate.circuit_state(), CircuitState::Closed);
    gate.record_failure();
    assert_eq!(gate.circuit_state(), CircuitState::Open);

    // One successful half-open probe closes it again.
    assert!(gate.should_use_fallback(0.0, 0, 1280, 720));
    assert_eq!(gate.circuit_state(), CircuitState::HalfOpen);
    gate.record_success();
    assert_eq!(gate.circuit_state(), CircuitState::Closed);
}

fn failing_pipeline() -> Arc<Pipeline> {
    let mut config = ServiceConfig::default();
    config.retention.image_dir = std::env::temp_dir()
        .join(format!("deckscan-err-{}", uuid::Uuid::new_v4()))
        .display()
        .to_string();
    let cache = Arc::new(CacheStore::in_memory(4096));
    let catalogue = CatalogueStore::in_memory().unwrap();
    catalogue
        .insert_named("Island", CardLayout::Normal, vec![], None)
        .unwrap();
    catalogue.load_index().unwrap();
    let gate = Arc::new(VisionGate::new(config.vision.clone()));
    let jobs = Arc::new(JobStore::new(cache.clone(), Duration::from_secs(3600)));
    let progress = Arc::new(ProgressChannel::new(Duration::from_millis(250)));
    Arc::new(Pipeline::new(
        config,
        cache,
        Arc::new(catalogue),
        Arc::new(FaultyOcr::always_failing()),
        gate,
        jobs,
        progress,
    ))
}

#[tokio::test]
async fn ocr_failure_marks_job_failed_and_is_never_cached() {
    let pipeline = failing_pipeline();
    let limits = relaxed_limits();
    let image = validate_upload(None, &png_bytes(320, 240), &limits).unwrap();

    let first = pipeline
        .submit(image.clone(), PipelineConfig::default(), None)
        .await
        .unwrap();
    let failed = loop {
        if let Some(job) = pipeline.jobs().get_job(&first.job_id).await {
            if job.state.is_terminal() {
                break job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.error.unwrap().contains("OCR_ERROR"));
    assert!(failed.result.is_none());

    // The failure was not cached: a resubmission is not an idempotency
    // hit and runs again.
    let second = pipeline
        .submit(image, PipelineConfig::default(), None)
        .await
        .unwrap();
    assert!(!second.cached);
    assert_ne!(second.job_id, first.job_id);
}

#[tokio::test]
async fn status_of_unknown_job_is_none() {
    let pipeline = failing_pipeline();
    assert!(pipeline
        .jobs()
        .get_job(&uuid::Uuid::new_v4().to_string())
        .await
        .is_none());
}
