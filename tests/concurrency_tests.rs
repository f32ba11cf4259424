//! Concurrency guarantees: single execution per idempotency key, ordered
//! progress under multiple watchers, isolated rate-limit buckets.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use deckscan::cache::CacheStore;
use deckscan::catalogue::{CardLayout, CatalogueStore};
use deckscan::config::{LimitConfig, PipelineConfig, ServiceConfig};
use deckscan::fallback::VisionGate;
use deckscan::intake::{validate_upload, SanitizedImage};
use deckscan::jobs::{JobState, JobStore};
use deckscan::ocr::stub::ScriptedOcr;
use deckscan::ocr::{OcrSpan, RawOcr};
use deckscan::pipeline::{DeckResult, Pipeline};
use deckscan::progress::{ProgressChannel, ProgressFrame};

fn test_image(seed: u8) -> SanitizedImage {
    let mut img = image::RgbImage::new(320, 240);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = image::Rgb([
            ((x * 3 + seed as u32) % 251) as u8,
            (y % 249) as u8,
            ((x + 2 * y) % 241) as u8,
        ]);
    }
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    let limits = LimitConfig {
        min_image_bytes: 16,
        ..LimitConfig::default()
    };
    validate_upload(None, &buf.into_inner(), &limits).unwrap()
}

fn scripted() -> Arc<ScriptedOcr> {
    Arc::new(ScriptedOcr::fixed(RawOcr::from_spans(vec![
        OcrSpan::new("4 Lightning Bolt", 0.9),
        OcrSpan::new("4 Counterspell", 0.9),
        OcrSpan::new("Sideboard", 0.95),
        OcrSpan::new("3 Negate", 0.9),
    ])))
}

fn pipeline(provider: Arc<ScriptedOcr>) -> Arc<Pipeline> {
    let mut config = ServiceConfig::default();
    config.retention.image_dir = std::env::temp_dir()
        .join(format!("deckscan-conc-{}", uuid::Uuid::new_v4()))
        .display()
        .to_string();
    let cache = Arc::new(CacheStore::in_memory(8192));
    let catalogue = CatalogueStore::in_memory().unwrap();
    for name in ["Lightning Bolt", "Counterspell", "Negate"] {
        catalogue
            .insert_named(name, CardLayout::Normal, vec![], None)
            .unwrap();
    }
    catalogue.load_index().unwrap();
    let gate = Arc::new(VisionGate::new(config.vision.clone()));
    let jobs = Arc::new(JobStore::new(cache.clone(), Duration::from_secs(3600)));
    let progress = Arc::new(ProgressChannel::new(Duration::from_millis(250)));
    Arc::new(Pipeline::new(
        config,
        cache,
        Arc::new(catalogue),
        provider,
        gate,
        jobs,
        progress,
    ))
}

async fn wait_terminal(pipeline: &Arc<Pipeline>, job_id: &str) -> deckscan::jobs::JobRecord {
    for _ in 0..500 {
        if let Some(job) = pipeline.jobs().get_job(job_id).await {
            if job.state.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never terminated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_execute_once() {
    let provider = scripted();
    let pipeline = pipeline(provider.clone());
    let image = test_image(1);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pipeline = pipeline.clone();
        let image = image.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .submit(image, PipelineConfig::default(), None)
                .await
                .unwrap()
        }));
    }

    let mut job_ids = Vec::new();
    for handle in handles {
        job_ids.push(handle.await.unwrap().job_id);
    }

    let mut decks = Vec::new();
    for job_id in &job_ids {
        let job = wait_terminal(&pipeline, job_id).await;
        assert_eq!(job.state, JobState::Completed);
        let result: DeckResult = serde_json::from_value(job.result.unwrap()).unwrap();
        decks.push(result.normalized);
    }
    // Every observer sees an equal result.
    for deck in &decks[1..] {
        assert_eq!(deck, &decks[0]);
    }
    // The pipeline body ran once: a single pass over at most four
    // preprocessing variants.
    assert!(
        provider.primary_calls() <= 4,
        "pipeline ran more than once ({} recognition calls)",
        provider.primary_calls()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watchers_see_ordered_frames_to_terminal() {
    let provider = scripted();
    let pipeline = pipeline(provider);
    let image = test_image(2);

    let outcome = pipeline
        .submit(image, PipelineConfig::default(), None)
        .await
        .unwrap();

    // Two watchers subscribe while the job runs.
    let current = ProgressFrame::snapshot(JobState::Queued, 0);
    let mut subs = vec![
        pipeline
            .progress_channel()
            .subscribe(&outcome.job_id, current.clone()),
        pipeline.progress_channel().subscribe(&outcome.job_id, current),
    ];

    wait_terminal(&pipeline, &outcome.job_id).await;

    for sub in &mut subs {
        let mut last = 0u8;
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(200), sub.receiver.recv()).await
        {
            assert!(frame.progress >= last, "frames reordered");
            last = frame.progress;
            if frame.state.is_terminal() {
                break;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_images_run_in_parallel_without_interference() {
    let provider = scripted();
    let pipeline = pipeline(provider);

    let mut handles = Vec::new();
    for seed in 0..3u8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .submit(test_image(seed + 10), PipelineConfig::default(), None)
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(!outcome.cached);
        ids.push(outcome.job_id);
    }
    // Three distinct fingerprints, three distinct jobs, all complete.
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    for id in &ids {
        assert_eq!(wait_terminal(&pipeline, id).await.state, JobState::Completed);
    }
}
