//! Offline OCR implementations.
//!
//! [`ScriptedOcr`] replays prepared results so pipelines run with no engine
//! installed; [`FaultyOcr`] injects failures for resilience tests. Both are
//! deterministic: output depends only on construction and call order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::DynamicImage;

use super::{OcrProvider, RawOcr};
use crate::error::{Result, ServiceError};
use crate::preprocess::Variant;

/// Replays a fixed sequence of recognition results. Once the script is
/// exhausted the last entry repeats, which keeps best-of loops total.
pub struct ScriptedOcr {
    script: Vec<RawOcr>,
    vision_result: Option<RawOcr>,
    primary_calls: AtomicUsize,
    vision_calls: AtomicUsize,
}

impl ScriptedOcr {
    /// Every recognition call returns the same result.
    pub fn fixed(result: RawOcr) -> Self {
        Self::sequence(vec![result])
    }

    /// Recognition calls walk the script in order.
    pub fn sequence(script: Vec<RawOcr>) -> Self {
        Self {
            script,
            vision_result: None,
            primary_calls: AtomicUsize::new(0),
            vision_calls: AtomicUsize::new(0),
        }
    }

    /// Configure a distinct vision-model result.
    pub fn with_vision(mut self, result: RawOcr) -> Self {
        self.vision_result = Some(result);
        self
    }

    pub fn primary_calls(&self) -> usize {
        self.primary_calls.load(Ordering::Relaxed)
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OcrProvider for ScriptedOcr {
    async fn recognize(&self, _variant: &Variant, min_span_confidence: f64) -> Result<RawOcr> {
        let call = self.primary_calls.fetch_add(1, Ordering::Relaxed);
        let index = call.min(self.script.len().saturating_sub(1));
        let scripted = self
            .script
            .get(index)
            .cloned()
            .ok_or_else(|| ServiceError::Ocr("empty script".to_string()))?;
        let spans = scripted
            .spans
            .into_iter()
            .filter(|s| s.confidence >= min_span_confidence)
            .collect();
        Ok(RawOcr::from_spans(spans))
    }

    async fn vision(&self, _image: &DynamicImage) -> Result<RawOcr> {
        self.vision_calls.fetch_add(1, Ordering::Relaxed);
        self.vision_result
            .clone()
            .ok_or_else(|| ServiceError::ExternalService("vision not scripted".to_string()))
    }
}

/// Injects failures ahead of (optionally) succeeding.
pub struct FaultyOcr {
    primary_failures_left: Mutex<usize>,
    primary_result: Option<RawOcr>,
    vision_failures_left: Mutex<usize>,
    vision_result: Option<RawOcr>,
}

impl FaultyOcr {
    /// Every call on both operations fails.
    pub fn always_failing() -> Self {
        Self {
            primary_failures_left: Mutex::new(usize::MAX),
            primary_result: None,
            vision_failures_left: Mutex::new(usize::MAX),
            vision_result: None,
        }
    }

    /// The first `n` recognition calls fail, then `result` is returned.
    pub fn primary_fails_first(n: usize, result: RawOcr) -> Self {
        Self {
            primary_failures_left: Mutex::new(n),
            primary_result: Some(result),
            vision_failures_left: Mutex::new(usize::MAX),
            vision_result: None,
        }
    }

    /// Recognition succeeds with `primary`; the first `n` vision calls fail
    /// before `vision` (if any) is served.
    pub fn vision_fails_first(primary: RawOcr, n: usize, vision: Option<RawOcr>) -> Self {
        Self {
            primary_failures_left: Mutex::new(0),
            primary_result: Some(primary),
            vision_failures_left: Mutex::new(n),
            vision_result: vision,
        }
    }
}

#[async_trait]
impl OcrProvider for FaultyOcr {
    async fn recognize(&self, _variant: &Variant, _min_span_confidence: f64) -> Result<RawOcr> {
        let mut left = self
            .primary_failures_left
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *left > 0 {
            *left = left.saturating_sub(1);
            return Err(ServiceError::Ocr("injected recognition fault".to_string()));
        }
        self.primary_result
            .clone()
            .ok_or_else(|| ServiceError::Ocr("injected recognition fault".to_string()))
    }

    async fn vision(&self, _image: &DynamicImage) -> Result<RawOcr> {
        let mut left = self
            .vision_failures_left
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *left > 0 {
            *left = left.saturating_sub(1);
            return Err(ServiceError::ExternalService(
                "injected vision fault".to_string(),
            ));
        }
        self.vision_result
            .clone()
            .ok_or_else(|| ServiceError::ExternalService("injected vision fault".to_string()))
    }
}
