//! OCR provider interface and best-of-variants selection.
//!
//! The concrete engine lives outside this crate; callers program against
//! [`OcrProvider`]. The closed set of in-crate implementations (a scripted
//! offline provider and a fault-injecting one) lives in [`stub`] and backs
//! the test suites. Implementations must be deterministic for a given
//! (bytes, config, seed).

pub mod stub;

use async_trait::async_trait;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::preprocess::Variant;

/// One recognized text fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSpan {
    pub text: String,
    pub confidence: f64,
}

impl OcrSpan {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// An ordered span sequence with its aggregate confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOcr {
    pub spans: Vec<OcrSpan>,
    pub mean_confidence: f64,
}

impl RawOcr {
    pub fn from_spans(spans: Vec<OcrSpan>) -> Self {
        let mean_confidence = if spans.is_empty() {
            0.0
        } else {
            spans.iter().map(|s| s.confidence).sum::<f64>() / spans.len() as f64
        };
        Self {
            spans,
            mean_confidence,
        }
    }

    /// Composite quality score used to rank variant results.
    pub fn score(&self) -> f64 {
        0.6 * self.spans.len() as f64 + 40.0 * self.mean_confidence
    }
}

static QUANTITY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+|[1-9]\dx)\s+\S+").expect("quantity-line regex"));

/// Count spans whose text opens with a quantity prefix. Feeds the vision
/// fallback gate.
pub fn quantity_line_count(spans: &[OcrSpan]) -> u32 {
    spans
        .iter()
        .filter(|s| QUANTITY_LINE.is_match(&s.text.trim().to_lowercase()))
        .count() as u32
}

/// Abstraction over the OCR engine and the generalist vision model.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Recognize text in one preprocessed variant. Spans below
    /// `min_span_confidence` must already be filtered out of the result.
    async fn recognize(&self, variant: &Variant, min_span_confidence: f64) -> Result<RawOcr>;

    /// Invoke the external vision model. Failures must surface as errors,
    /// never as empty-but-ok results, so the circuit breaker can see them.
    async fn vision(&self, image: &DynamicImage) -> Result<RawOcr>;
}

/// Run OCR over the variants in order and keep the best-scoring result.
///
/// A single failing variant is absorbed with a warning; the call only fails
/// when every variant does. May return early once the running best reaches
/// `early_stop_confidence` with at least twenty spans.
pub async fn best_of(
    provider: &dyn OcrProvider,
    variants: &[Variant],
    min_span_confidence: f64,
    early_stop_confidence: f64,
) -> Result<RawOcr> {
    let mut best: Option<RawOcr> = None;
    let mut failures = 0usize;

    for variant in variants {
        let result = match provider.recognize(variant, min_span_confidence).await {
            Ok(result) => result,
            Err(err) => {
                failures += 1;
                tracing::warn!(kind = ?variant.kind, error = %err, "variant failed OCR");
                continue;
            }
        };

        let better = best
            .as_ref()
            .map(|current| result.score() > current.score())
            .unwrap_or(true);
        if better {
            best = Some(result);
        }

        if let Some(current) = &best {
            if current.mean_confidence >= early_stop_confidence && current.spans.len() >= 20 {
                break;
            }
        }
    }

    match best {
        Some(result) => Ok(result),
        None if failures > 0 => Err(ServiceError::Ocr(format!(
            "all {failures} variants failed recognition"
        ))),
        None => Err(ServiceError::Ocr("no variants to recognize".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::stub::{FaultyOcr, ScriptedOcr};
    use super::*;
    use crate::config::{OcrConfig, PreprocessFlags};
    use crate::preprocess::preprocess_variants;
    use image::{DynamicImage, GrayImage, Luma};

    fn variants() -> Vec<Variant> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(200, 160, |x, y| {
            Luma([((x * y) % 256) as u8])
        }));
        preprocess_variants(&img, &PreprocessFlags::default(), &OcrConfig::default())
    }

    #[test]
    fn mean_confidence_averages_spans() {
        let raw = RawOcr::from_spans(vec![OcrSpan::new("a", 0.8), OcrSpan::new("b", 0.6)]);
        assert!((raw.mean_confidence - 0.7).abs() < 1e-9);
        assert_eq!(RawOcr::from_spans(vec![]).mean_confidence, 0.0);
    }

    #[test]
    fn quantity_lines_match_prefix_shapes() {
        let spans = vec![
            OcrSpan::new("4 Lightning Bolt", 0.9),
            OcrSpan::new("Sideboard", 0.9),
            OcrSpan::new("12x Mountain", 0.9),
            OcrSpan::new("x4", 0.9),
        ];
        assert_eq!(quantity_line_count(&spans), 2);
    }

    #[tokio::test]
    async fn best_of_prefers_higher_scores() {
        // Scripted provider returns richer results on later calls.
        let poor = RawOcr::from_spans(vec![OcrSpan::new("2 Opt", 0.4)]);
        let rich = RawOcr::from_spans(vec![
            OcrSpan::new("4 Lightning Bolt", 0.9),
            OcrSpan::new("4 Counterspell", 0.9),
        ]);
        let provider = ScriptedOcr::sequence(vec![poor, rich.clone()]);
        let out = best_of(&provider, &variants(), 0.3, 0.99).await.unwrap();
        assert_eq!(out, rich);
    }

    #[tokio::test]
    async fn best_of_absorbs_partial_failures() {
        let ok = RawOcr::from_spans(vec![OcrSpan::new("4 Opt", 0.8)]);
        let provider = FaultyOcr::primary_fails_first(1, ok.clone());
        let out = best_of(&provider, &variants(), 0.3, 0.99).await.unwrap();
        assert_eq!(out, ok);
    }

    #[tokio::test]
    async fn best_of_fails_when_every_variant_fails() {
        let provider = FaultyOcr::always_failing();
        let err = best_of(&provider, &variants(), 0.3, 0.99).await.unwrap_err();
        assert_eq!(err.code(), "OCR_ERROR");
    }

    #[tokio::test]
    async fn best_of_stops_early_on_confident_results() {
        let spans: Vec<_> = (0..25)
            .map(|i| OcrSpan::new(format!("4 Card Number {i}"), 0.95))
            .collect();
        let confident = RawOcr::from_spans(spans);
        let provider = ScriptedOcr::sequence(vec![confident]);
        let out = best_of(&provider, &variants(), 0.3, 0.85).await.unwrap();
        assert_eq!(out.spans.len(), 25);
        // Only the first variant was consumed.
        assert_eq!(provider.primary_calls(), 1);
    }
}
