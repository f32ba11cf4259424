use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use deckscan::catalogue::fuzzy::{normalize_name, score_candidates, ScoreContext};
use deckscan::fingerprint::ImageFingerprint;
use deckscan::ocr::OcrSpan;
use deckscan::parser::parse_spans;

fn bench_fingerprint(c: &mut Criterion) {
    let payload = vec![0x5au8; 512 * 1024];
    c.bench_function("fingerprint_512k", |b| {
        b.iter(|| ImageFingerprint::compute(black_box(&payload)))
    });
}

fn bench_parser(c: &mut Criterion) {
    let spans: Vec<OcrSpan> = (0..60)
        .map(|i| OcrSpan::new(format!("4 Card Name {i}"), 0.9))
        .collect();
    c.bench_function("parse_60_spans", |b| b.iter(|| parse_spans(black_box(&spans))));
}

fn bench_fuzzy(c: &mut Criterion) {
    let corpus: Vec<String> = (0..2000)
        .map(|i| normalize_name(&format!("Synthetic Card Number {i}")))
        .collect();
    let ctx = ScoreContext::default();
    c.bench_function("fuzzy_2k_corpus", |b| {
        b.iter(|| score_candidates(&ctx, black_box("Synthetic Card Number 1042"), &corpus, 5))
    });
}

criterion_group!(benches, bench_fingerprint, bench_parser, bench_fuzzy);
criterion_main!(benches);
