//! HTTP surface tests driven through the router in-process.

#![cfg(feature = "server")]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use deckscan::catalogue::{CardLayout, CatalogueStore};
use deckscan::config::ServiceConfig;
use deckscan::ocr::stub::ScriptedOcr;
use deckscan::ocr::{OcrSpan, RawOcr};
use deckscan::server::state::AppState;
use deckscan::server::build_router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tower::util::ServiceExt;

fn png_bytes() -> Vec<u8> {
    let mut img = RgbImage::new(400, 300);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgb([(x % 251) as u8, (y % 239) as u8, ((x * y) % 241) as u8]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

async fn app() -> (Router, AppState) {
    let mut config = ServiceConfig::default();
    config.limits.min_image_bytes = 16;
    config.retention.image_dir = std::env::temp_dir()
        .join(format!("deckscan-api-{}", uuid::Uuid::new_v4()))
        .display()
        .to_string();

    let catalogue = CatalogueStore::in_memory().unwrap();
    for name in ["Lightning Bolt", "Counterspell", "Negate", "Island"] {
        catalogue
            .insert_named(name, CardLayout::Normal, vec![], None)
            .unwrap();
    }
    catalogue.load_index().unwrap();

    let provider = Arc::new(ScriptedOcr::fixed(RawOcr::from_spans(vec![
        OcrSpan::new("4 Lightning Bolt", 0.9),
        OcrSpan::new("24 Island", 0.92),
        OcrSpan::new("Sideboard", 0.95),
        OcrSpan::new("3 Negate", 0.9),
    ])));

    let state = AppState::build(config, Arc::new(catalogue), provider)
        .await
        .unwrap();
    (build_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_body(boundary: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_and_readiness_respond() {
    let (router, _state) = app().await;

    let health = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let ready = router
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn submission_roundtrip_to_completed_status() {
    let (router, state) = app().await;

    let boundary = "deckscanboundary";
    let body = multipart_body(boundary, "deck.png", &png_bytes());
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/jobs")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-remaining"));

    let submit = body_json(response).await;
    let job_id = submit["jobId"].as_str().unwrap().to_string();
    assert_eq!(submit["cached"], serde_json::json!(false));

    // Poll the status route until terminal.
    let mut last = serde_json::Value::Null;
    for _ in 0..300 {
        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/jobs/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        last = body_json(response).await;
        if last["state"] == "completed" || last["state"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["state"], "completed");
    assert_eq!(last["progress"], 100);
    assert!(last["result"].is_object());

    // Resubmission of identical bytes is an idempotency hit.
    let body = multipart_body(boundary, "deck.png", &png_bytes());
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/jobs")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let resubmit = body_json(response).await;
    assert_eq!(resubmit["cached"], serde_json::json!(true));
    assert_eq!(resubmit["jobId"].as_str().unwrap(), job_id);

    drop(state);
}

#[tokio::test]
async fn suspicious_headers_are_rejected() {
    let (router, _state) = app().await;
    let response = router
        .oneshot(
            Request::post("/api/v1/jobs")
                .header("x-original-url", "/admin")
                .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
                .body(Body::from("--x--\r\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn status_route_validates_identifiers() {
    let (router, _state) = app().await;

    let malformed = router
        .clone()
        .oneshot(
            Request::get("/api/v1/jobs/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let unknown = router
        .oneshot(
            Request::get(format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_route_returns_text_with_rate_headers() {
    let (router, _state) = app().await;
    let deck = serde_json::json!({
        "main": [
            {"quantity": 4, "name": "Lightning Bolt"},
            {"quantity": 24, "name": "Island"},
        ],
        "side": [
            {"quantity": 3, "name": "Negate"},
        ],
    });

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/export/mtga")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(deck.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(response.headers().contains_key("x-ratelimit-limit"));

    let text = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.starts_with("Deck\n4 Lightning Bolt\n24 Island\n"));
    assert!(text.contains("\nSideboard\n3 Negate"));

    let bad = router
        .oneshot(
            Request::post("/api/v1/export/docx")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(deck.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn retention_route_validates_identifiers() {
    let (router, _state) = app().await;
    let response = router
        .clone()
        .oneshot(
            Request::delete("/api/v1/data/neither-uuid-nor-digest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let digest = "c".repeat(64);
    let response = router
        .oneshot(
            Request::delete(format!("/api/v1/data/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn introspection_routes_respond() {
    let (router, _state) = app().await;
    for path in [
        "/api/v1/status/vision",
        "/api/v1/status/cache",
        "/api/v1/status/jobs",
    ] {
        let response = router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "route {path}");
    }
}

#[tokio::test]
async fn unknown_routes_return_structured_404() {
    let (router, _state) = app().await;
    let response = router
        .oneshot(Request::get("/api/v2/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
