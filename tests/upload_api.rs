mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use common::*;
use screenshot_broker::bootstrap::Broker;
use screenshot_broker::config::AppConfig;
use screenshot_broker::coordination::GracefulShutdown;
use screenshot_broker::domain::BlacklistReason;
use screenshot_broker::signing::TokenAuthority;
use tower::ServiceExt;

async fn tracked_token(harness: &Harness, peer_id: &str, catalog_id: &str, request_id: &str) -> String {
    let token = harness
        .engine
        .tokens()
        .issue(peer_id, catalog_id, request_id)
        .unwrap();
    harness.engine.tokens().track(&token).await.unwrap();
    token.token
}

#[tokio::test]
async fn test_missing_or_malformed_header() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);

    let response = app
        .clone()
        .oneshot(upload_request("cat-1", None, &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid authorization header");

    let request = Request::builder()
        .method("POST")
        .uri("/api/screenshot/cat-1")
        .header(header::AUTHORIZATION, "Token abc")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(&[("image/png", b"x")])))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forged_and_garbage_tokens() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);

    let response = app
        .clone()
        .oneshot(upload_request("cat-1", Some("not-a-token"), &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid or expired token");

    let token = tracked_token(&harness, "peer-1", "cat-1", "req-1").await;
    let (body, _) = token.split_once('.').unwrap();
    let forged = format!("{body}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    let response = app
        .oneshot(upload_request("cat-1", Some(&forged), &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_expired_token_is_blacklisted_with_reason() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);

    let stale = harness
        .engine
        .tokens()
        .issue_at("peer-1", "cat-1", "req-1", Utc::now() - Duration::hours(2))
        .unwrap();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(upload_request("cat-1", Some(&stale.token), &[("image/png", b"x")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Token has expired");
    }

    assert_eq!(
        harness
            .engine
            .tokens()
            .blacklist_reason(stale.token_id())
            .await
            .unwrap(),
        Some(BlacklistReason::Expired)
    );
}

#[tokio::test]
async fn test_catalog_mismatch_and_file_count() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);
    let token = tracked_token(&harness, "peer-1", "cat-1", "req-1").await;

    let response = app
        .clone()
        .oneshot(upload_request("cat-2", Some(&token), &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(upload_request("cat-1", Some(&token), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No screenshots provided");

    let eleven: Vec<(&str, &[u8])> = (0..11).map(|_| ("image/png", &b"x"[..])).collect();
    let response = app
        .clone()
        .oneshot(upload_request("cat-1", Some(&token), &eleven))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // None of the refusals consumed the token
    let response = app
        .oneshot(upload_request("cat-1", Some(&token), &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_part_refused_before_token_is_spent() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);
    let token = tracked_token(&harness, "peer-1", "cat-1", "req-1").await;

    let response = app
        .clone()
        .oneshot(upload_request(
            "cat-1",
            Some(&token),
            &[("image/png", b"one"), ("image/png", b""), ("image/webp", b"three")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Screenshot 2 is empty");
    assert!(harness.publisher.events().is_empty());
    assert!(harness.objects.is_empty());

    let response = app
        .oneshot(upload_request(
            "cat-1",
            Some(&token),
            &[("image/png", b"one"), ("image/webp", b"three")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["screenshot_urls"].as_array().unwrap().len(), 2);

    let events = harness.publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].screenshot_urls.len(), 2);
}

#[tokio::test]
async fn test_catalog_id_with_separators_round_trips() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);

    for catalog_id in ["imdb:tt0111161", "cat/1", "movie 42"] {
        harness.engine.on_request_event(requested(catalog_id, "req-1")).await.unwrap();
        let pending = harness.engine.ledger().list(catalog_id).await.unwrap();
        harness
            .engine
            .invite(&peer("peer-1", "edge-1", &[catalog_id]), &pending[0])
            .await
            .unwrap();
        let (_, invite) = harness.relay.invites().pop().unwrap();
        assert_eq!(invite.catalog_id, catalog_id);

        let response = app
            .clone()
            .oneshot(upload_request_to(
                &invite.screenshot_upload_url,
                Some(&invite.token),
                &[("image/png", b"one"), ("image/png", b"two")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{catalog_id:?}");
        let body = body_json(response).await;
        assert_eq!(body["catalog_id"], catalog_id);
        assert_eq!(body["screenshot_urls"].as_array().unwrap().len(), 2);
        assert!(harness.engine.ledger().list(catalog_id).await.unwrap().is_empty());
    }
    assert_eq!(harness.objects.len(), 6);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let harness = Harness::new();
    let shutdown = GracefulShutdown::with_defaults();
    let (app, _bus) = harness.serve(&shutdown);

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "ok");

    let token = tracked_token(&harness, "peer-1", "cat-1", "req-1").await;
    let response = app
        .clone()
        .oneshot(upload_request("cat-1", Some(&token), &[("image/png", b"x")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("screenshot_broker_redemptions_accepted_total 1"));
    assert!(text.contains("screenshot_broker_uploads_succeeded_total 1"));
}

#[tokio::test]
async fn test_presigned_object_served_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default_config("object-route-secret-0123456789abcdef");
    config.storage.root_dir = dir.path().display().to_string();
    let broker = Broker::build(&config, true).await.unwrap();
    let app = broker.router();

    let token = broker.engine().tokens().issue("peer-1", "cat-1", "req-1").unwrap();
    broker.engine().tokens().track(&token).await.unwrap();

    let response = app
        .clone()
        .oneshot(upload_request("cat-1", Some(&token.token), &[("image/png", b"pixels")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let url = body_json(response).await["screenshot_urls"][0]
        .as_str()
        .unwrap()
        .to_string();
    let path = url.strip_prefix("http://localhost:8000").unwrap().to_string();

    let response = app
        .clone()
        .oneshot(Request::get(path.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"pixels");

    let tampered = path.replace("signature=", "signature=00");
    let response = app
        .oneshot(Request::get(tampered.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(TokenAuthority::peek_token_id(&token.token).is_some());
}
