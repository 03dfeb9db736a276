mod common;

use common::*;
use futures::future::join_all;
use screenshot_broker::domain::BlacklistReason;
use screenshot_broker::error::{AuthError, BrokerError};
use screenshot_broker::services::ScreenshotUpload;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_tokens_race_for_one_request() {
    let harness = Arc::new(Harness::new());
    harness.engine.on_request_event(requested("cat-r", "req-r")).await.unwrap();

    let mut payloads = Vec::new();
    for i in 0..8 {
        let token = harness
            .engine
            .tokens()
            .issue(&format!("peer-{i}"), "cat-r", "req-r")
            .unwrap();
        harness.engine.tokens().track(&token).await.unwrap();
        payloads.push(token.payload);
    }

    let attempts = payloads.iter().cloned().map(|payload| {
        let harness = harness.clone();
        tokio::spawn(async move {
            harness
                .engine
                .redeem(&payload, vec![ScreenshotUpload::new(b"shot".to_vec(), "image/png")])
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        match result {
            Err(BrokerError::RequestAlreadyFulfilled { request_id, .. }) => {
                assert_eq!(request_id, "req-r")
            }
            Err(BrokerError::Auth(AuthError::Blacklisted(BlacklistReason::OtherPeerUploaded))) => {}
            other => panic!("unexpected redemption result: {other:?}"),
        }
    }

    assert_eq!(harness.publisher.events().len(), 1);
    assert_eq!(harness.objects.len(), 1);

    // Every token but the winner ends up revoked as a sibling
    let winner_id = harness
        .engine
        .tokens()
        .winner_of("cat-r", "req-r")
        .await
        .unwrap()
        .unwrap();
    for payload in &payloads {
        let reason = harness
            .engine
            .tokens()
            .blacklist_reason(&payload.token_id)
            .await
            .unwrap();
        if payload.token_id == winner_id {
            assert_eq!(reason, Some(BlacklistReason::AlreadyUsed));
        } else {
            assert_eq!(reason, Some(BlacklistReason::OtherPeerUploaded));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_token_redeemed_concurrently() {
    let harness = Arc::new(Harness::new());
    let token = harness.engine.tokens().issue("peer-1", "cat-s", "req-s").unwrap();
    harness.engine.tokens().track(&token).await.unwrap();

    let attempts = (0..16).map(|_| {
        let harness = harness.clone();
        let payload = token.payload.clone();
        tokio::spawn(async move {
            harness
                .engine
                .redeem(&payload, vec![ScreenshotUpload::new(b"shot".to_vec(), "image/jpeg")])
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let already_used = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(BrokerError::Auth(AuthError::Blacklisted(BlacklistReason::AlreadyUsed)))
            )
        })
        .count();
    assert_eq!(already_used, 15);
    assert_eq!(harness.publisher.events().len(), 1);
}
