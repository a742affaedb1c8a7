use std::sync::Arc;

use powerflow_core::{ApiErrorClass, PocketClient, RateLimiter, RetryPolicy};
use serde_json::json;
use time::macros::datetime;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PocketClient {
    PocketClient::with_base_url(&server.uri(), "pocket-key", Arc::new(RateLimiter::new(1000.0)))
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(3))
}

fn detail(id: &str, created_at: &str) -> serde_json::Value {
    json!({
        "data": {
            "id": id,
            "title": format!("Recording {id}"),
            "createdAt": created_at,
            "summarizations": {"v2_summary": {"markdown": "Summary."}}
        }
    })
}

#[tokio::test]
async fn list_sends_bearer_token_and_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .and(query_param("limit", "100"))
        .and(header("authorization", "Bearer pocket-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "a", "createdAt": "2026-02-06T10:00:00Z"}, {"title": "no id"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let listed = client(&server).list_recordings().await.unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id.as_deref(), Some("a"));
    assert_eq!(listed[0].created_at(), Some(datetime!(2026-02-06 10:00 UTC)));
}

#[tokio::test]
async fn list_follows_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "b"}],
            "pagination": {"has_more": false}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "a"}],
            "pagination": {"hasMore": true}
        })))
        .mount(&server)
        .await;

    let listed = client(&server).list_recordings().await.unwrap();
    let ids: Vec<_> = listed.iter().filter_map(|r| r.id.clone()).collect();

    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn fetch_filters_by_watermark_and_skips_failed_details() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "old", "createdAt": "2026-02-01T00:00:00Z"},
                {"id": "new", "createdAt": "2026-02-06T00:00:00Z"},
                {"id": "broken", "createdAt": "2026-02-07T00:00:00Z"},
                {"id": "undated"},
                {"title": "no id"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings/new"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(detail("new", "2026-02-06T00:00:00Z")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings/undated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "undated"}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings/broken"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings/old"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(detail("old", "2026-02-01T00:00:00Z")),
        )
        .expect(0)
        .mount(&server)
        .await;

    let fetched = client(&server)
        .fetch_recordings(Some(datetime!(2026-02-05 0:00 UTC)))
        .await
        .unwrap();
    let ids: Vec<_> = fetched.recordings.iter().map(|r| r.id.as_str()).collect();

    assert_eq!(ids, vec!["new", "undated"]);
    assert_eq!(
        fetched.recordings[0].source_url.as_deref(),
        Some("https://heypocket.com/recordings/new")
    );
    assert_eq!(fetched.failures.len(), 1);
    assert_eq!(fetched.failures[0].id, "broken");
    assert_eq!(
        fetched.failures[0].created_at,
        Some(datetime!(2026-02-07 0:00 UTC))
    );
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings/r1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/recordings/r1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(detail("r1", "2026-02-06T00:00:00Z")),
        )
        .mount(&server)
        .await;

    let recording = client(&server).get_recording("r1").await.unwrap().unwrap();

    assert_eq!(recording.display_title(), "Recording r1");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).list_recordings().await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
}

#[tokio::test]
async fn auth_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/recordings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).test_connection().await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(err.to_string().contains("bad key"));
}
