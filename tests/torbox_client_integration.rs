//! Integration tests for the Torbox client and job resolution.
//!
//! These tests run the real HTTP client against a wiremock server.

use std::time::Duration;

use serde_json::json;
use torbox_core::jobs::{JobResolver, JobState, TorboxJobReference, extract_file_links};
use torbox_core::torbox::{JobApi, RetryPolicy, TorboxClient, TorboxConfig, TorboxErrorKind};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(
        4,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
}

fn client_for(server: &MockServer) -> TorboxClient {
    TorboxClient::new(
        TorboxConfig::new(server.uri(), Some("integration-key-123".to_string()))
            .with_retry_policy(fast_policy()),
    )
    .unwrap()
}

// ==================== Connectivity ====================

#[tokio::test]
async fn test_check_connection_returns_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/user/me"))
        .and(header("authorization", "Bearer integration-key-123"))
        .and(header("x-api-key", "integration-key-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"email": "me@example.test", "plan": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = client_for(&server).check_connection().await.unwrap();
    assert_eq!(profile["email"], "me@example.test");
}

#[tokio::test]
async fn test_unauthorized_maps_to_kind_with_envelope_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/user/me"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"success": false, "detail": "bad token"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let error = client_for(&server).check_connection().await.unwrap_err();
    assert_eq!(error.kind(), TorboxErrorKind::Unauthorized);
    assert_eq!(error.status(), Some(401));
    assert!(error.to_string().contains("bad token"));
}

// ==================== Retry ====================

#[tokio::test]
async fn test_rate_limited_then_success_honours_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
        .mount(&server)
        .await;

    let listing = client_for(&server).list_jobs().await.unwrap();
    assert_eq!(listing, json!([]));
}

#[tokio::test]
async fn test_service_unavailable_exhausts_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(4)
        .mount(&server)
        .await;

    let error = client_for(&server).list_jobs().await.unwrap_err();
    assert_eq!(error.kind(), TorboxErrorKind::ServerError);
    assert!(error.to_string().contains("maintenance"));
}

// ==================== Job resolution ====================

#[tokio::test]
async fn test_resolver_falls_back_from_hash_to_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs/h1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "unknown hash"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "active": [{"id": 1, "hash": "other", "status": "downloading"}],
                "completed": [{
                    "id": 7,
                    "hash": "h1",
                    "status": "finished",
                    "progress": "100",
                    "files": [{"url": "https://cdn.test/v.mp4", "name": "v.mp4", "size": 10}]
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let reference = TorboxJobReference::new(Some("7".to_string()), Some("h1".to_string()));
    let status = JobResolver::new(&client)
        .resolve(&reference)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(status.status, JobState::Completed);
    assert!((status.progress - 100.0).abs() < f64::EPSILON);
    let links = extract_file_links(&status.raw);
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].filename.as_deref(), Some("v.mp4"));
    assert_eq!(links[0].size_bytes, Some(10));
}

#[tokio::test]
async fn test_resolver_uses_id_filtered_listing_last() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/webdl/mylist"))
        .and(query_param("id", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"webdownload_id": 9, "download_state": "queued"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let reference = TorboxJobReference::new(Some("9".to_string()), None);
    let status = JobResolver::new(&client)
        .resolve(&reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, JobState::Queued);
    assert_eq!(status.job_id.as_deref(), Some("9"));
}

#[tokio::test]
async fn test_resolver_returns_none_when_job_is_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/integration/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/webdl/mylist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let reference = TorboxJobReference::new(Some("3".to_string()), None);
    assert!(JobResolver::new(&client).resolve(&reference).await.unwrap().is_none());
}

// ==================== Job lifecycle calls ====================

#[tokio::test]
async fn test_create_then_cancel_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/api/webdl/asynccreatewebdownload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"webdownload_id": 55, "hash": "hh"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/api/integration/job/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let created = client.create_job("https://host/post/1", Some("clip")).await.unwrap();
    let reference = torbox_core::jobs::reference_from_payload(&created).unwrap();
    assert_eq!(reference.numeric_id(), Some(55));

    client.cancel_job(reference.numeric_id().unwrap()).await.unwrap();
}
