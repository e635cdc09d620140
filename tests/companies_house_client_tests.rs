//! Companies House client behaviour against a mock registry.

use std::time::{Duration, Instant};

use detecktiv::companies_house::{CompaniesHouseClient, CompaniesHouseError};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> CompaniesHouseClient {
    CompaniesHouseClient::new("test-key", server.uri(), Duration::from_secs(5))
        .unwrap()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

#[tokio::test]
async fn sends_basic_auth_with_api_key_as_username() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/companies"))
        .and(header("authorization", "Basic dGVzdC1rZXk6"))
        .and(query_param("q", "acme"))
        .and(query_param("items_per_page", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).search_companies("acme", 20, 0).await.unwrap();
    assert_eq!(result["items"], json!([]));
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/01234567"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "company_name": "ACME" })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = client(&server).company_profile("01234567").await.unwrap();
    assert_eq!(profile["company_name"], "ACME");
}

#[tokio::test]
async fn honours_retry_after_on_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/officers"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/officers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let started = Instant::now();
    client(&server).officers("01234567").await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn oversized_retry_after_falls_back_to_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/filing-history"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e20"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/filing-history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    let history = client(&server).filing_history("01234567", 25).await.unwrap();
    assert_eq!(history["items"], json!([]));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn unauthorized_fails_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/charges"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).charges("01234567").await.unwrap_err();
    assert!(matches!(err, CompaniesHouseError::Unauthorized));
}

#[tokio::test]
async fn persistent_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567/filing-history"))
        .respond_with(ResponseTemplate::new(502))
        .expect(5)
        .mount(&server)
        .await;

    let err = client(&server)
        .filing_history("01234567", 25)
        .await
        .unwrap_err();
    assert_eq!(err.upstream_status(), 502);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/99999999"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{\"errors\":[]}"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).company_profile("99999999").await.unwrap_err();
    match err {
        CompaniesHouseError::Status { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("errors"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_company_numbers_never_hit_the_network() {
    let server = MockServer::start().await;
    let err = client(&server).company_profile("../etc").await.unwrap_err();
    assert!(matches!(err, CompaniesHouseError::InvalidCompanyNumber(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
