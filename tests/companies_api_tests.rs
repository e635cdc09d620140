//! Company catalogue endpoints, including registry sync and snapshots.

use detecktiv::models::user::{ROLE_ADMIN, ROLE_ANALYST};
use reqwest::StatusCode;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TestApp, spawn_test_app, test_config};

async fn create(app: &TestApp, token: &str, body: Value) -> reqwest::Response {
    app.http
        .post(app.endpoint("/v1/companies"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn create_normalises_and_rejects_duplicates() {
    let app = spawn_test_app(test_config()).await;
    let token = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;

    let response = create(
        &app,
        &token,
        json!({
            "name": "Acme Widgets Ltd",
            "website": "acme.co.uk",
            "postcode": "sw1a 1aa",
            "employee_count": 12
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let company: Value = response.json().await.unwrap();
    assert_eq!(company["website"], "https://acme.co.uk");
    assert_eq!(company["postcode"], "SW1A 1AA");
    assert_eq!(company["country"], "GB");
    assert_eq!(company["data_source"], "manual");
    assert_eq!(company["is_prospect"], false);

    let response = create(&app, &token, json!({ "name": "ACME WIDGETS LTD" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = create(&app, &token, json!({ "name": "Neg Co", "employee_count": -1 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = create(&app, &token, json!({ "name": "   " })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_filters_pages_and_searches() {
    let app = spawn_test_app(test_config()).await;
    let token = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;
    for (name, postcode) in [
        ("Alpha Ltd", "EC1A 1BB"),
        ("Beta Ltd", "EC2A 2BB"),
        ("Gamma Ltd", "M1 1AA"),
    ] {
        let response = create(&app, &token, json!({ "name": name, "postcode": postcode })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let page: Value = app
        .http
        .get(app.endpoint("/v1/companies?page=1&page_size=2&order_by=name&order=desc"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total_count"], 3);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["companies"][0]["name"], "Gamma Ltd");

    let by_prefix: Value = app
        .http
        .get(app.endpoint("/v1/companies/postcode/ec"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_prefix.as_array().unwrap().len(), 2);

    let found: Value = app
        .http
        .get(app.endpoint("/v1/companies/search?query=beta"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found[0]["name"], "Beta Ltd");

    let response = app
        .http
        .get(app.endpoint("/v1/companies?data_source=carrier-pigeon"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn prospect_update_and_admin_only_delete() {
    let app = spawn_test_app(test_config()).await;
    let analyst = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;
    let admin = app.access_token_for("admin@example.com", ROLE_ADMIN).await;

    let company: Value = create(&app, &analyst, json!({ "name": "Delta Ltd" }))
        .await
        .json()
        .await
        .unwrap();
    let id = company["id"].as_i64().unwrap();

    let prospect: Value = app
        .http
        .post(app.endpoint(&format!("/v1/companies/{id}/prospect")))
        .bearer_auth(&analyst)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(prospect["is_prospect"], true);
    assert_eq!(prospect["prospect_stage"], "lead");

    let updated: Value = app
        .http
        .patch(app.endpoint(&format!("/v1/companies/{id}")))
        .bearer_auth(&analyst)
        .json(&json!({ "industry": "Fintech", "prospect_stage": "qualified" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["industry"], "Fintech");
    assert_eq!(updated["prospect_stage"], "qualified");

    let response = app
        .http
        .delete(app.endpoint(&format!("/v1/companies/{id}")))
        .bearer_auth(&analyst)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .http
        .delete(app.endpoint(&format!("/v1/companies/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .http
        .get(app.endpoint(&format!("/v1/companies/{id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registry_endpoints_are_unavailable_without_api_key() {
    let app = spawn_test_app(test_config()).await;
    let token = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;

    let response = app
        .http
        .get(app.endpoint("/v1/companies-house/company/01234567"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let snapshot: Value = app
        .http
        .get(app.endpoint("/v1/snapshot/01234567?dry_run=true"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["tenant"], "public");
    assert!(snapshot["profile"].is_null());
}

#[tokio::test]
async fn sync_copies_registry_profile() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/01234567"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "company_name": "EPSILON HOLDINGS LIMITED",
            "company_number": "01234567",
            "company_status": "active",
            "registered_office_address": {
                "address_line_1": "1 High Street",
                "locality": "Cardiff",
                "postal_code": "cf10 1aa",
                "country": "Wales"
            },
            "sic_codes": ["62020", "70229"]
        })))
        .mount(&registry)
        .await;

    let mut config = test_config();
    config.ch_api_key = Some("test-key".to_string());
    config.ch_api_base = registry.uri();
    let app = spawn_test_app(config).await;
    let token = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;

    let company: Value = create(
        &app,
        &token,
        json!({ "name": "Epsilon", "companies_house_number": "01234567" }),
    )
    .await
    .json()
    .await
    .unwrap();

    let response = app
        .http
        .post(app.endpoint(&format!(
            "/v1/companies/{}/companies-house-sync",
            company["id"]
        )))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let synced: Value = response.json().await.unwrap();
    assert_eq!(synced["name"], "EPSILON HOLDINGS LIMITED");
    assert_eq!(synced["postcode"], "CF10 1AA");
    assert_eq!(synced["country"], "GB");
    assert_eq!(synced["sic_code"], "62020");
    assert_eq!(synced["companies_house_status"], "active");
    assert_eq!(synced["data_source"], "companies_house");
    assert!(synced["last_updated_from_source"].is_string());
}

#[tokio::test]
async fn snapshot_reports_failed_parts_as_null() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/company/SC123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "company_name": "Zeta" })))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/SC123456/officers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/SC123456/filing-history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/company/SC123456/persons-with-significant-control"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&registry)
        .await;

    let mut config = test_config();
    config.ch_api_key = Some("test-key".to_string());
    config.ch_api_base = registry.uri();
    let app = spawn_test_app(config).await;
    let token = app.access_token_for("analyst@example.com", ROLE_ANALYST).await;

    let snapshot: Value = app
        .http
        .get(app.endpoint("/v1/snapshot/sc123456"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["company_number"], "SC123456");
    assert_eq!(snapshot["profile"]["company_name"], "Zeta");
    assert!(snapshot["officers"].is_object());
    assert!(snapshot["filing_history"].is_object());
    assert!(snapshot["psc"].is_null());
}
