//! Login → relay → download through the real router and validation connector

use axum::http::StatusCode;
use base64::{Engine, engine::general_purpose::STANDARD};
use fedreconcile_core::{Role, SessionClaims};
use fedreconcile_egress::ContractVersion;
use fedreconcile_integration_tests::{
    SERVICE_TOKEN, TestRelay, VALIDATOR_PATH, validation_reply,
};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const GRACE: Duration = Duration::from_millis(400);

async fn mount_reply(relay: &TestRelay, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(VALIDATOR_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&relay.upstream)
        .await;
}

fn upload() -> [(&'static str, &'static str, &'static [u8]); 2] {
    [
        ("gtas", "gtas_q3.csv", b"account,amount\n1010,100.00\n".as_slice()),
        ("erp", "erp_q3.csv", b"account,amount\n1010,99.00\n".as_slice()),
    ]
}

#[tokio::test]
async fn test_full_cycle_with_both_artifacts() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    Mock::given(method("POST"))
        .and(path(VALIDATOR_PATH))
        .and(header("authorization", format!("Bearer {}", SERVICE_TOKEN).as_str()))
        .and(header("x-contract-version", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(validation_reply(Some(b"PK\x03\x04report".as_slice()), Some(b"line,1\n".as_slice()))),
        )
        .expect(1)
        .mount(&relay.upstream)
        .await;

    let credential = relay.login("admin", "password123").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["success"], true);
    assert_eq!(
        json["message"],
        "Validation complete. Reports generated by Cloud Function."
    );

    // The upstream saw both inputs under their uploaded names
    let requests = relay.upstream.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["primaryFileName"], "gtas_q3.csv");
    assert_eq!(sent["secondaryFileName"], "erp_q3.csv");
    assert_eq!(
        STANDARD.decode(sent["primaryFileB64"].as_str().unwrap()).unwrap(),
        b"account,amount\n1010,100.00\n"
    );

    let report_url = json["exceptionReportUrl"].as_str().unwrap().to_string();
    let journal_url = json["fbdiJournalUrl"].as_str().unwrap().to_string();
    assert!(report_url.ends_with("/exception_report.xlsx"));
    assert!(journal_url.ends_with("/fbdi_journal_corrections.csv"));

    // Repeated downloads inside the window return identical bytes
    let (status, first) = relay.get(&report_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, b"PK\x03\x04report");
    let (_, second) = relay.get(&report_url).await;
    assert_eq!(first, second);
    let (status, journal) = relay.get(&journal_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(journal, b"line,1\n");

    // After the window both artifacts are gone and the lease is reclaimed
    tokio::time::sleep(GRACE + Duration::from_millis(300)).await;
    let (status, body) = relay.get(&report_url).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(relay.get(&journal_url).await.0, StatusCode::NOT_FOUND);
    assert_eq!(relay.leases.active_leases(), 0);
}

#[tokio::test]
async fn test_report_only_reply() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(&relay, 200, validation_reply(Some(b"report-bytes".as_slice()), None)).await;

    let credential = relay.login("analyst", "gtaspass").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json["exceptionReportUrl"].is_string());
    assert!(json.get("fbdiJournalUrl").is_none());
}

#[tokio::test]
async fn test_reply_without_message_uses_default() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(
        &relay,
        200,
        serde_json::json!({"fbdiJournalB64": STANDARD.encode(b"j")}),
    )
    .await;

    let credential = relay.login("admin", "password123").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["message"],
        "Validation complete. Reports generated by the validation service."
    );
    assert!(json.get("exceptionReportUrl").is_none());
}

#[tokio::test]
async fn test_upstream_failure_status_carries_text() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    Mock::given(method("POST"))
        .and(path(VALIDATOR_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("ERP file has no header row"))
        .mount(&relay.upstream)
        .await;

    let credential = relay.login("admin", "password123").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    let message = json["message"].as_str().unwrap();
    assert!(message.contains("500"));
    assert!(message.contains("ERP file has no header row"));

    // Inputs staged for the failed call are still reclaimed
    tokio::time::sleep(GRACE + Duration::from_millis(300)).await;
    assert_eq!(relay.leases.active_leases(), 0);
}

#[tokio::test]
async fn test_upstream_reported_failure() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(
        &relay,
        200,
        serde_json::json!({"success": false, "message": "Column 'amount' missing"}),
    )
    .await;

    let credential = relay.login("admin", "password123").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("Column 'amount' missing"));
}

#[tokio::test]
async fn test_missing_file_is_bad_request_without_upstream_call() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(&relay, 200, validation_reply(Some(b"r".as_slice()), Some(b"j".as_slice()))).await;
    let credential = relay.login("admin", "password123").await;

    let (status, json) = relay
        .relay(Some(&credential), &[("gtas", "gtas.csv", b"a,b".as_slice())])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Both GTAS and ERP files are required.");

    let (status, json) = relay
        .relay(
            Some(&credential),
            &[
                ("gtas", "gtas.csv", b"a,b".as_slice()),
                ("erp", "erp.csv", b"".as_slice()),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "The uploaded ERP file 'erp.csv' is empty.");

    assert_eq!(relay.upstream_calls().await, 0);
    assert_eq!(relay.leases.active_leases(), 0);
}

#[tokio::test]
async fn test_legacy_contract_body() {
    let relay = TestRelay::start(ContractVersion::V1, GRACE).await;
    Mock::given(method("POST"))
        .and(path(VALIDATOR_PATH))
        .and(header("x-contract-version", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(validation_reply(None, Some(b"j".as_slice()))))
        .expect(1)
        .mount(&relay.upstream)
        .await;

    let credential = relay.login("analyst", "gtaspass").await;
    let (status, _) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::OK);

    let requests = relay.upstream.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["gtas_file_name"], "gtas_q3.csv");
    assert_eq!(sent["erp_file_name"], "erp_q3.csv");
    assert!(sent["gtas_file_b64"].is_string());
    assert!(sent.get("primaryFileB64").is_none());
}

#[tokio::test]
async fn test_credentials_checked_before_upload() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(&relay, 200, validation_reply(Some(b"r".as_slice()), None)).await;

    // No credential
    let (status, json) = relay.relay(None, &upload()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Authentication required. No token provided.");

    // Signed by someone else
    let foreign = fedreconcile_core::TokenCodec::with_random_secret("fedreconcile");
    let (credential, _) = foreign.issue("adminUser", Role::Admin).unwrap();
    let (status, json) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Invalid or expired authentication token.");

    // Expired
    let (credential, _) = relay
        .codec
        .issue_at(
            "adminUser",
            Role::Admin,
            chrono::Utc::now() - chrono::Duration::hours(2),
        )
        .unwrap();
    let (status, _) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid signature, role outside the allowed set
    let now = chrono::Utc::now();
    let credential = relay
        .codec
        .encode(&SessionClaims {
            subject_id: "viewer1".to_string(),
            role: Role::from("viewer"),
            issuer: relay.codec.issuer().to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        })
        .unwrap();
    let (status, json) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["message"], "Access denied. Insufficient privileges.");

    assert_eq!(relay.upstream_calls().await, 0);
}

#[tokio::test]
async fn test_login_outcomes() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;

    let credential = relay.login("admin", "password123").await;
    let claims = relay.codec.decode(&credential).unwrap();
    assert_eq!(claims.subject_id, "adminUser");
    assert_eq!(claims.role, Role::Admin);

    let (status, json) = relay
        .call_json(
            axum::http::Request::builder()
                .method("POST")
                .uri(fedreconcile_ingress::LOGIN_PATH)
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    r#"{"username":"admin","password":"wrong"}"#,
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Invalid username or password.");
}

#[tokio::test]
async fn test_metrics_reflect_relay_traffic() {
    let relay = TestRelay::start(ContractVersion::V2, GRACE).await;
    mount_reply(&relay, 200, validation_reply(Some(b"r".as_slice()), Some(b"j".as_slice()))).await;

    let credential = relay.login("admin", "password123").await;
    let (status, json) = relay.relay(Some(&credential), &upload()).await;
    assert_eq!(status, StatusCode::OK);
    relay.get(json["exceptionReportUrl"].as_str().unwrap()).await;
    relay.relay(None, &upload()).await;

    let (status, body) = relay.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("fedreconcile_relay_requests_total"));
    assert!(text.contains("outcome=\"success\""));
    assert!(text.contains("outcome=\"unauthenticated\""));
    assert!(text.contains("fedreconcile_artifact_downloads_total"));
    assert!(relay.metrics.registry().gather().len() > 1);
}

#[tokio::test]
async fn test_unreachable_validator_fails_cleanly() {
    let relay = TestRelay::start_unreachable(GRACE).await;
    let credential = relay.login("analyst", "gtaspass").await;

    let (status, json) = relay.relay(Some(&credential), &upload()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .starts_with("Validation service unreachable"),
        "unexpected message: {}",
        json
    );
    assert!(json.get("exceptionReportUrl").is_none());
    assert_eq!(relay.upstream_calls().await, 0);

    // Staged inputs are reclaimed once the window closes
    tokio::time::sleep(GRACE + Duration::from_millis(300)).await;
    assert_eq!(relay.leases.active_leases(), 0);

    let (_, body) = relay.get("/metrics").await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("outcome=\"upstream_unreachable\""));
}
