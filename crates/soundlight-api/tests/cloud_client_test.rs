// Integration tests for `CloudClient` using wiremock.
#![allow(clippy::unwrap_used)]

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use soundlight_api::transport::TransportConfig;
use soundlight_api::{CloudClient, Error, LoginOutcome};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let url = url::Url::parse(&server.uri()).unwrap();
    let client = CloudClient::new(url, &TransportConfig::default()).unwrap();
    (server, client)
}

fn password() -> SecretString {
    SecretString::from("hunter2".to_string())
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("nanit-api-version", "1"))
        .and(body_json(json!({
            "email": "parent@example.com",
            "password": "hunter2",
            "channel": "email",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
        })))
        .mount(&server)
        .await;

    let outcome = client.login("parent@example.com", &password()).await.unwrap();
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected tokens, got {outcome:?}");
    };
    assert_eq!(pair.access_token.expose_secret(), "access-1");
    assert_eq!(pair.refresh_token.expose_secret(), "refresh-1");
    assert!(pair.expires_at.is_none());
}

#[tokio::test]
async fn test_login_mfa_required_482() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(482).set_body_json(json!({ "mfa_token": "challenge-9" })))
        .mount(&server)
        .await;

    let outcome = client.login("parent@example.com", &password()).await.unwrap();
    assert!(matches!(outcome, LoginOutcome::MfaRequired { ref mfa_token } if mfa_token == "challenge-9"));
}

#[tokio::test]
async fn test_login_mfa_required_200() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "mfa_token": "challenge-1" })))
        .mount(&server)
        .await;

    let outcome = client.login("parent@example.com", &password()).await.unwrap();
    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
}

#[tokio::test]
async fn test_login_invalid_credentials() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.login("parent@example.com", &password()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidCredentials));
}

#[tokio::test]
async fn test_login_rate_limited() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "45"))
        .mount(&server)
        .await;

    let err = client.login("parent@example.com", &password()).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { retry_after_secs: 45 }));
}

// ── MFA ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_verify_mfa_sends_cleaned_code() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({
            "email": "parent@example.com",
            "password": "hunter2",
            "channel": "email",
            "mfa_token": "challenge-9",
            "mfa_code": "123456",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "access-2",
            "refresh_token": "refresh-2",
        })))
        .mount(&server)
        .await;

    let pair = client
        .verify_mfa("parent@example.com", &password(), "challenge-9", " \"123456\" ")
        .await
        .unwrap();
    assert_eq!(pair.access_token.expose_secret(), "access-2");
}

#[tokio::test]
async fn test_verify_mfa_invalid_code() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client
        .verify_mfa("parent@example.com", &password(), "challenge-9", "000000")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMfaCode));
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "access-3" })))
        .mount(&server)
        .await;

    let pair = client
        .refresh(&SecretString::from("refresh-1".to_string()))
        .await
        .unwrap();
    assert_eq!(pair.access_token.expose_secret(), "access-3");
    assert_eq!(pair.refresh_token.expose_secret(), "refresh-1");
}

#[tokio::test]
async fn test_refresh_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client
        .refresh(&SecretString::from("stale".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RefreshRejected));
}

// ── Devices ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices_filters_unattached() {
    let (server, client) = setup().await;

    let body = json!({
        "babies": [
            {
                "uid": "baby-1",
                "name": "Ada",
                "speaker": {
                    "attached_to_speaker": true,
                    "speaker": { "uid": "L101", "name": "Nursery" }
                }
            },
            {
                "uid": "baby-2",
                "name": "Ben",
                "speaker": { "attached_to_speaker": false }
            },
            {
                "uid": "baby-3",
                "speaker": {
                    "attached_to_speaker": true,
                    "speaker": { "name": "No uid" }
                }
            },
            { "uid": "baby-4", "name": "Cam" }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/babies"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let devices = client
        .list_devices(&SecretString::from("access-1".to_string()))
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].speaker_uid, "L101");
    assert_eq!(devices[0].speaker_name, "Nursery");
    assert_eq!(devices[0].baby_uid, "baby-1");
    assert_eq!(devices[0].baby_name, "Ada");
}

#[tokio::test]
async fn test_list_devices_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/babies"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client
        .list_devices(&SecretString::from("expired".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn test_list_devices_bad_json_keeps_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/babies"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client
        .list_devices(&SecretString::from("access-1".to_string()))
        .await
        .unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected deserialization error, got {other:?}"),
    }
}
