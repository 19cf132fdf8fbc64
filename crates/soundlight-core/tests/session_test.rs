// Session manager flows against a wiremock account service.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use soundlight_api::TokenSource;
use soundlight_api::transport::TransportConfig;
use soundlight_api::CloudClient;
use soundlight_core::{
    AuthError, AuthState, CoreError, Credentials, LoginResult, MemoryTokenStore, SessionManager,
    SessionSettings, TokenStore,
};

const EMAIL: &str = "parent@example.com";

// ── Helpers ─────────────────────────────────────────────────────────

fn jwt(exp: i64) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    )
}

fn credentials() -> Credentials {
    Credentials::new(EMAIL, SecretString::from("hunter2".to_string()))
}

async fn setup_with(
    settings: SessionSettings,
) -> (MockServer, SessionManager, Arc<MemoryTokenStore>) {
    let server = MockServer::start().await;
    let url = url::Url::parse(&server.uri()).unwrap();
    let client = CloudClient::new(url, &TransportConfig::default()).unwrap();
    let store = Arc::new(MemoryTokenStore::new());
    let session = SessionManager::with_client(client, settings, store.clone());
    (server, session, store)
}

async fn setup() -> (MockServer, SessionManager, Arc<MemoryTokenStore>) {
    setup_with(SessionSettings::default()).await
}

async fn mount_direct_login(server: &MockServer, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": access,
            "refresh_token": refresh,
        })))
        .mount(server)
        .await;
}

async fn logged_in() -> (MockServer, SessionManager, Arc<MemoryTokenStore>) {
    let (server, session, store) = setup().await;
    mount_direct_login(&server, "access-1", "refresh-1").await;
    session.login(credentials()).await.unwrap();
    (server, session, store)
}

// ── Login / MFA ─────────────────────────────────────────────────────

#[tokio::test]
async fn direct_login_authenticates_and_persists() {
    let (_server, session, store) = logged_in().await;

    assert_eq!(session.state(), AuthState::Authenticated);
    let info = session.session_info().unwrap();
    assert_eq!(info.email, EMAIL);
    assert_eq!(
        store.load(EMAIL).unwrap().unwrap().expose_secret(),
        "refresh-1"
    );
    let signal = *session.signals().borrow();
    assert!(signal.authorized);
    assert_eq!(signal.generation, 1);
}

#[tokio::test]
async fn mfa_flow_tolerates_bounded_wrong_codes() {
    let (server, session, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({ "mfa_code": "000000" })))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({
            "mfa_token": "challenge-1",
            "mfa_code": "123456",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(482).set_body_json(json!({ "mfa_token": "challenge-1" })))
        .with_priority(10)
        .mount(&server)
        .await;

    let result = session.login(credentials()).await.unwrap();
    assert_eq!(
        result,
        LoginResult::MfaRequired {
            challenge_id: "challenge-1".into()
        }
    );
    assert_eq!(session.state(), AuthState::MfaPending);

    for remaining in [2, 1, 0] {
        let err = session.submit_pending_mfa("000000").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidCode {
                attempts_remaining: remaining
            }
        );
    }
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert_eq!(
        session.submit_pending_mfa("123456").await.unwrap_err(),
        AuthError::NoPendingChallenge
    );

    // not locked out: a fresh login works
    session.login(credentials()).await.unwrap();
    let result = session.submit_mfa("challenge-1", " \"123456\" ").await.unwrap();
    assert!(matches!(result, LoginResult::Authenticated(_)));
    assert_eq!(session.state(), AuthState::Authenticated);
    assert!(store.load(EMAIL).unwrap().is_some());
}

#[tokio::test]
async fn expired_challenge_returns_to_unauthenticated() {
    let (server, session, _store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({ "mfa_code": "123456" })))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(482).set_body_json(json!({ "mfa_token": "challenge-2" })))
        .with_priority(10)
        .mount(&server)
        .await;

    session.login(credentials()).await.unwrap();
    assert_eq!(
        session.submit_mfa("other", "123456").await.unwrap_err(),
        AuthError::ChallengeExpired
    );
    assert_eq!(session.state(), AuthState::MfaPending);

    assert_eq!(
        session.submit_pending_mfa("123456").await.unwrap_err(),
        AuthError::ChallengeExpired
    );
    assert_eq!(session.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn wrong_password_is_invalid_credentials() {
    let (server, session, _store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(
        session.login(credentials()).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    assert_eq!(session.state(), AuthState::Unauthenticated);
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_refresh_clears_the_session() {
    let (server, session, store) = logged_in().await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(session.refresh().await.unwrap_err(), AuthError::RefreshInvalid);
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert!(session.session_info().is_none());
    assert!(store.load(EMAIL).unwrap().is_none());
    assert!(!session.signals().borrow().authorized);
}

#[tokio::test]
async fn network_failure_leaves_session_expired() {
    let (server, session, _store) = logged_in().await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)), "{err:?}");
    assert_eq!(session.state(), AuthState::Expired);
    assert!(session.session_info().is_some());
    assert!(session.signals().borrow().authorized);
}

#[tokio::test]
async fn concurrent_refreshes_share_one_request() {
    let (server, session, store) = logged_in().await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(json!({
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (a, b, c) = tokio::join!(session.refresh(), session.refresh(), session.refresh());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(session.signals().borrow().generation, 2);
    assert_eq!(
        store.load(EMAIL).unwrap().unwrap().expose_secret(),
        "refresh-2"
    );
    assert_eq!(
        session.access_token().await.unwrap().expose_secret(),
        "access-2"
    );
}

#[tokio::test]
async fn proactive_refresh_fires_before_expiry() {
    let (server, session, _store) = setup_with(SessionSettings {
        refresh_margin: Duration::from_secs(300),
        ..SessionSettings::default()
    })
    .await;
    let soon = chrono::Utc::now().timestamp() + 301;
    mount_direct_login(&server, &jwt(soon), "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": jwt(chrono::Utc::now().timestamp() + 3600),
        })))
        .mount(&server)
        .await;

    session.login(credentials()).await.unwrap();
    let mut signals = session.signals();
    tokio::time::timeout(
        Duration::from_secs(10),
        signals.wait_for(|s| s.generation >= 2),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(session.state(), AuthState::Authenticated);
}

#[tokio::test]
async fn resume_uses_the_stored_refresh_token() {
    let (server, session, store) = setup().await;
    store
        .save(EMAIL, &SecretString::from("stored-refresh".to_string()))
        .unwrap();
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .and(body_json(json!({ "refresh_token": "stored-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-9",
            "refresh_token": "refresh-9",
        })))
        .mount(&server)
        .await;

    let info = session.resume(EMAIL).await.unwrap();
    assert_eq!(info.email, EMAIL);
    assert_eq!(session.state(), AuthState::Authenticated);
    assert_eq!(
        store.load(EMAIL).unwrap().unwrap().expose_secret(),
        "refresh-9"
    );
}

#[tokio::test]
async fn resume_without_stored_token_needs_login() {
    let (_server, session, _store) = setup().await;
    assert_eq!(
        session.resume(EMAIL).await.unwrap_err(),
        AuthError::NotAuthenticated
    );
}

#[tokio::test]
async fn logout_forgets_everything() {
    let (_server, session, store) = logged_in().await;
    let mut states = session.subscribe();
    session.logout();

    assert_eq!(*states.borrow_and_update(), AuthState::Unauthenticated);
    assert!(session.session_info().is_none());
    assert!(store.load(EMAIL).unwrap().is_none());
    assert!(!session.signals().borrow().authorized);
    assert!(matches!(
        session.refresh().await.unwrap_err(),
        AuthError::NotAuthenticated
    ));
}

// ── Authorized requests ─────────────────────────────────────────────

#[tokio::test]
async fn device_list_refreshes_once_on_401() {
    let (server, session, _store) = logged_in().await;
    Mock::given(method("GET"))
        .and(path("/babies"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/babies"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "babies": [{
                "uid": "baby-1",
                "name": "Ada",
                "speaker": {
                    "attached_to_speaker": true,
                    "speaker": { "uid": "speaker-1", "name": "Nursery" }
                }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let devices = session.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].speaker_uid, "speaker-1");
    assert_eq!(devices[0].speaker_name, "Nursery");
}

#[tokio::test]
async fn device_list_requires_a_session() {
    let (_server, session, _store) = setup().await;
    let err = session.list_devices().await.unwrap_err();
    assert!(matches!(err, CoreError::Auth(AuthError::NotAuthenticated)));
    assert!(err.requires_login());
}
