// ── Session manager ──
//
// Owns the account session: password login, the MFA challenge, proactive
// and reactive token refresh, and logout. The current session is an
// `ArcSwap` snapshot so token reads never wait; an async mutex only
// serializes refresh requests. Transports learn about changes through the
// `SessionSignal` watch.

mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use soundlight_api::cloud::auth::mask_email;
use soundlight_api::transport::{TlsMode, TransportConfig};
use soundlight_api::{
    CloudClient, DeviceInfo, LoginOutcome, SessionSignal, TokenError, TokenPair, TokenSource,
};
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use store::{MemoryTokenStore, TokenStore};

use crate::config::{Credentials, EngineConfig, TlsVerification};
use crate::error::{AuthError, CoreError};

/// Delay before retrying a refresh that failed on the network.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Access tokens closer to expiry than this are refreshed before use.
const TOKEN_USE_MARGIN: Duration = Duration::from_secs(30);

// ── Public types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    MfaPending,
    Authenticated,
    /// Tokens are stale and the last refresh could not reach the service.
    Expired,
}

/// Non-secret view of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    Authenticated(SessionInfo),
    MfaRequired { challenge_id: String },
}

/// Session tuning taken from `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub refresh_margin: Duration,
    pub default_token_lifetime: Duration,
    pub mfa_max_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(300),
            default_token_lifetime: Duration::from_secs(3600),
            mfa_max_attempts: 3,
        }
    }
}

impl From<&EngineConfig> for SessionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            refresh_margin: config.refresh_margin,
            default_token_lifetime: config.default_token_lifetime,
            mfa_max_attempts: config.mfa_max_attempts,
        }
    }
}

// ── Internal state ───────────────────────────────────────────────────

struct Session {
    email: String,
    tokens: TokenPair,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            email: self.email.clone(),
            expires_at: self.expires_at,
        }
    }
}

struct MfaChallenge {
    id: String,
    credentials: Credentials,
    attempts_left: u32,
}

struct Inner {
    client: CloudClient,
    settings: SessionSettings,
    session: ArcSwapOption<Session>,
    challenge: Mutex<Option<MfaChallenge>>,
    refresh_lock: tokio::sync::Mutex<()>,
    auth_state: watch::Sender<AuthState>,
    signals: watch::Sender<SessionSignal>,
    generation: AtomicU64,
    store: Arc<dyn TokenStore>,
    refresh_timer: Mutex<Option<CancellationToken>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.refresh_timer).take() {
            timer.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SessionManager ───────────────────────────────────────────────────

/// Cheaply cloneable handle to the account session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build the HTTP client from `config` and start unauthenticated.
    pub fn new(config: &EngineConfig, store: Arc<dyn TokenStore>) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: match &config.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            },
            timeout: config.timeout,
        };
        let client = CloudClient::new(config.api_base.clone(), &transport)?;
        Ok(Self::with_client(client, SessionSettings::from(config), store))
    }

    pub fn with_client(
        client: CloudClient,
        settings: SessionSettings,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (auth_state, _) = watch::channel(AuthState::Unauthenticated);
        let (signals, _) = watch::channel(SessionSignal::default());
        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                session: ArcSwapOption::empty(),
                challenge: Mutex::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
                auth_state,
                signals,
                generation: AtomicU64::new(0),
                store,
                refresh_timer: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        *self.inner.auth_state.borrow()
    }

    /// Watch of `AuthState` transitions.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.auth_state.subscribe()
    }

    /// The current session, if any (also while `Expired`).
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.inner.session.load().as_ref().map(|s| s.info())
    }

    pub fn client(&self) -> &CloudClient {
        &self.inner.client
    }

    // ── Login / MFA ──────────────────────────────────────────────────

    /// Password login. An MFA challenge stays pending until answered.
    pub async fn login(&self, credentials: Credentials) -> Result<LoginResult, AuthError> {
        info!(user = %mask_email(&credentials.email), "logging in");
        let outcome = self
            .inner
            .client
            .login(&credentials.email, &credentials.password)
            .await?;

        match outcome {
            LoginOutcome::Authenticated(pair) => {
                let info = self.install(&credentials.email, pair);
                Ok(LoginResult::Authenticated(info))
            }
            LoginOutcome::MfaRequired { mfa_token } => {
                info!(user = %mask_email(&credentials.email), "MFA code required");
                *lock(&self.inner.challenge) = Some(MfaChallenge {
                    id: mfa_token.clone(),
                    credentials,
                    attempts_left: self.inner.settings.mfa_max_attempts.max(1),
                });
                self.inner.auth_state.send_replace(AuthState::MfaPending);
                Ok(LoginResult::MfaRequired {
                    challenge_id: mfa_token,
                })
            }
        }
    }

    /// Answer the MFA challenge `challenge_id`.
    pub async fn submit_mfa(
        &self,
        challenge_id: &str,
        code: &str,
    ) -> Result<LoginResult, AuthError> {
        let credentials = {
            let guard = lock(&self.inner.challenge);
            match guard.as_ref() {
                None => return Err(AuthError::NoPendingChallenge),
                Some(c) if c.id != challenge_id => return Err(AuthError::ChallengeExpired),
                Some(c) => c.credentials.clone(),
            }
        };

        let result = self
            .inner
            .client
            .verify_mfa(
                &credentials.email,
                &credentials.password,
                challenge_id,
                code,
            )
            .await;

        match result {
            Ok(pair) => {
                let info = self.install(&credentials.email, pair);
                Ok(LoginResult::Authenticated(info))
            }
            Err(soundlight_api::Error::InvalidMfaCode) => {
                let attempts_remaining = self.record_wrong_code(challenge_id);
                warn!(attempts_remaining, "invalid MFA code");
                Err(AuthError::InvalidCode { attempts_remaining })
            }
            Err(soundlight_api::Error::MfaChallengeExpired) => {
                info!("MFA challenge expired");
                self.discard_challenge(challenge_id);
                Err(AuthError::ChallengeExpired)
            }
            Err(other) => Err(AuthError::from(other)),
        }
    }

    /// Answer whichever MFA challenge is pending.
    pub async fn submit_pending_mfa(&self, code: &str) -> Result<LoginResult, AuthError> {
        let challenge_id = lock(&self.inner.challenge)
            .as_ref()
            .map(|c| c.id.clone())
            .ok_or(AuthError::NoPendingChallenge)?;
        self.submit_mfa(&challenge_id, code).await
    }

    fn record_wrong_code(&self, challenge_id: &str) -> u32 {
        let mut guard = lock(&self.inner.challenge);
        let Some(challenge) = guard.as_mut().filter(|c| c.id == challenge_id) else {
            return 0;
        };
        challenge.attempts_left = challenge.attempts_left.saturating_sub(1);
        let left = challenge.attempts_left;
        if left == 0 {
            *guard = None;
            drop(guard);
            self.inner
                .auth_state
                .send_replace(AuthState::Unauthenticated);
        }
        left
    }

    fn discard_challenge(&self, challenge_id: &str) {
        let mut guard = lock(&self.inner.challenge);
        if guard.as_ref().is_some_and(|c| c.id == challenge_id) {
            *guard = None;
            drop(guard);
            self.inner
                .auth_state
                .send_replace(AuthState::Unauthenticated);
        }
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Exchange the refresh token for new tokens. Concurrent callers share
    /// one request.
    pub async fn refresh(&self) -> Result<SessionInfo, AuthError> {
        let observed = self.current().map(|s| s.generation);
        let _guard = self.inner.refresh_lock.lock().await;

        let current = self.current().ok_or(AuthError::NotAuthenticated)?;
        if observed != Some(current.generation) {
            debug!("refresh already completed by another caller");
            return Ok(current.info());
        }

        debug!(user = %mask_email(&current.email), "refreshing tokens");
        match self.inner.client.refresh(&current.tokens.refresh_token).await {
            Ok(pair) => Ok(self.install(&current.email, pair)),
            Err(soundlight_api::Error::RefreshRejected | soundlight_api::Error::Unauthorized) => {
                warn!(user = %mask_email(&current.email), "refresh token rejected, session cleared");
                self.clear(Some(&current.email));
                Err(AuthError::RefreshInvalid)
            }
            Err(other) => {
                let err = AuthError::from(other);
                warn!(error = %err, "token refresh failed, will retry");
                self.inner.auth_state.send_replace(AuthState::Expired);
                self.schedule_refresh_in(REFRESH_RETRY_DELAY);
                Err(err)
            }
        }
    }

    /// Restore a persisted session for `email` by refreshing its stored
    /// refresh token.
    pub async fn resume(&self, email: &str) -> Result<SessionInfo, AuthError> {
        let stored = self.inner.store.load(email).map_err(|e| {
            warn!(error = %e, "cannot read stored refresh token");
            AuthError::NotAuthenticated
        })?;
        let Some(refresh_token) = stored else {
            return Err(AuthError::NotAuthenticated);
        };

        info!(user = %mask_email(email), "resuming stored session");
        let _guard = self.inner.refresh_lock.lock().await;
        match self.inner.client.refresh(&refresh_token).await {
            Ok(pair) => Ok(self.install(email, pair)),
            Err(soundlight_api::Error::RefreshRejected | soundlight_api::Error::Unauthorized) => {
                info!(user = %mask_email(email), "stored refresh token no longer valid");
                if let Err(e) = self.inner.store.delete(email) {
                    warn!(error = %e, "cannot delete stale refresh token");
                }
                Err(AuthError::RefreshInvalid)
            }
            Err(other) => Err(AuthError::from(other)),
        }
    }

    /// Drop the session and its persisted refresh token.
    pub fn logout(&self) {
        let email = self.current().map(|s| s.email.clone());
        if let Some(email) = &email {
            info!(user = %mask_email(email), "logging out");
        }
        self.clear(email.as_deref());
        *lock(&self.inner.challenge) = None;
    }

    // ── Authorized requests ──────────────────────────────────────────

    /// Account device list. A rejected token is refreshed once.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, CoreError> {
        let token = self.valid_token().await?;
        match self.inner.client.list_devices(&token).await {
            Err(soundlight_api::Error::Unauthorized) => {
                debug!("device list rejected the token, refreshing once");
                self.refresh().await?;
                let token = self.valid_token().await?;
                Ok(self.inner.client.list_devices(&token).await?)
            }
            other => Ok(other?),
        }
    }

    /// An access token that is not about to expire.
    pub async fn valid_token(&self) -> Result<SecretString, AuthError> {
        let current = self.current().ok_or(AuthError::NotAuthenticated)?;
        let fresh_until = current.expires_at - chrono_duration(TOKEN_USE_MARGIN);
        if self.state() == AuthState::Authenticated && Utc::now() < fresh_until {
            return Ok(current.tokens.access_token.clone());
        }
        self.refresh().await?;
        self.current()
            .map(|s| s.tokens.access_token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn current(&self) -> Option<Arc<Session>> {
        self.inner.session.load_full()
    }

    fn install(&self, email: &str, tokens: TokenPair) -> SessionInfo {
        let expires_at = tokens.expires_at.unwrap_or_else(|| {
            Utc::now() + chrono_duration(self.inner.settings.default_token_lifetime)
        });
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        if let Err(e) = self.inner.store.save(email, &tokens.refresh_token) {
            warn!(error = %e, "cannot persist refresh token");
        }

        let session = Session {
            email: email.to_owned(),
            tokens,
            expires_at,
            generation,
        };
        let info = session.info();
        self.inner.session.store(Some(Arc::new(session)));
        *lock(&self.inner.challenge) = None;
        self.inner.auth_state.send_replace(AuthState::Authenticated);
        self.inner.signals.send_replace(SessionSignal {
            authorized: true,
            generation,
        });

        let refresh_in = (expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .saturating_sub(self.inner.settings.refresh_margin);
        info!(
            user = %mask_email(email),
            expires_at = %expires_at,
            refresh_in_secs = refresh_in.as_secs(),
            "session authenticated"
        );
        self.schedule_refresh_in(refresh_in);
        info
    }

    fn clear(&self, email: Option<&str>) {
        self.cancel_refresh_timer();
        self.inner.session.store(None);
        if let Some(email) = email {
            if let Err(e) = self.inner.store.delete(email) {
                warn!(error = %e, "cannot delete refresh token");
            }
        }
        self.inner
            .auth_state
            .send_replace(AuthState::Unauthenticated);
        let generation = self.inner.generation.load(Ordering::Relaxed);
        self.inner.signals.send_replace(SessionSignal {
            authorized: false,
            generation,
        });
    }

    fn cancel_refresh_timer(&self) {
        if let Some(timer) = lock(&self.inner.refresh_timer).take() {
            timer.cancel();
        }
    }

    /// Replace the refresh timer with one that fires after `delay`.
    fn schedule_refresh_in(&self, delay: Duration) {
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.inner.refresh_timer).replace(cancel.clone()) {
            previous.cancel();
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = SessionManager { inner };
            debug!("proactive token refresh");
            // Failures reschedule or clear the session themselves.
            let _ = manager.refresh().await;
        });
    }
}

fn chrono_duration(d: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

fn token_error(err: &AuthError) -> TokenError {
    match err {
        AuthError::Network(msg) => TokenError::Transient(msg.clone()),
        AuthError::RateLimited { retry_after_secs } => {
            TokenError::Transient(format!("rate limited for {retry_after_secs}s"))
        }
        _ => TokenError::Unavailable,
    }
}

impl TokenSource for SessionManager {
    async fn access_token(&self) -> Result<SecretString, TokenError> {
        self.valid_token().await.map_err(|e| token_error(&e))
    }

    async fn refresh_after_rejection(&self) -> Result<SecretString, TokenError> {
        self.refresh().await.map_err(|e| token_error(&e))?;
        self.current()
            .map(|s| s.tokens.access_token.clone())
            .ok_or(TokenError::Unavailable)
    }

    fn signals(&self) -> watch::Receiver<SessionSignal> {
        self.inner.signals.subscribe()
    }
}
