// Login, MFA verification, and token refresh
//
// The account service answers a password login with 201 + tokens, or with
// 482 (occasionally 200) + `mfa_token` when a second factor is needed. The
// MFA step repeats the login body with the challenge token and the code.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::client::CloudClient;
use super::models::{LoginRequest, RefreshRequest, TokenResponse};
use crate::auth::TokenPair;
use crate::error::Error;

const LOGIN_PATH: &str = "login";
const REFRESH_PATH: &str = "tokens/refresh";
const CHANNEL: &str = "email";

/// Non-standard status the account service uses for "MFA required".
const STATUS_MFA_REQUIRED: u16 = 482;

/// Result of a password login.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(TokenPair),
    MfaRequired { mfa_token: String },
}

/// `user@***` for logs.
pub fn mask_email(email: &str) -> String {
    let user = email.split('@').next().unwrap_or_default();
    format!("{user}@***")
}

/// Strip whitespace and one pair of surrounding double quotes.
pub fn clean_mfa_code(code: &str) -> &str {
    let code = code.trim();
    code.strip_prefix('"')
        .and_then(|c| c.strip_suffix('"'))
        .unwrap_or(code)
}

fn token_pair(
    body: TokenResponse,
    previous_refresh: Option<&SecretString>,
) -> Result<TokenPair, Error> {
    let access = body.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
        Error::Authentication {
            message: "response carried no access token".into(),
        }
    })?;
    let refresh = match (body.refresh_token.filter(|t| !t.is_empty()), previous_refresh) {
        (Some(new), _) => SecretString::from(new),
        (None, Some(old)) => old.clone(),
        (None, None) => {
            return Err(Error::Authentication {
                message: "response carried no refresh token".into(),
            });
        }
    };
    Ok(TokenPair::new(SecretString::from(access), refresh))
}

impl CloudClient {
    /// Password login. Returns tokens, or the MFA challenge to answer.
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome, Error> {
        debug!(user = %mask_email(email), "login request");
        let body = LoginRequest {
            email,
            password: password.expose_secret(),
            channel: CHANNEL,
            mfa_token: None,
            mfa_code: None,
        };
        let resp = self.post_json(LOGIN_PATH, &body).await?;

        match resp.status {
            StatusCode::CREATED => {
                let pair = token_pair(resp.json()?, None)?;
                info!(user = %mask_email(email), "authentication successful");
                Ok(LoginOutcome::Authenticated(pair))
            }
            s if s == StatusCode::OK || s.as_u16() == STATUS_MFA_REQUIRED => {
                let parsed: TokenResponse = resp.json()?;
                match parsed.mfa_token {
                    Some(mfa_token) => {
                        info!(user = %mask_email(email), "MFA verification required");
                        Ok(LoginOutcome::MfaRequired { mfa_token })
                    }
                    None => Err(Error::Authentication {
                        message: format!("login returned {} without an MFA token", s.as_u16()),
                    }),
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::InvalidCredentials),
            _ => Err(resp.unexpected()),
        }
    }

    /// Answer an MFA challenge. The code is cleaned of whitespace and quotes.
    pub async fn verify_mfa(
        &self,
        email: &str,
        password: &SecretString,
        mfa_token: &str,
        code: &str,
    ) -> Result<TokenPair, Error> {
        debug!(user = %mask_email(email), "MFA verification request");
        let body = LoginRequest {
            email,
            password: password.expose_secret(),
            channel: CHANNEL,
            mfa_token: Some(mfa_token),
            mfa_code: Some(clean_mfa_code(code)),
        };
        let resp = self.post_json(LOGIN_PATH, &body).await?;

        match resp.status {
            StatusCode::CREATED | StatusCode::OK => {
                let pair = token_pair(resp.json()?, None)?;
                info!(user = %mask_email(email), "MFA verification successful");
                Ok(pair)
            }
            StatusCode::UNAUTHORIZED => Err(Error::InvalidMfaCode),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::MfaChallengeExpired),
            s if s.as_u16() == STATUS_MFA_REQUIRED => Err(Error::MfaChallengeExpired),
            _ => Err(resp.unexpected()),
        }
    }

    /// Exchange a refresh token for a new pair. The old refresh token is
    /// kept when the response does not rotate it.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, Error> {
        debug!("token refresh request");
        let body = RefreshRequest {
            refresh_token: refresh_token.expose_secret(),
        };
        let resp = self.post_json(REFRESH_PATH, &body).await?;

        match resp.status {
            StatusCode::OK | StatusCode::CREATED => {
                let pair = token_pair(resp.json()?, Some(refresh_token))?;
                info!("token refresh successful");
                Ok(pair)
            }
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Err(Error::RefreshRejected),
            _ => Err(resp.unexpected()),
        }
    }
}
