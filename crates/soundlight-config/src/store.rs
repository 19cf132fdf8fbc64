// OS keyring persistence for refresh tokens.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use soundlight_core::{CoreError, TokenStore};

/// Keyring service name shared by every soundlight secret.
pub const KEYRING_SERVICE: &str = "soundlight";

/// Stores each account's refresh token under `{email}/refresh-token`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringTokenStore;

impl KeyringTokenStore {
    fn entry(email: &str) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("{email}/refresh-token")).map_err(store_err)
    }
}

fn store_err(err: keyring::Error) -> CoreError {
    CoreError::TokenStore {
        message: err.to_string(),
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self, email: &str) -> Result<Option<SecretString>, CoreError> {
        match Self::entry(email)?.get_password() {
            Ok(token) => Ok(Some(SecretString::from(token))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    fn save(&self, email: &str, refresh_token: &SecretString) -> Result<(), CoreError> {
        Self::entry(email)?
            .set_password(refresh_token.expose_secret())
            .map_err(store_err)?;
        debug!("refresh token stored in keyring");
        Ok(())
    }

    fn delete(&self, email: &str) -> Result<(), CoreError> {
        match Self::entry(email)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}
