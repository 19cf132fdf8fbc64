// ── Refresh-token persistence ──
//
// The session manager hands every freshly installed refresh token to a
// `TokenStore` so a restart can resume without another MFA round trip.

use std::collections::HashMap;
use std::sync::Mutex;

use secrecy::SecretString;

use crate::error::CoreError;

/// Where refresh tokens live between runs, keyed by account email.
pub trait TokenStore: Send + Sync {
    fn load(&self, email: &str) -> Result<Option<SecretString>, CoreError>;
    fn save(&self, email: &str, refresh_token: &SecretString) -> Result<(), CoreError>;
    /// Deleting a missing entry is not an error.
    fn delete(&self, email: &str) -> Result<(), CoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, SecretString>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SecretString>> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, email: &str) -> Result<Option<SecretString>, CoreError> {
        Ok(self.lock().get(email).cloned())
    }

    fn save(&self, email: &str, refresh_token: &SecretString) -> Result<(), CoreError> {
        self.lock().insert(email.to_owned(), refresh_token.clone());
        Ok(())
    }

    fn delete(&self, email: &str) -> Result<(), CoreError> {
        self.lock().remove(email);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn save_load_delete() {
        let store = MemoryTokenStore::new();
        assert!(store.load("a@example.com").unwrap().is_none());
        store
            .save("a@example.com", &SecretString::from("r1".to_string()))
            .unwrap();
        assert_eq!(
            store.load("a@example.com").unwrap().unwrap().expose_secret(),
            "r1"
        );
        store.delete("a@example.com").unwrap();
        store.delete("a@example.com").unwrap();
        assert!(store.load("a@example.com").unwrap().is_none());
    }
}
