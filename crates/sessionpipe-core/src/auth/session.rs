use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::SecureStore;

const TOKEN_KEY: &str = "auth_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const USER_KEY: &str = "user";

/// Version tag written with every new token record.
const TOKEN_SCHEMA_VERSION: &str = "1";

/// Bearer token lifetime when the caller does not supply one (8 hours).
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 480;

/// Refresh tokens are long-lived.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// Cached user profile lifetime.
pub const DEFAULT_USER_TTL_MINUTES: i64 = 60;

/// Opaque user profile as returned by the server.
pub type UserRecord = serde_json::Value;

/// Token as persisted. Older sessions stored the bare string; newer ones tag
/// it with a schema version. Both must keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredToken {
    Versioned {
        value: String,
        #[serde(default)]
        version: String,
    },
    Legacy(String),
}

impl StoredToken {
    fn into_value(self) -> String {
        match self {
            StoredToken::Versioned { value, .. } => value,
            StoredToken::Legacy(value) => value,
        }
    }
}

/// Session state derived from storage. Never persisted itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Unauthenticated,
    Authenticated {
        token: String,
        /// The profile expires sooner than the token, so it may be gone.
        user: Option<UserRecord>,
    },
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }
}

/// Token, refresh-token and user accessors over a `SecureStore`.
///
/// One instance is shared (by cheap clone) between the API client and
/// whatever UI shell drives it.
#[derive(Clone)]
pub struct TokenStore {
    store: SecureStore,
}

impl TokenStore {
    pub fn new(store: SecureStore) -> Self {
        Self { store }
    }

    pub fn secure_store(&self) -> &SecureStore {
        &self.store
    }

    // ===== Bearer token =====

    pub fn set_token(&self, token: &str) {
        self.set_token_with_ttl(token, Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES));
    }

    pub fn set_token_with_ttl(&self, token: &str, ttl: Duration) {
        let stored = StoredToken::Versioned {
            value: token.to_string(),
            version: TOKEN_SCHEMA_VERSION.to_string(),
        };
        self.store.set_item(TOKEN_KEY, &stored, ttl);
    }

    /// Current bearer token, whichever shape it was stored in.
    pub fn get_token(&self) -> Option<String> {
        self.store
            .get_item::<StoredToken>(TOKEN_KEY)
            .map(StoredToken::into_value)
    }

    pub fn remove_token(&self) {
        self.store.remove_item(TOKEN_KEY);
    }

    // ===== Refresh token =====

    pub fn set_refresh_token(&self, refresh_token: &str) {
        self.set_refresh_token_with_ttl(
            refresh_token,
            Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
        );
    }

    pub fn set_refresh_token_with_ttl(&self, refresh_token: &str, ttl: Duration) {
        self.store.set_item(REFRESH_TOKEN_KEY, refresh_token, ttl);
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.store.get_item(REFRESH_TOKEN_KEY)
    }

    pub fn remove_refresh_token(&self) {
        self.store.remove_item(REFRESH_TOKEN_KEY);
    }

    // ===== User profile =====

    pub fn set_user(&self, user: &UserRecord) {
        self.set_user_with_ttl(user, Duration::minutes(DEFAULT_USER_TTL_MINUTES));
    }

    pub fn set_user_with_ttl(&self, user: &UserRecord, ttl: Duration) {
        self.store.set_item(USER_KEY, user, ttl);
    }

    pub fn get_user(&self) -> Option<UserRecord> {
        self.store.get_item(USER_KEY)
    }

    pub fn remove_user(&self) {
        self.store.remove_item(USER_KEY);
    }

    // ===== Session =====

    pub fn is_authenticated(&self) -> bool {
        self.get_token().is_some()
    }

    pub fn session(&self) -> Session {
        match self.get_token() {
            Some(token) => Session::Authenticated {
                token,
                user: self.get_user(),
            },
            None => Session::Unauthenticated,
        }
    }

    /// Persist everything a successful login or registration hands back.
    pub fn store_session(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        user: Option<&UserRecord>,
    ) {
        self.set_token(token);
        if let Some(refresh_token) = refresh_token {
            self.set_refresh_token(refresh_token);
        }
        if let Some(user) = user {
            self.set_user(user);
        }
        info!(
            has_refresh_token = refresh_token.is_some(),
            has_user = user.is_some(),
            "Session stored"
        );
    }

    /// Drop token, refresh token and user together.
    pub fn clear_session(&self) {
        self.remove_token();
        self.remove_refresh_token();
        self.remove_user();
        debug!("Session cleared");
    }

    pub fn is_storage_available(&self) -> bool {
        self.store.is_available()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{ManualClock, MemoryStorage};

    fn token_store() -> (TokenStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = SecureStore::new(Arc::new(MemoryStorage::new()), clock.clone());
        (TokenStore::new(store), clock)
    }

    #[test]
    fn test_token_expires_after_ttl() {
        let (tokens, clock) = token_store();
        tokens.set_token_with_ttl("abc", Duration::minutes(1));

        clock.advance(Duration::seconds(30));
        assert_eq!(tokens.get_token().as_deref(), Some("abc"));

        clock.advance(Duration::seconds(31));
        assert_eq!(tokens.get_token(), None);
        assert!(!tokens.is_authenticated());
    }

    #[test]
    fn test_default_token_ttl() {
        let (tokens, clock) = token_store();
        tokens.set_token("abc");

        clock.advance(Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES));
        assert!(tokens.is_authenticated());

        clock.advance(Duration::seconds(1));
        assert!(!tokens.is_authenticated());
    }

    #[test]
    fn test_legacy_and_versioned_tokens_read_the_same() {
        let (tokens, _) = token_store();

        tokens
            .secure_store()
            .set_item(TOKEN_KEY, "abc", Duration::minutes(5));
        let legacy = tokens.get_token();

        tokens.secure_store().set_item(
            TOKEN_KEY,
            &serde_json::json!({"value": "abc", "version": "0"}),
            Duration::minutes(5),
        );
        let versioned = tokens.get_token();

        assert_eq!(legacy.as_deref(), Some("abc"));
        assert_eq!(legacy, versioned);
    }

    #[test]
    fn test_new_tokens_use_versioned_shape() {
        let (tokens, _) = token_store();
        tokens.set_token("abc");

        let raw: serde_json::Value = tokens
            .secure_store()
            .get_item(TOKEN_KEY)
            .expect("token stored");
        assert_eq!(raw, serde_json::json!({"value": "abc", "version": "1"}));
    }

    #[test]
    fn test_refresh_token_outlives_user() {
        let (tokens, clock) = token_store();
        let user = serde_json::json!({"id": 1, "email": "ada@example.com"});
        tokens.store_session("t", Some("r"), Some(&user));

        assert_eq!(tokens.get_user(), Some(user));

        clock.advance(Duration::minutes(DEFAULT_USER_TTL_MINUTES + 1));
        assert_eq!(tokens.get_user(), None);
        assert_eq!(tokens.get_refresh_token().as_deref(), Some("r"));

        clock.advance(Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS));
        assert_eq!(tokens.get_refresh_token(), None);
    }

    #[test]
    fn test_session_derivation() {
        let (tokens, _) = token_store();
        assert_eq!(tokens.session(), Session::Unauthenticated);

        tokens.store_session("t", None, None);
        assert_eq!(
            tokens.session(),
            Session::Authenticated {
                token: "t".to_string(),
                user: None
            }
        );

        tokens.clear_session();
        assert!(!tokens.session().is_authenticated());
    }

    #[test]
    fn test_clear_session_removes_all_three() {
        let (tokens, _) = token_store();
        tokens.store_session("t", Some("r"), Some(&serde_json::json!({"id": 1})));

        tokens.clear_session();

        assert_eq!(tokens.get_token(), None);
        assert_eq!(tokens.get_refresh_token(), None);
        assert_eq!(tokens.get_user(), None);
    }
}
