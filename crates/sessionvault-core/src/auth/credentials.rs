use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{
    SecureStore, StoreError, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, USER_KEY,
};

use super::{Session, UserIdentity};

/// Owns the current session and mirrors it to a `SecureStore`.
///
/// The in-memory copy is authoritative while the process runs; the store is
/// written on every mutation and read only by `load`. Callers serialize access
/// through the session lock, so a `load` never sees a half-written session.
pub struct CredentialStore {
    store: Arc<dyn SecureStore>,
    session: Option<Session>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self {
            store,
            session: None,
        }
    }

    /// Load the persisted session. Anything short of a complete session
    /// (missing key, unreadable user record) loads as logged out.
    pub fn load(&mut self) -> Result<Option<&Session>, StoreError> {
        self.session = None;

        let access_token = self.store.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY)?;
        let user = self.store.get(USER_KEY)?;

        let (Some(access_token), Some(refresh_token), Some(user)) = (access_token, refresh_token, user)
        else {
            debug!("No complete persisted session");
            return Ok(None);
        };

        let user: UserIdentity = match serde_json::from_str(&user) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable persisted user record");
                return Ok(None);
            }
        };

        self.session = Some(Session {
            access_token,
            refresh_token,
            user,
            access_token_issued_at: None,
        });
        Ok(self.session.as_ref())
    }

    /// Persist every session key, then commit to memory. On a failed write the
    /// persisted keys are wiped (best effort) so a mix of old and new values
    /// can never load as a valid session; memory keeps the previous session.
    pub fn save(&mut self, session: Session) -> Result<(), StoreError> {
        if let Err(e) = self.write_all(&session) {
            warn!(error = %e, "Failed to persist session, wiping partial state");
            for key in SESSION_KEYS {
                if let Err(delete_err) = self.store.delete(key) {
                    warn!(key, error = %delete_err, "Failed to wipe session key after failed save");
                }
            }
            return Err(e);
        }

        self.session = Some(session);
        Ok(())
    }

    fn write_all(&self, session: &Session) -> Result<(), StoreError> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| StoreError::Corrupt(format!("Unserializable user record: {}", e)))?;

        self.store.set(USER_KEY, &user)?;
        self.store.set(REFRESH_TOKEN_KEY, &session.refresh_token)?;
        self.store.set(ACCESS_TOKEN_KEY, &session.access_token)?;
        Ok(())
    }

    /// Forget the session in memory and in the store. Idempotent.
    /// Memory is cleared even when the store fails; the first store error is returned.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.session = None;

        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.store.delete(key) {
                warn!(key, error = %e, "Failed to delete session key");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Get the bearer token if logged in. Never touches the store.
    pub fn current_access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.refresh_token.as_str())
    }

    pub fn current_user(&self) -> Option<&UserIdentity> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn session(access: &str) -> Session {
        Session::new(
            access.to_string(),
            "R1".to_string(),
            UserIdentity {
                user_id: 7,
                email: "a@b.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Byron".to_string(),
                employee_id: "EMP-007".to_string(),
            },
        )
    }

    /// Store that refuses writes to one key, and optionally every delete
    struct FailingStore {
        inner: MemoryStore,
        fail_key: &'static str,
        fail_deletes: bool,
    }

    impl SecureStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key == self.fail_key {
                return Err(StoreError::Crypto("keychain locked".to_string()));
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            if self.fail_deletes {
                return Err(StoreError::Corrupt("delete refused".to_string()));
            }
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_save_then_load_in_new_store() {
        let backing = MemoryStore::new();
        let mut credentials = CredentialStore::new(Arc::new(backing.clone()));
        credentials.save(session("T1")).unwrap();

        assert_eq!(backing.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T1"));
        assert_eq!(backing.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));

        let mut restored = CredentialStore::new(Arc::new(backing));
        let loaded = restored.load().unwrap().cloned().unwrap();
        assert_eq!(loaded.access_token, "T1");
        assert_eq!(loaded.user.email, "a@b.com");
        assert!(loaded.access_token_issued_at.is_none());
    }

    #[test]
    fn test_partial_state_loads_as_absent() {
        let backing = MemoryStore::new();
        backing.set(ACCESS_TOKEN_KEY, "T1").unwrap();
        backing.set(REFRESH_TOKEN_KEY, "R1").unwrap();

        let mut credentials = CredentialStore::new(Arc::new(backing));
        assert!(credentials.load().unwrap().is_none());
        assert!(credentials.current_access_token().is_none());
    }

    #[test]
    fn test_unreadable_user_loads_as_absent() {
        let backing = MemoryStore::new();
        backing.set(ACCESS_TOKEN_KEY, "T1").unwrap();
        backing.set(REFRESH_TOKEN_KEY, "R1").unwrap();
        backing.set(USER_KEY, "{not json").unwrap();

        let mut credentials = CredentialStore::new(Arc::new(backing));
        assert!(credentials.load().unwrap().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let backing = MemoryStore::new();
        let mut credentials = CredentialStore::new(Arc::new(backing.clone()));
        credentials.save(session("T1")).unwrap();

        credentials.clear().unwrap();
        assert!(backing.is_empty());
        assert!(!credentials.is_logged_in());

        credentials.clear().unwrap();
        assert!(backing.is_empty());
    }

    #[test]
    fn test_failed_save_leaves_no_mixed_session() {
        let inner = MemoryStore::new();
        let mut credentials = CredentialStore::new(Arc::new(FailingStore {
            inner: inner.clone(),
            fail_key: ACCESS_TOKEN_KEY,
            fail_deletes: false,
        }));

        assert!(credentials.save(session("T1")).is_err());
        assert!(inner.is_empty());
        assert!(credentials.session().is_none());
    }

    #[test]
    fn test_failed_wipe_reports_the_write_error() {
        let inner = MemoryStore::new();
        let mut credentials = CredentialStore::new(Arc::new(FailingStore {
            inner: inner.clone(),
            fail_key: ACCESS_TOKEN_KEY,
            fail_deletes: true,
        }));
        credentials.session = Some(session("T0"));

        match credentials.save(session("T1")) {
            Err(StoreError::Crypto(msg)) => assert_eq!(msg, "keychain locked"),
            other => panic!("expected the write error, got {:?}", other),
        }
        // Keys written before the failure could not be wiped
        assert!(inner.contains(USER_KEY));
        assert_eq!(credentials.current_access_token(), Some("T0"));
    }
}
