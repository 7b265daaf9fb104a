//! An in-memory [`Authenticator`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{AuthError, Authenticator, Credentials, PASSWORD, VERIFICATION_CODE};

/// User data carried by a connection context once signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub attributes: HashMap<String, String>,
}

/// A context that can hold a signed-in user.
///
/// Implement this on your connection context to use it with
/// [`MemoryAuthenticator`].
pub trait UserSession {
    fn profile(&self) -> Option<&UserProfile>;

    fn sign_in(&mut self, profile: UserProfile);

    /// Clears the signed-in user, returning it.
    fn sign_out(&mut self) -> Option<UserProfile>;
}

#[derive(Debug)]
struct Account {
    password: String,
    verification_code: Option<String>,
    attributes: HashMap<String, String>,
}

impl Account {
    fn accepts(&self, credentials: &Credentials) -> bool {
        let password_ok = credentials.get(PASSWORD) == Some(&self.password);
        let code_ok = match &self.verification_code {
            Some(code) => credentials.get(VERIFICATION_CODE) == Some(code),
            None => true,
        };
        password_ok && code_ok
    }
}

#[derive(Debug, Default)]
struct Store {
    accounts: HashMap<String, Account>,
    authenticated: HashSet<String>,
}

/// Keeps accounts and the set of authenticated users in memory.
///
/// Each user may be authenticated from one context at a time; a second
/// login for the same user is refused until the first signs out.
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    store: Mutex<Store>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an account.
    pub fn add_user(&self, id: impl Into<String>, password: impl Into<String>) {
        let id = id.into();
        debug!(user = %id, "account added");
        self.lock().accounts.insert(
            id,
            Account {
                password: password.into(),
                verification_code: None,
                attributes: HashMap::new(),
            },
        );
    }

    /// Requires `code` under [`VERIFICATION_CODE`] in addition to the
    /// password for this user.
    pub fn require_verification_code(
        &self,
        id: &str,
        code: impl Into<String>,
    ) -> Result<(), AuthError> {
        let mut store = self.lock();
        let account = store
            .accounts
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownUser(id.to_owned()))?;
        account.verification_code = Some(code.into());
        Ok(())
    }

    /// Sets a stored attribute copied into contexts on `populate`.
    pub fn set_attribute(
        &self,
        id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), AuthError> {
        let mut store = self.lock();
        let account = store
            .accounts
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownUser(id.to_owned()))?;
        account.attributes.insert(key.into(), value.into());
        Ok(())
    }

    /// Stored attribute value, if any.
    pub fn attribute(&self, id: &str, key: &str) -> Option<String> {
        self.lock()
            .accounts
            .get(id)
            .and_then(|a| a.attributes.get(key).cloned())
    }

    pub fn authenticated_count(&self) -> usize {
        self.lock().authenticated.len()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: UserSession + 'static> Authenticator<C> for MemoryAuthenticator {
    fn is_authenticated(&self, id: &str) -> Result<bool, AuthError> {
        Ok(self.lock().authenticated.contains(id))
    }

    fn user_exists(&self, id: &str) -> Result<bool, AuthError> {
        Ok(self.lock().accounts.contains_key(id))
    }

    /// Unknown users never have valid credentials.
    fn credentials_valid(&self, id: &str, credentials: &Credentials) -> Result<bool, AuthError> {
        Ok(self
            .lock()
            .accounts
            .get(id)
            .is_some_and(|account| account.accepts(credentials)))
    }

    /// Checks and claims the user under one lock, so two contexts racing
    /// to log in the same user cannot both succeed.
    fn authenticate(
        &self,
        context: &mut C,
        id: &str,
        credentials: &Credentials,
    ) -> Result<bool, AuthError> {
        let mut store = self.lock();
        let attributes = match store.accounts.get(id) {
            Some(account) if account.accepts(credentials) => account.attributes.clone(),
            _ => {
                debug!(user = id, "authentication refused");
                return Ok(false);
            }
        };
        if !store.authenticated.insert(id.to_owned()) {
            debug!(user = id, "authentication refused: already signed in");
            return Ok(false);
        }
        drop(store);

        context.sign_in(UserProfile {
            id: id.to_owned(),
            attributes,
        });
        debug!(user = id, "user authenticated");
        Ok(true)
    }

    fn unauthenticate(&self, context: &mut C, id: &str) -> Result<bool, AuthError> {
        if let Some(profile) = context.profile() {
            if profile.id != id {
                return Err(AuthError::ContextMismatch {
                    expected: id.to_owned(),
                    found: profile.id.clone(),
                });
            }
        }
        let was_authenticated = self.lock().authenticated.remove(id);
        let signed_out = context.sign_out().is_some();
        if was_authenticated || signed_out {
            debug!(user = id, "user signed out");
        }
        Ok(was_authenticated || signed_out)
    }

    /// Also marks the user authenticated. Refuses a user already signed in
    /// from another context.
    fn populate(&self, context: &mut C, id: &str) -> Result<(), AuthError> {
        let mut store = self.lock();
        let attributes = store
            .accounts
            .get(id)
            .map(|a| a.attributes.clone())
            .ok_or_else(|| AuthError::UnknownUser(id.to_owned()))?;
        if !store.authenticated.insert(id.to_owned()) {
            return Err(AuthError::AlreadyAuthenticated(id.to_owned()));
        }
        drop(store);

        context.sign_in(UserProfile {
            id: id.to_owned(),
            attributes,
        });
        Ok(())
    }

    fn update(&self, context: &C, id: &str) -> Result<bool, AuthError> {
        let Some(profile) = context.profile() else {
            return Ok(false);
        };
        if profile.id != id {
            return Err(AuthError::ContextMismatch {
                expected: id.to_owned(),
                found: profile.id.clone(),
            });
        }
        let mut store = self.lock();
        let account = store
            .accounts
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownUser(id.to_owned()))?;
        if account.attributes == profile.attributes {
            return Ok(false);
        }
        account.attributes = profile.attributes.clone();
        Ok(true)
    }
}
