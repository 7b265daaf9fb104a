//! The authentication contract.

use std::collections::HashMap;

use crate::AuthError;

/// Credential key for a plaintext password.
pub const PASSWORD: &str = "jio-password";

/// Credential key for a verification code (e.g. a one-time code).
pub const VERIFICATION_CODE: &str = "jio-verification-code";

/// Credential name → plaintext credential.
pub type Credentials = HashMap<String, String>;

/// Validates users and moves user data in and out of a connection context.
///
/// `C` is the connection's execution context. Users are keyed by a string
/// identifier.
///
/// # Example
///
/// ```rust
/// use courier_auth::{AuthError, Authenticator, Credentials, PASSWORD};
///
/// #[derive(Default)]
/// struct Ctx {
///     user: Option<String>,
/// }
///
/// /// One hard-coded account.
/// struct Single;
///
/// impl Authenticator<Ctx> for Single {
///     fn is_authenticated(&self, _id: &str) -> Result<bool, AuthError> {
///         Ok(false)
///     }
///     fn user_exists(&self, id: &str) -> Result<bool, AuthError> {
///         Ok(id == "admin")
///     }
///     fn credentials_valid(&self, _id: &str, creds: &Credentials) -> Result<bool, AuthError> {
///         Ok(creds.get(PASSWORD).map(String::as_str) == Some("hunter2"))
///     }
///     fn unauthenticate(&self, ctx: &mut Ctx, _id: &str) -> Result<bool, AuthError> {
///         Ok(ctx.user.take().is_some())
///     }
///     fn populate(&self, ctx: &mut Ctx, id: &str) -> Result<(), AuthError> {
///         ctx.user = Some(id.to_owned());
///         Ok(())
///     }
///     fn update(&self, _ctx: &Ctx, _id: &str) -> Result<bool, AuthError> {
///         Ok(false)
///     }
/// }
///
/// let mut ctx = Ctx::default();
/// assert!(Single.authenticate_with_password(&mut ctx, "admin", "hunter2").unwrap());
/// assert_eq!(ctx.user.as_deref(), Some("admin"));
/// ```
pub trait Authenticator<C>: Send + Sync + 'static {
    /// Whether the user is currently authenticated. Behavior for unknown
    /// users is up to the implementation.
    fn is_authenticated(&self, id: &str) -> Result<bool, AuthError>;

    fn user_exists(&self, id: &str) -> Result<bool, AuthError>;

    /// Whether `credentials` are valid for the user.
    fn credentials_valid(&self, id: &str, credentials: &Credentials) -> Result<bool, AuthError>;

    /// Checks a password stored under [`PASSWORD`].
    fn password_valid(&self, id: &str, password: &str) -> Result<bool, AuthError> {
        self.credentials_valid(id, &password_credentials(password))
    }

    /// Authenticates the user and, on success, populates `context`.
    ///
    /// Succeeds only when the user exists, is not already authenticated,
    /// and the credentials are valid. `context` is left untouched on
    /// failure.
    fn authenticate(
        &self,
        context: &mut C,
        id: &str,
        credentials: &Credentials,
    ) -> Result<bool, AuthError> {
        let can_login = self.user_exists(id)?
            && !self.is_authenticated(id)?
            && self.credentials_valid(id, credentials)?;
        if can_login {
            self.populate(context, id)?;
            tracing::debug!(user = id, "user authenticated");
        } else {
            tracing::debug!(user = id, "authentication refused");
        }
        Ok(can_login)
    }

    /// [`authenticate`](Self::authenticate) with a password stored under
    /// [`PASSWORD`].
    fn authenticate_with_password(
        &self,
        context: &mut C,
        id: &str,
        password: &str,
    ) -> Result<bool, AuthError> {
        self.authenticate(context, id, &password_credentials(password))
    }

    /// Returns `context` to an unauthenticated state.
    ///
    /// `Ok(true)` when the user was signed out and the context changed.
    fn unauthenticate(&self, context: &mut C, id: &str) -> Result<bool, AuthError>;

    /// Loads the user's data into `context`. Performs no authentication.
    fn populate(&self, context: &mut C, id: &str) -> Result<(), AuthError>;

    /// Writes the user's data from `context` back to the store.
    ///
    /// `Ok(true)` only when the store was actually modified.
    fn update(&self, context: &C, id: &str) -> Result<bool, AuthError>;
}

fn password_credentials(password: &str) -> Credentials {
    HashMap::from([(PASSWORD.to_owned(), password.to_owned())])
}
