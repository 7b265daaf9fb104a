//! Error types for authentication.

/// Errors raised while talking to the user store.
///
/// A *failed* login is not an error: [`authenticate`](crate::Authenticator::authenticate)
/// returns `Ok(false)` for bad credentials. These variants are for the
/// cases where the question itself could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The operation needs a user that the store doesn't know about.
    #[error("unknown user {0}")]
    UnknownUser(String),

    /// The context belongs to a different user than the one named.
    #[error("context belongs to {found}, not {expected}")]
    ContextMismatch { expected: String, found: String },

    /// The user is already signed in from another context.
    #[error("user {0} is already authenticated")]
    AlreadyAuthenticated(String),

    /// The backing store failed.
    #[error("user store failure: {0}")]
    Backend(String),
}
