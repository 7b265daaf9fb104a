//! Authentication for Courier connections.
//!
//! Courier doesn't decide who a user is. It defines the [`Authenticator`]
//! contract, which an application implements against its own user store,
//! and ships [`MemoryAuthenticator`] for tests and small deployments.
//!
//! Authentication runs inside message execution: a login message calls
//! [`Authenticator::authenticate`] with the connection's context, and on
//! success the context is populated with the user's data.
//!
//! ```text
//! Login message ──execute──→ Authenticator::authenticate(ctx, id, creds)
//!                                 │ exists ∧ ¬authenticated ∧ valid?
//!                                 ▼ yes
//!                            populate(ctx, id)
//! ```

mod auth;
mod error;
mod memory;

pub use auth::{Authenticator, Credentials, PASSWORD, VERIFICATION_CODE};
pub use error::AuthError;
pub use memory::{MemoryAuthenticator, UserProfile, UserSession};
