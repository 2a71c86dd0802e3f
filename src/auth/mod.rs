//! Authentication service.
//!
//! [`AuthService`] drives login, logout, verification and refresh through the
//! [`crate::session::SessionManager`], recovers expired sessions with stored
//! credentials when the user opted in, and writes an `auth` audit entry for
//! every step.

mod error;
mod result;
mod service;

pub use error::AuthError;
pub use result::{AuthResult, FailureCategory};
pub use service::{AuthService, AuthServiceBuilder};
