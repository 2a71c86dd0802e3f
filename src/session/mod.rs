//! Authenticated-session state machine.
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated <-> Refreshing
//!                                           |
//!                                           v
//!                    Unauthenticated <- Expired
//! ```
//!
//! The manager persists a descriptor of the current session, restores it on
//! open, and owns a cancellable background task that refreshes the session
//! shortly before it expires.

mod manager;
mod state;

pub use manager::{AuthenticationGuard, SessionManager, SessionSettings};
pub use state::{PersistedSession, Session, SessionInfo, SessionState};
