//! `cvai-session`
//!
//! **Responsibility:** client-side session guard for the cvAI front ends.
//!
//! This crate provides:
//! - Origin-scoped session storage (`token` / `user` records)
//! - Remote validation of a stored bearer token against a protected endpoint
//! - The session guard: entry check, periodic re-probe, cancellation
//! - The auth collaborator (login / register / current user / logout)
//!
//! Token structure and expiry are evaluated by `cvai-auth`; this crate owns
//! every side effect (HTTP, storage, timers, redirects).

pub mod client;
pub mod config;
pub mod guard;
pub mod sqlite_store;
pub mod store;
pub mod user;
pub mod validator;

pub use client::{AuthClient, ClientError, RegisterRequest};
pub use config::SessionConfig;
pub use guard::{
    ChannelNavigator, GuardHandle, GuardOptions, GuardState, Navigator, Redirect, SessionGuard,
    SessionState, UnauthorizedReason,
};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, SessionStore, StoreError};
pub use user::{UserId, UserSummary};
pub use validator::{Rejection, RemoteValidator, TokenValidator, Validation};

/// Shorten a bearer token for logging. Tokens are never logged in full.
pub(crate) fn redact(token: &str) -> String {
    const VISIBLE: usize = 12;
    match token.char_indices().nth(VISIBLE) {
        Some((idx, _)) => format!("{}…", &token[..idx]),
        None => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn redact_keeps_only_a_prefix() {
        assert_eq!(redact("abcdefghijklmnopqrstuvwxyz"), "abcdefghijkl…");
        assert_eq!(redact("short"), "short");
    }
}
