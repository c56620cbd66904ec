//! Remote validation of a stored bearer token.
//!
//! One `GET` against a protected endpoint confirms the server still honors the
//! token (revocation, server-side logout and clock skew are invisible to the
//! client). No retry and no backoff: the guard's periodic re-probe is the only
//! repetition.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::client::ClientError;
use crate::config::SessionConfig;
use crate::guard::SessionState;
use crate::redact;
use crate::store::{SessionStore, purge_session};

/// Why the server refused a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// 401: the token is no longer honored.
    Unauthenticated,
    /// 422: the request shape (usually the Authorization header) was malformed.
    MalformedRequest,
    /// Any other non-2xx status.
    UnexpectedStatus(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Rejected(Rejection),
    /// No response (connect failure, timeout, ...).
    Unreachable(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Every outcome other than `Valid` fails closed.
    pub fn session_state(&self) -> SessionState {
        if self.is_valid() {
            SessionState::Valid
        } else {
            SessionState::Invalid
        }
    }

    /// Only a confirmed 401 destroys the stored credential. Transient server
    /// errors and connectivity blips leave it in place.
    pub fn requires_purge(&self) -> bool {
        matches!(self, Validation::Rejected(Rejection::Unauthenticated))
    }
}

/// Map an HTTP status to a validation outcome.
pub fn classify_status(status: u16) -> Validation {
    match status {
        200..=299 => Validation::Valid,
        401 => Validation::Rejected(Rejection::Unauthenticated),
        422 => Validation::Rejected(Rejection::MalformedRequest),
        other => Validation::Rejected(Rejection::UnexpectedStatus(other)),
    }
}

/// Server-side token check, abstracted so the guard can run against fakes.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Validation;
}

/// [`TokenValidator`] backed by `reqwest`.
#[derive(Clone)]
pub struct RemoteValidator {
    http: reqwest::Client,
    url: String,
    store: Option<Arc<dyn SessionStore>>,
}

impl RemoteValidator {
    /// Validator for `config.protected_url()` with the configured timeout.
    ///
    /// Without a store attached, a 401 is reported but nothing is purged.
    pub fn new(config: &SessionConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http,
            url: config.protected_url(),
            store: None,
        })
    }

    /// Attach the session store purged on 401.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenValidator for RemoteValidator {
    async fn validate(&self, token: &str) -> Validation {
        tracing::debug!(url = %self.url, token = %redact(token), "validating session token");

        let resp = match self
            .http
            .get(&self.url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "session validation request failed");
                return Validation::Unreachable(err.to_string());
            }
        };

        let status = resp.status().as_u16();
        let outcome = classify_status(status);

        match outcome {
            Validation::Valid => {
                tracing::debug!(status, "session token accepted");
            }
            Validation::Rejected(Rejection::Unauthenticated) => {
                tracing::warn!(status, "session token rejected; purging stored session");
                if let Some(store) = &self.store {
                    if let Err(err) = purge_session(store.as_ref()).await {
                        tracing::error!(error = %err, "failed to purge session after 401");
                    }
                }
            }
            Validation::Rejected(Rejection::MalformedRequest) => {
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(
                    status,
                    body = %body,
                    "malformed session validation request; check the token format"
                );
            }
            Validation::Rejected(Rejection::UnexpectedStatus(_)) => {
                tracing::warn!(status, "unexpected status from session validation");
            }
            Validation::Unreachable(_) => {}
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_statuses_are_valid() {
        for status in [200, 201, 204, 299] {
            assert_eq!(classify_status(status), Validation::Valid);
        }
    }

    #[test]
    fn unauthorized_is_the_only_purge() {
        assert!(classify_status(401).requires_purge());
        assert!(!classify_status(422).requires_purge());
        assert!(!classify_status(500).requires_purge());
        assert!(!classify_status(403).requires_purge());
        assert!(!Validation::Unreachable("timeout".into()).requires_purge());
    }

    #[test]
    fn only_success_maps_to_a_valid_session() {
        assert_eq!(classify_status(200).session_state(), SessionState::Valid);
        assert_eq!(classify_status(401).session_state(), SessionState::Invalid);
        assert_eq!(classify_status(422).session_state(), SessionState::Invalid);
        assert_eq!(
            Validation::Unreachable("refused".into()).session_state(),
            SessionState::Invalid
        );
    }

    #[test]
    fn malformed_request_is_distinguished_from_unauthorized() {
        assert_eq!(
            classify_status(422),
            Validation::Rejected(Rejection::MalformedRequest)
        );
        assert_eq!(
            classify_status(401),
            Validation::Rejected(Rejection::Unauthenticated)
        );
    }

    #[test]
    fn other_statuses_fail_closed() {
        for status in [301, 400, 403, 404, 500, 503] {
            let outcome = classify_status(status);
            assert!(!outcome.is_valid());
            assert_eq!(outcome, Validation::Rejected(Rejection::UnexpectedStatus(status)));
        }
    }

    #[test]
    fn validator_targets_protected_url() {
        let config = SessionConfig::for_api("http://127.0.0.1:9/api/cvai/");
        let validator = RemoteValidator::new(&config).unwrap();
        assert_eq!(validator.url(), "http://127.0.0.1:9/api/cvai/profile");
    }
}
