//! Auth collaborator: the endpoints that create or destroy a stored session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SessionConfig;
use crate::store::{SessionStore, StoreError, purge_session, read_token, save_session};
use crate::user::UserSummary;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no session token stored")]
    NoToken,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

impl RegisterRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Body of a successful login/registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserSummary>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    user: UserSummary,
}

/// Client for `auth/login`, `auth/register` and `auth/me`, writing through to
/// the session store.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
}

impl AuthClient {
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            store,
        })
    }

    /// `POST auth/login`; stores the issued token and user on success.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let url = self.config.endpoint("auth/login");
        tracing::debug!(%url, "logging in");

        let resp = self
            .http
            .post(&url)
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let body: AuthResponse = read_json(resp).await?;
        let token = body
            .access_token
            .as_deref()
            .ok_or_else(|| ClientError::Parse("login response carried no access_token".into()))?;
        save_session(self.store.as_ref(), token, body.user.as_ref()).await?;
        tracing::info!("login succeeded; session stored");
        Ok(body)
    }

    /// `POST auth/register`; stores the session when the server issues a token.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        let url = self.config.endpoint("auth/register");
        tracing::debug!(%url, "registering");

        let resp = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let body: AuthResponse = read_json(resp).await?;
        if let Some(token) = body.access_token.as_deref() {
            save_session(self.store.as_ref(), token, body.user.as_ref()).await?;
            tracing::info!("registration succeeded; session stored");
        }
        Ok(body)
    }

    /// `GET auth/me` with the stored bearer token.
    pub async fn current_user(&self) -> Result<UserSummary, ClientError> {
        let token = read_token(self.store.as_ref())
            .await?
            .ok_or(ClientError::NoToken)?;
        let url = self.config.endpoint("auth/me");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let body: MeResponse = read_json(resp).await?;
        Ok(body.user)
    }

    /// Local logout: purge the stored session. The backend keeps no session
    /// state to tear down.
    pub async fn logout(&self) -> Result<(), ClientError> {
        purge_session(self.store.as_ref()).await?;
        tracing::info!("logged out; session purged");
        Ok(())
    }
}

async fn read_json<T>(resp: reqwest::Response) -> Result<T, ClientError>
where
    T: serde::de::DeserializeOwned,
{
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            status: status.as_u16(),
            message: api_error_message(&text).unwrap_or_else(|| status.to_string()),
        });
    }
    resp.json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))
}

/// Pull a human-readable message out of an error body (`error` or `message`).
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message", "msg"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}
