//! Session client configuration loaded from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api/cvai";
pub const DEFAULT_PROTECTED_PATH: &str = "/profile";
pub const DEFAULT_SIGN_IN_PATH: &str = "/login";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// API base including the product namespace, e.g. `https://host/api/cvai`.
    pub api_base: String,
    /// Protected endpoint used to confirm the server still honors a token.
    pub protected_path: String,
    /// Front-end route unauthorized viewers are sent to.
    pub sign_in_path: String,
    pub probe_interval: Duration,
    pub request_timeout: Duration,
    /// Treat a missing `user` record as "not signed in".
    pub require_user: bool,
    /// Storage scope; defaults to `api_base`.
    pub origin: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            protected_path: DEFAULT_PROTECTED_PATH.to_string(),
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            require_user: false,
            origin: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Configuration for an API base with every other setting at its default.
    pub fn for_api(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into();
        Self {
            origin: api_base.clone(),
            api_base,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                tracing::debug!("{key} not set; using default");
            }
            value
        };

        let api_base = get("CVAI_API_BASE").unwrap_or(defaults.api_base);
        let origin = get("CVAI_ORIGIN").unwrap_or_else(|| api_base.clone());

        Ok(Self {
            protected_path: get("CVAI_PROTECTED_PATH").unwrap_or(defaults.protected_path),
            sign_in_path: get("CVAI_SIGN_IN_PATH").unwrap_or(defaults.sign_in_path),
            probe_interval: match get("CVAI_PROBE_INTERVAL_SECS") {
                Some(v) => parse_secs("CVAI_PROBE_INTERVAL_SECS", &v)?,
                None => defaults.probe_interval,
            },
            request_timeout: match get("CVAI_REQUEST_TIMEOUT_SECS") {
                Some(v) => parse_secs("CVAI_REQUEST_TIMEOUT_SECS", &v)?,
                None => defaults.request_timeout,
            },
            require_user: match get("CVAI_REQUIRE_USER") {
                Some(v) => parse_bool("CVAI_REQUIRE_USER", &v)?,
                None => defaults.require_user,
            },
            api_base,
            origin,
        })
    }

    /// Absolute URL of the protected validation endpoint.
    pub fn protected_url(&self) -> String {
        self.endpoint(&self.protected_path)
    }

    /// Join `path` onto the API base with exactly one `/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a whole number of seconds, got {value:?}"))?;
    anyhow::ensure!(secs > 0, "{key} must be greater than zero");
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{key} must be a boolean, got {other:?}"),
    }
}
