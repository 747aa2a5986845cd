use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Timeout cannot be 0: {0}")]
    InvalidTimeout(&'static str),

    #[error("Upstream base URL must use http or https: {0}")]
    UnsupportedScheme(String),

    #[error("Upstream prefix must be empty or start with '/' and not end with '/': {0}")]
    InvalidPrefix(String),
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public listener serving `/proxy/*`
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Backend API the gateway forwards to
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub login: LoginConfig,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstream.validate()?;
        self.timeouts.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_prefix() -> String {
    "/api".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the backend API, e.g. `https://backend.internal:8443`.
    ///
    /// Trailing slashes are ignored when building request URLs.
    pub base_url: Url,
    /// Path prefix inserted between the base URL and the forwarded path.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Skip TLS certificate verification for the upstream connection.
    /// Applied once when the HTTP client is built.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(
                self.base_url.scheme().to_string(),
            ));
        }

        if !self.prefix.is_empty() && (!self.prefix.starts_with('/') || self.prefix.ends_with('/'))
        {
            return Err(ValidationError::InvalidPrefix(self.prefix.clone()));
        }

        Ok(())
    }

    /// Base URL with any trailing slashes removed.
    pub fn trimmed_base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Builds `{base}{prefix}/{path}` or `{base}/{path}` depending on `with_prefix`.
    pub fn url_for(&self, path: &str, with_prefix: bool) -> String {
        let prefix = if with_prefix { self.prefix.as_str() } else { "" };
        format!(
            "{}{}/{}",
            self.trimmed_base(),
            prefix,
            path.trim_start_matches('/')
        )
    }
}

fn default_auth_secs() -> u64 {
    10
}

fn default_proxy_secs() -> u64 {
    20
}

/// Per-attempt upstream timeouts
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Bound for each login attempt (primary and fallback alike)
    #[serde(default = "default_auth_secs")]
    pub auth_secs: u64,
    /// Bound for every generically forwarded request
    #[serde(default = "default_proxy_secs")]
    pub proxy_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            auth_secs: default_auth_secs(),
            proxy_secs: default_proxy_secs(),
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.auth_secs == 0 {
            return Err(ValidationError::InvalidTimeout("auth_secs"));
        }
        if self.proxy_secs == 0 {
            return Err(ValidationError::InvalidTimeout("proxy_secs"));
        }
        Ok(())
    }

    pub fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    pub fn proxy(&self) -> Duration {
        Duration::from_secs(self.proxy_secs)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoginConfig {
    /// Whether the primary login attempt includes the upstream prefix.
    /// The fallback attempt always uses the opposite shape.
    #[serde(default = "default_true")]
    pub primary_with_prefix: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        LoginConfig {
            primary_with_prefix: true,
        }
    }
}
