//! Configuration for a directory probe session.

use crate::{dn::DistinguishedName, Result};
use dirprobe_core::retry::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_OPERATION_TIMEOUT_SECS};
use dirprobe_core::{Credential, DirectoryEndpoint, Error, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Everything an engine instance needs to reach and bind to one directory server.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    endpoint: DirectoryEndpoint,
    credential: Option<Credential>,
    search_base: DistinguishedName,
    tls_ca_cert: Option<PathBuf>,
    connection_timeout_secs: u64,
    operation_timeout_secs: u64,
    retry: RetryPolicy,
}

impl ProbeConfig {
    /// Creates a configuration with default timeouts and retry policy and no credential.
    #[must_use]
    pub fn new(endpoint: DirectoryEndpoint, search_base: DistinguishedName) -> Self {
        Self {
            endpoint,
            credential: None,
            search_base,
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }

    /// Loads and validates a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document does not parse, fails validation or names
    /// an invalid search base.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: ProbeSettings = serde_json::from_str(json)?;
        settings.validate()?;
        settings.into_config()
    }

    /// Returns the directory endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &DirectoryEndpoint {
        &self.endpoint
    }

    /// Returns the bind credential, if any.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Returns the search base used for account lookups.
    #[must_use]
    pub const fn search_base(&self) -> &DistinguishedName {
        &self.search_base
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&Path> {
        self.tls_ca_cert.as_deref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Sets the bind credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Serialized form of [`ProbeConfig`].
#[derive(Debug, Deserialize, Validate)]
pub struct ProbeSettings {
    /// Server location and transport.
    #[validate(nested)]
    pub endpoint: DirectoryEndpoint,

    /// Optional bind credential.
    #[serde(default)]
    pub credential: Option<Credential>,

    /// Search base DN.
    #[validate(length(min = 1))]
    pub search_base: String,

    /// Optional CA certificate path.
    #[serde(default)]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds.
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Operation timeout in seconds.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Maximum attempts for transient failures.
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_operation_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    dirprobe_core::retry::DEFAULT_MAX_ATTEMPTS
}

impl ProbeSettings {
    fn into_config(self) -> Result<ProbeConfig> {
        let search_base = DistinguishedName::parse(&self.search_base)
            .map_err(|err| Error::Config(format!("invalid search base: {err}")))?;

        let mut config = ProbeConfig::new(self.endpoint, search_base)
            .with_connection_timeout_secs(self.connect_timeout_secs)
            .with_operation_timeout_secs(self.operation_timeout_secs)
            .with_retry_policy(RetryPolicy::new().with_max_attempts(self.max_attempts));
        if let Some(credential) = self.credential {
            config = config.with_credential(credential);
        }
        if let Some(path) = self.tls_ca_cert {
            config = config.with_tls_ca_cert(path);
        }
        Ok(config)
    }
}
