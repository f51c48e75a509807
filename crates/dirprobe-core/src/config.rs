//! Endpoint configuration for directory connections.
//!
//! A [`DirectoryEndpoint`] describes where a directory server lives and how the transport
//! is secured. It is immutable for the lifetime of a session and is passed explicitly to
//! every engine instance; there is no process-wide TLS toggle.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use validator::Validate;

/// Conventional plaintext LDAP port.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Conventional LDAP-over-TLS port.
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Transport security for the directory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    /// Unencrypted LDAP.
    #[default]
    Plaintext,
    /// LDAP over TLS (`ldaps://`).
    Tls,
}

impl TransportSecurity {
    /// URL scheme for this transport.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Plaintext => "ldap",
            Self::Tls => "ldaps",
        }
    }

    /// Conventional port for this transport.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plaintext => DEFAULT_LDAP_PORT,
            Self::Tls => DEFAULT_LDAPS_PORT,
        }
    }

    /// Label used in progress messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plaintext => "standard LDAP",
            Self::Tls => "SSL/TLS LDAP",
        }
    }
}

/// Server certificate verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CertificatePolicy {
    /// Verify the server certificate chain and host name.
    #[default]
    Verify,
    /// Accept any certificate. Debug escape hatch only.
    Skip,
}

/// Location and transport settings of a directory server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DirectoryEndpoint {
    /// Host name or address.
    #[validate(length(min = 1, max = 253))]
    pub host: String,

    /// TCP port.
    #[validate(range(min = 1))]
    pub port: u16,

    /// Transport security mode.
    #[serde(default)]
    pub security: TransportSecurity,

    /// Certificate verification policy (only meaningful for TLS).
    #[serde(default)]
    pub certificates: CertificatePolicy,
}

impl DirectoryEndpoint {
    /// Creates a plaintext endpoint on the conventional port.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty.
    pub fn new(host: impl Into<String>) -> Result<Self, Error> {
        let endpoint = Self {
            host: host.into().trim().to_string(),
            port: DEFAULT_LDAP_PORT,
            security: TransportSecurity::Plaintext,
            certificates: CertificatePolicy::Verify,
        };

        endpoint
            .validate()
            .map_err(|e| Error::Config(format!("Invalid endpoint: {e}")))?;

        Ok(endpoint)
    }

    /// Switches to TLS and, if the port is still the plaintext default, to 636.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        if self.port == DEFAULT_LDAP_PORT {
            self.port = DEFAULT_LDAPS_PORT;
        }
        self.security = TransportSecurity::Tls;
        self
    }

    /// Overrides the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the certificate verification policy.
    #[must_use]
    pub const fn with_certificate_policy(mut self, policy: CertificatePolicy) -> Self {
        self.certificates = policy;
        self
    }

    /// Returns true if the transport is TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.security, TransportSecurity::Tls)
    }

    /// Returns true if certificate verification is disabled.
    #[must_use]
    pub const fn skips_verification(&self) -> bool {
        matches!(self.certificates, CertificatePolicy::Skip)
    }

    /// Builds the `ldap://` or `ldaps://` URL for this endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot form a valid URL.
    pub fn url(&self) -> Result<Url, Error> {
        let url = Url::parse(&format!(
            "{}://{}:{}",
            self.security.scheme(),
            self.host,
            self.port
        ))?;
        if url.host_str().is_none() {
            return Err(Error::Config(format!("invalid host `{}`", self.host)));
        }
        Ok(url)
    }

    /// `host:port` form used for raw socket checks and log fields.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DirectoryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.security.scheme(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = DirectoryEndpoint::new("dc01.corp.example").unwrap();
        assert_eq!(endpoint.port, 389);
        assert!(!endpoint.is_tls());
        assert!(!endpoint.skips_verification());
        assert_eq!(endpoint.to_string(), "ldap://dc01.corp.example:389");
    }

    #[test]
    fn test_with_tls_switches_default_port() {
        let endpoint = DirectoryEndpoint::new("dc01").unwrap().with_tls();
        assert_eq!(endpoint.port, 636);
        assert!(endpoint.is_tls());

        let custom = DirectoryEndpoint::new("dc01")
            .unwrap()
            .with_port(3269)
            .with_tls();
        assert_eq!(custom.port, 3269);
    }

    #[test]
    fn test_url() {
        let endpoint = DirectoryEndpoint::new("10.0.0.5")
            .unwrap()
            .with_tls()
            .with_certificate_policy(CertificatePolicy::Skip);
        let url = endpoint.url().unwrap();
        assert_eq!(url.scheme(), "ldaps");
        assert_eq!(url.host_str(), Some("10.0.0.5"));
        assert_eq!(url.port(), Some(636));
        assert!(endpoint.skips_verification());
        assert_eq!(endpoint.address(), "10.0.0.5:636");
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            DirectoryEndpoint::new("   "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let endpoint: DirectoryEndpoint =
            serde_json::from_str(r#"{"host": "dc01", "port": 636, "security": "tls"}"#).unwrap();
        assert!(endpoint.is_tls());
        assert_eq!(endpoint.certificates, CertificatePolicy::Verify);
        assert!(endpoint.validate().is_ok());

        let zero: DirectoryEndpoint =
            serde_json::from_str(r#"{"host": "dc01", "port": 0}"#).unwrap();
        assert!(zero.validate().is_err());
    }
}
