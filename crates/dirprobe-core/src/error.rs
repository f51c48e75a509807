//! Error types for directory operations.
//!
//! The taxonomy separates transport failures, bind failures, DN/path problems, entity
//! conflicts, server-side policy refusals and every other server-reported failure. Each
//! variant maps onto an [`ErrorCategory`] which in turn drives retry decisions and the
//! remediation hint shown to an operator.

use serde::Serialize;
use thiserror::Error;

use crate::classify::{has_ad_subcode, result_code, ErrorCategory, AD_VALUE_NOT_PRESENT};

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Dial or transport failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Human-readable description.
        message: String,
        /// Whether the failure looks transient (reset, refused, timed out).
        transient: bool,
    },

    /// TLS certificate verification failed during the handshake
    #[error("TLS certificate verification failed: {0}")]
    Certificate(String),

    /// Bind failure
    #[error("Authentication failed ({category}): {message}")]
    Auth {
        /// Either invalid credentials or insufficient access.
        category: ErrorCategory,
        /// Server diagnostic.
        message: String,
    },

    /// Malformed DN or unsupported path component
    #[error("Invalid directory path: {0}")]
    Path(String),

    /// Entity already exists
    #[error("Entry already exists at {dn}")]
    Conflict {
        /// DN of the existing entry.
        dn: String,
        /// True when the existing entry sits at the requested DN.
        same_path: bool,
    },

    /// Server-side policy refused the request
    #[error("Rejected by directory policy: {0}")]
    Policy(String),

    /// Any other server-reported failure
    #[error("Directory error {code} ({category}): {message}")]
    Protocol {
        /// Classified category.
        category: ErrorCategory,
        /// Raw LDAP result code.
        code: u32,
        /// Server diagnostic message.
        message: String,
    },

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Serializable failure description handed to presentation layers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureReport {
    /// Stable error code for programmatic handling.
    pub code: String,
    /// Classified category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Error {
    /// Builds an error from an LDAP result code and diagnostic text.
    ///
    /// Credential and policy failures land in their dedicated variants; the rest are
    /// reported as [`Error::Protocol`] with the classified category attached.
    #[must_use]
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorCategory::from_result(code, &message) {
            ErrorCategory::InvalidCredentials => Self::Auth {
                category: ErrorCategory::InvalidCredentials,
                message,
            },
            ErrorCategory::PolicyViolation => Self::Policy(message),
            category => Self::Protocol {
                category,
                code,
                message,
            },
        }
    }

    /// Creates a transient connection error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            transient: true,
        }
    }

    /// Creates a non-retryable connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            transient: false,
        }
    }

    /// Returns the error category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { transient, .. } => {
                if *transient {
                    ErrorCategory::TransientNetwork
                } else {
                    ErrorCategory::Unknown
                }
            }
            Self::Timeout(_) => ErrorCategory::TransientNetwork,
            Self::Auth { category, .. } | Self::Protocol { category, .. } => *category,
            Self::Conflict { .. } => ErrorCategory::AlreadyExists,
            Self::Policy(_) => ErrorCategory::PolicyViolation,
            Self::Certificate(_) | Self::Path(_) | Self::Config(_) => ErrorCategory::Unknown,
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Certificate(_) => "CERTIFICATE_ERROR",
            Self::Auth { .. } => "AUTH_ERROR",
            Self::Path(_) => "PATH_ERROR",
            Self::Conflict { .. } => "CONFLICT_ERROR",
            Self::Policy(_) => "POLICY_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if the connection layer may retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Returns true if this error reports a missing entry.
    #[must_use]
    pub fn is_no_such_object(&self) -> bool {
        self.category() == ErrorCategory::NoSuchObject
    }

    /// Returns true if this error reports an entry or value that is already present.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.category() == ErrorCategory::AlreadyExists
    }

    /// Returns true if a value delete failed because the value was not there.
    ///
    /// Standard servers answer with `noSuchAttribute`; AD answers with "unwilling to
    /// perform" carrying sub-code `00000561`.
    #[must_use]
    pub fn is_value_not_present(&self) -> bool {
        match self {
            Self::Protocol {
                code: result_code::NO_SUCH_ATTRIBUTE,
                ..
            } => true,
            Self::Protocol {
                code: result_code::UNWILLING_TO_PERFORM,
                message,
                ..
            } => has_ad_subcode(message, AD_VALUE_NOT_PRESENT),
            _ => false,
        }
    }

    /// Returns the LDAP result code carried by the error, if any.
    #[must_use]
    pub fn result_code(&self) -> Option<u32> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            Self::Auth {
                category: ErrorCategory::InvalidCredentials,
                ..
            } => Some(result_code::INVALID_CREDENTIALS),
            _ => None,
        }
    }

    /// Remediation hint for the operator.
    #[must_use]
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            Self::Certificate(_) => Some(
                "the server certificate is not trusted; install its CA or enable skip-verify for debugging",
            ),
            Self::Connection { .. } | Self::Timeout(_) => Some(
                "check host, port and transport security; for TLS certificate issues try skip-verify",
            ),
            Self::Policy(_) => Some("adjust the submitted password to meet complexity requirements"),
            Self::Path(_) => Some("use CN=, OU= and DC= components only"),
            Self::Conflict { same_path: false, .. } => {
                Some("move the existing entry or keep its current location")
            }
            Self::Config(_) => None,
            other => other.category().remediation_hint(),
        }
    }

    /// Converts the error into a [`FailureReport`].
    #[must_use]
    pub fn into_report(self) -> FailureReport {
        FailureReport {
            code: self.error_code().to_string(),
            category: self.category(),
            hint: self.remediation_hint().map(str::to_string),
            message: self.to_string(),
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Protocol { .. } | Self::Certificate(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid directory URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::transient("reset").error_code(), "CONNECTION_ERROR");
        assert_eq!(
            Error::Certificate("unknown authority".to_string()).error_code(),
            "CERTIFICATE_ERROR"
        );
        assert_eq!(Error::Path("x".to_string()).error_code(), "PATH_ERROR");
        assert_eq!(
            Error::Conflict {
                dn: "cn=a".to_string(),
                same_path: true
            }
            .error_code(),
            "CONFLICT_ERROR"
        );
        assert_eq!(Error::Policy("x".to_string()).error_code(), "POLICY_ERROR");
        assert_eq!(Error::Timeout("bind".to_string()).error_code(), "TIMEOUT");
        assert_eq!(Error::Config("x".to_string()).error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_value_not_present() {
        assert!(Error::from_result_code(16, "00002080: AtrErr: DSID-03152D2C").is_value_not_present());
        assert!(Error::from_result_code(
            53,
            "00000561: SvcErr: DSID-031A1236, problem 5003 (WILL_NOT_PERFORM), data 0"
        )
        .is_value_not_present());
        assert!(!Error::from_result_code(53, "00002035: SvcErr: DSID-03190F1F").is_value_not_present());
        assert!(!Error::from_result_code(32, "no such object").is_value_not_present());
    }

    #[test]
    fn test_from_result_code_routes_variants() {
        assert!(matches!(
            Error::from_result_code(49, "bad password"),
            Error::Auth {
                category: ErrorCategory::InvalidCredentials,
                ..
            }
        ));
        assert!(matches!(
            Error::from_result_code(53, "0000052D: SvcErr"),
            Error::Policy(_)
        ));
        let err = Error::from_result_code(32, "no such object");
        assert!(err.is_no_such_object());
        assert_eq!(err.result_code(), Some(32));
        assert!(Error::from_result_code(68, "exists").is_already_exists());
    }

    #[test]
    fn test_retryable_only_transient() {
        assert!(Error::transient("connection reset").is_retryable());
        assert!(Error::Timeout("search".to_string()).is_retryable());
        assert!(Error::from_result_code(52, "unavailable").is_retryable());
        assert!(!Error::connection("refused by policy").is_retryable());
        assert!(!Error::from_result_code(49, "").is_retryable());
        assert!(!Error::Policy("complexity".to_string()).is_retryable());
        assert!(!Error::Certificate("expired".to_string()).is_retryable());
    }

    #[test]
    fn test_hints() {
        let cert = Error::Certificate("unknown authority".to_string());
        assert!(cert.remediation_hint().unwrap().contains("skip-verify"));
        let policy = Error::Policy("0000052D".to_string());
        assert!(policy.remediation_hint().unwrap().contains("password"));
        let access = Error::from_result_code(50, "insufficient");
        assert_eq!(
            access.remediation_hint(),
            ErrorCategory::InsufficientAccess.remediation_hint()
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::from_result_code(32, "0000208D: NameErr");
        assert_eq!(
            err.to_string(),
            "Directory error 32 (no_such_object): 0000208D: NameErr"
        );
        let err = Error::Conflict {
            dn: "CN=jdoe,OU=Legacy,DC=corp".to_string(),
            same_path: false,
        };
        assert_eq!(err.to_string(), "Entry already exists at CN=jdoe,OU=Legacy,DC=corp");
    }

    #[test]
    fn test_into_report() {
        let report = Error::Policy("password too short".to_string()).into_report();
        assert_eq!(report.code, "POLICY_ERROR");
        assert_eq!(report.category, ErrorCategory::PolicyViolation);
        assert!(report.hint.is_some());

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("policy_violation"));
        assert!(json.contains("password too short"));

        let report = Error::Config("missing host".to_string()).into_report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("hint"));
    }

    #[test]
    fn test_should_log() {
        assert!(Error::Config("x".to_string()).should_log());
        assert!(Error::from_result_code(1, "operations error").should_log());
        assert!(!Error::from_result_code(49, "").should_log());
        assert!(!Error::Path("x".to_string()).should_log());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let converted: Error = err.into();
        assert!(matches!(converted, Error::Config(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let converted: Error = err.into();
        assert!(matches!(converted, Error::Config(_)));
    }
}
