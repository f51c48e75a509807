//! Classification of directory result codes.
//!
//! Directory servers report failures as numeric LDAP result codes, and Active Directory
//! adds a hexadecimal sub-code to the diagnostic message (`0000052D: ...`). This module
//! folds both into a small set of categories that decide whether an operation is retried,
//! surfaced verbatim, or accompanied by a remediation hint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric LDAP result codes the engine cares about.
pub mod result_code {
    /// Operation completed.
    pub const SUCCESS: u32 = 0;
    /// Constraint violation (AD reports password policy failures with this code).
    pub const CONSTRAINT_VIOLATION: u32 = 19;
    /// The attribute or value to delete is not present.
    pub const NO_SUCH_ATTRIBUTE: u32 = 16;
    /// Attribute or value already exists (duplicate group member).
    pub const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
    /// The target entry does not exist.
    pub const NO_SUCH_OBJECT: u32 = 32;
    /// Bind credentials were rejected.
    pub const INVALID_CREDENTIALS: u32 = 49;
    /// Bound identity lacks the rights for the operation.
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    /// Server is busy.
    pub const BUSY: u32 = 51;
    /// Server is unavailable.
    pub const UNAVAILABLE: u32 = 52;
    /// Server refuses to perform the operation.
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    /// An entry with the requested DN already exists.
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    /// Client-side: connection to the server was lost.
    pub const SERVER_DOWN: u32 = 81;
    /// Client-side: operation timed out.
    pub const TIMEOUT: u32 = 85;
}

// AD extended error sub-codes carried in the diagnostic message.
const AD_INSUFFICIENT_RIGHTS: &str = "0000001F";
const AD_PASSWORD_POLICY: &str = "0000052D";
/// AD sub-code for deleting an attribute value that is not present (`WILL_NOT_PERFORM`).
pub const AD_VALUE_NOT_PRESENT: &str = "00000561";

/// Actionable failure category derived from a directory result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bind DN or password rejected.
    InvalidCredentials,
    /// The bound identity may not perform the operation.
    InsufficientAccess,
    /// The addressed entry does not exist.
    NoSuchObject,
    /// The entry or value is already present.
    AlreadyExists,
    /// A server-side policy (e.g. password complexity) rejected the request.
    PolicyViolation,
    /// Network-level failure that may succeed on retry.
    TransientNetwork,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Classifies an LDAP result code together with its diagnostic message.
    #[must_use]
    pub fn from_result(code: u32, diagnostic: &str) -> Self {
        match code {
            result_code::INVALID_CREDENTIALS => Self::InvalidCredentials,
            result_code::INSUFFICIENT_ACCESS_RIGHTS => Self::InsufficientAccess,
            result_code::NO_SUCH_OBJECT => Self::NoSuchObject,
            result_code::ENTRY_ALREADY_EXISTS | result_code::ATTRIBUTE_OR_VALUE_EXISTS => {
                Self::AlreadyExists
            }
            result_code::CONSTRAINT_VIOLATION => Self::PolicyViolation,
            result_code::UNWILLING_TO_PERFORM => {
                if has_ad_subcode(diagnostic, AD_INSUFFICIENT_RIGHTS) {
                    Self::InsufficientAccess
                } else if has_ad_subcode(diagnostic, AD_PASSWORD_POLICY) {
                    Self::PolicyViolation
                } else {
                    Self::Unknown
                }
            }
            result_code::BUSY
            | result_code::UNAVAILABLE
            | result_code::SERVER_DOWN
            | result_code::TIMEOUT => Self::TransientNetwork,
            _ => Self::Unknown,
        }
    }

    /// Returns true if an operation failing with this category may be retried automatically.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork)
    }

    /// Short remediation hint suitable for a tooltip next to the failure.
    #[must_use]
    pub const fn remediation_hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidCredentials => Some("check the bind DN and password"),
            Self::InsufficientAccess => {
                Some("bind with an account that has rights on the target container")
            }
            Self::NoSuchObject => Some("verify the DN and search base exist on the server"),
            Self::AlreadyExists => None,
            Self::PolicyViolation => Some("check password complexity requirements"),
            Self::TransientNetwork => Some("check network connectivity and retry"),
            Self::Unknown => None,
        }
    }

    /// Stable identifier for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InsufficientAccess => "insufficient_access",
            Self::NoSuchObject => "no_such_object",
            Self::AlreadyExists => "already_exists",
            Self::PolicyViolation => "policy_violation",
            Self::TransientNetwork => "transient_network",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `diagnostic` carries the AD extended error `subcode`.
///
/// The full eight-digit form matches anywhere. The short form some builds print ("52d")
/// only counts directly after a `code` or `data` keyword.
#[must_use]
pub fn has_ad_subcode(diagnostic: &str, subcode: &str) -> bool {
    let upper = diagnostic.to_ascii_uppercase();
    if upper.contains(subcode) {
        return true;
    }
    let short = subcode.trim_start_matches('0');
    let tokens = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();
    tokens
        .windows(2)
        .any(|pair| matches!(pair[0], "CODE" | "DATA") && pair[1] == short)
}
