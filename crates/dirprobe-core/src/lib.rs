//! # dirprobe-core
//!
//! Core types shared by the dirprobe directory engine.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and operator-facing failure reports
//! - [`classify`] - LDAP result code classification
//! - [`config`] - Directory endpoint configuration
//! - [`credential`] - Bind credentials
//! - [`retry`] - Retry policy and timeout defaults
//! - [`identity`] - Active Directory object identity values (SID, object GUID)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod credential;
pub mod error;
pub mod identity;
pub mod retry;

// Re-export commonly used types
pub use classify::ErrorCategory;
pub use config::{CertificatePolicy, DirectoryEndpoint, TransportSecurity};
pub use credential::Credential;
pub use error::{Error, FailureReport, Result};
pub use identity::{ObjectGuid, Sid};
pub use retry::RetryPolicy;
