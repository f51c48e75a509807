//! Directory operation engine for LDAP / Active Directory.
//!
//! This crate provides strongly-typed DNs, a managed connection with bounded retry, and
//! idempotent provisioning operations (users, groups, containers, memberships) on top of
//! `ldap3`. Every operation returns a tagged outcome or a classified
//! [`dirprobe_core::Error`].
//!
//! ```no_run
//! use dirprobe_ldap::{DirectoryEndpoint, DistinguishedName, EntityProvisioner, ProbeConfig};
//!
//! # async fn run() -> dirprobe_ldap::Result<()> {
//! let endpoint = DirectoryEndpoint::new("dc01.corp.example")?.with_tls();
//! let base = DistinguishedName::parse("DC=corp,DC=example")?;
//! let mut provisioner = EntityProvisioner::new(ProbeConfig::new(endpoint, base));
//! let target = DistinguishedName::parse("CN=jdoe,OU=Staff,DC=corp,DC=example")?;
//! provisioner.provision_user(&target, "jdoe", "Str0ng!Pass", true).await?;
//! provisioner.close().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod ad;
mod config;
mod connection;
mod diagnostics;
mod dn;
mod filter;
mod group;
mod membership;
mod path;
mod provisioner;
mod session;
#[cfg(test)]
mod testing;
mod user;

pub use ad::{
    decode_password, encode_password, upn_domain, AccountControl, GLOBAL_SECURITY_GROUP,
    SSO_GROUP_DESCRIPTION, SSO_READER_MARKER,
};
pub use config::{ProbeConfig, ProbeSettings};
pub use connection::ConnectionManager;
pub use diagnostics::{ConnectivityReport, DirectoryProbe};
pub use dn::{ComponentKind, DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use filter::{entity_filter, escape_filter_value, EntityClass, UserLookupFilter};
pub use group::{Group, GroupBuilder};
pub use membership::{GroupOutcome, MembershipChange, SsoReport};
pub use provisioner::{
    DirectoryEntity, EntityProvisioner, ProgressSink, ProvisionOutcome, SearchOutcome,
};
pub use session::{
    DirectoryModification, EntryAttribute, LdapEntry, ModifyOp, SearchScope,
};
pub use user::{AccountState, User, UserBuilder};

pub use dirprobe_core::{
    CertificatePolicy, Credential, DirectoryEndpoint, Error, ErrorCategory, FailureReport,
    ObjectGuid, RetryPolicy, Sid, TransportSecurity,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirprobe_core::Result<T>;
