//! Protocol session abstraction and its ldap3-backed implementation.

use crate::{config::ProbeConfig, Result};
use async_trait::async_trait;
use dirprobe_core::Error;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use native_tls::{Certificate, TlsConnector};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Directory entry as returned by a search.
///
/// Attribute names are looked up case-insensitively. Values that are not valid UTF-8
/// (`objectSid`, `objectGUID`) arrive in `binary_attributes`.
#[derive(Debug, Clone, Default)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Text attributes (values in server order).
    pub attributes: HashMap<String, Vec<String>>,
    /// Binary attributes.
    pub binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl LdapEntry {
    /// Creates an empty entry for `dn`.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Adds a text attribute.
    #[must_use]
    pub fn with_values<I, V>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .insert(attribute.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a binary attribute.
    #[must_use]
    pub fn with_binary(mut self, attribute: impl Into<String>, value: Vec<u8>) -> Self {
        self.binary_attributes
            .insert(attribute.into(), vec![value]);
        self
    }

    /// Returns all text values for the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map_or(&[], |(_, values)| values.as_slice())
    }

    /// Returns the first text value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }

    /// Returns the first value as raw bytes, whichever map it landed in.
    #[must_use]
    pub fn binary(&self, attribute: &str) -> Option<&[u8]> {
        self.binary_attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, values)| values.first().map(Vec::as_slice))
            .or_else(|| self.first(attribute).map(str::as_bytes))
    }

    /// Returns true if `objectClass` contains `class` (case-insensitive).
    #[must_use]
    pub fn has_object_class(&self, class: &str) -> bool {
        self.values("objectClass")
            .iter()
            .any(|value| value.eq_ignore_ascii_case(class))
    }
}

/// One attribute of an entry being added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttribute {
    /// Attribute name.
    pub name: String,
    /// Raw attribute values.
    pub values: Vec<Vec<u8>>,
}

impl EntryAttribute {
    /// Text-valued attribute.
    #[must_use]
    pub fn text<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|value| value.into().into_bytes())
                .collect(),
        }
    }

    /// Single binary value.
    #[must_use]
    pub fn binary(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            values: vec![value],
        }
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Add attribute values.
    Add,
    /// Delete attribute values (no values removes the attribute).
    Delete,
    /// Replace all values.
    Replace,
}

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryModification {
    /// Operation.
    pub op: ModifyOp,
    /// Attribute to modify.
    pub attribute: String,
    /// Raw values.
    pub values: Vec<Vec<u8>>,
}

impl DirectoryModification {
    fn text(op: ModifyOp, attribute: impl Into<String>, values: &[&str]) -> Self {
        Self {
            op,
            attribute: attribute.into(),
            values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        }
    }

    /// Adds text values.
    #[must_use]
    pub fn add(attribute: impl Into<String>, values: &[&str]) -> Self {
        Self::text(ModifyOp::Add, attribute, values)
    }

    /// Deletes text values.
    #[must_use]
    pub fn delete(attribute: impl Into<String>, values: &[&str]) -> Self {
        Self::text(ModifyOp::Delete, attribute, values)
    }

    /// Replaces the attribute with text values.
    #[must_use]
    pub fn replace(attribute: impl Into<String>, values: &[&str]) -> Self {
        Self::text(ModifyOp::Replace, attribute, values)
    }

    /// Replaces the attribute with a single binary value.
    #[must_use]
    pub fn replace_binary(attribute: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.into(),
            values: vec![value],
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>>;
    async fn add(&mut self, dn: &str, attributes: &[EntryAttribute]) -> Result<()>;
    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()>;
    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: &str,
    ) -> Result<()>;
    async fn unbind(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Real LDAP connector backed by `ldap3`.
pub(crate) struct RealLdapConnector {
    config: Arc<ProbeConfig>,
}

impl RealLdapConnector {
    pub(crate) fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let url = self.config.endpoint().url()?;
        let settings = build_ldap_settings(&self.config)?;
        debug!(url = %url, "dialing directory server");

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url.as_str())
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession {
            inner: ldap,
            operation_timeout: self.config.operation_timeout(),
        }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

impl RealLdapSession {
    async fn bounded<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, LdapError>>,
    {
        timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{operation} timed out")))?
            .map_err(map_ldap_error)
    }
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let mut ldap = self.inner.clone();
        let result = self.bounded("bind", ldap.simple_bind(dn, password)).await?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let mut ldap = self.inner.clone();
        let result = self
            .bounded(
                "search",
                ldap.search(base_dn, scope.into(), filter, attributes.to_vec()),
            )
            .await?;
        let (entries, _) = result.success().map_err(map_ldap_error)?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| LdapEntry {
                dn: entry.dn,
                attributes: entry.attrs,
                binary_attributes: entry.bin_attrs,
            })
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: &[EntryAttribute]) -> Result<()> {
        let attrs = attributes
            .iter()
            .map(|attr| {
                (
                    attr.name.clone().into_bytes(),
                    attr.values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();

        let mut ldap = self.inner.clone();
        let result = self.bounded("add", ldap.add(dn, attrs)).await?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mods = modifications
            .iter()
            .map(|m| {
                let attribute = m.attribute.clone().into_bytes();
                let values = m.values.iter().cloned().collect::<HashSet<_>>();
                match m.op {
                    ModifyOp::Add => Mod::Add(attribute, values),
                    ModifyOp::Delete => Mod::Delete(attribute, values),
                    ModifyOp::Replace => Mod::Replace(attribute, values),
                }
            })
            .collect::<Vec<_>>();

        let mut ldap = self.inner.clone();
        let result = self.bounded("modify", ldap.modify(dn, mods)).await?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: &str,
    ) -> Result<()> {
        let mut ldap = self.inner.clone();
        let result = self
            .bounded(
                "modify DN",
                ldap.modifydn(dn, new_rdn, delete_old_rdn, Some(new_superior)),
            )
            .await?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        let mut ldap = self.inner.clone();
        self.bounded("unbind", ldap.unbind()).await
    }
}

fn build_ldap_settings(config: &ProbeConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());
    let endpoint = config.endpoint();
    if !endpoint.is_tls() {
        return Ok(settings);
    }

    if endpoint.skips_verification() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| Error::Config(format!("failed to construct TLS connector: {err}")))?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::Config(format!(
                "failed to read CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| Error::Config(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::Config(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

pub(crate) fn map_ldap_error(err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => Error::from_result_code(result.rc, result.text),
        LdapError::EndOfStream => Error::transient("connection closed by server"),
        LdapError::Timeout { .. } => Error::Timeout("directory operation".to_string()),
        other => classify_transport_message(&other.to_string()),
    }
}

// TLS handshake and socket failures only surface as text through ldap3.
fn classify_transport_message(message: &str) -> Error {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("certificate") || lowered.contains("verify failed") {
        return Error::Certificate(message.to_string());
    }

    let transient = [
        "i/o error",
        "connection refused",
        "connection reset",
        "broken pipe",
        "timed out",
        "unreachable",
    ]
    .iter()
    .any(|needle| lowered.contains(needle));

    if transient {
        Error::transient(message)
    } else {
        Error::connection(message)
    }
}
