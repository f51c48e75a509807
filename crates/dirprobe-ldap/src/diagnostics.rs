//! Connectivity, bind and user authentication checks.

use crate::{
    config::ProbeConfig,
    connection::ConnectionManager,
    dn::DistinguishedName,
    filter::UserLookupFilter,
    session::{LdapConnector, RealLdapConnector, SearchScope},
    Result,
};
use dirprobe_core::{CertificatePolicy, Credential, Error, ErrorCategory, TransportSecurity};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

const ROOT_DSE_ATTRIBUTES: &[&str] = &["supportedLDAPVersion", "defaultNamingContext"];
const USER_DN_ATTRIBUTES: &[&str] = &["distinguishedName"];

/// What a server advertised during [`DirectoryProbe::test_connectivity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    /// `ldap://` or `ldaps://` URL that was dialed.
    pub endpoint: String,
    /// Transport used.
    pub transport: TransportSecurity,
    /// Certificate handling for TLS transports.
    pub certificate_policy: CertificatePolicy,
    /// Values of `supportedLDAPVersion`.
    pub supported_ldap_versions: Vec<String>,
    /// `defaultNamingContext`, when the server publishes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_naming_context: Option<String>,
}

/// Runs the read-only checks an operator does before provisioning.
///
/// Every check opens its own connection and closes it before returning.
pub struct DirectoryProbe {
    config: Arc<ProbeConfig>,
    connector: Arc<dyn LdapConnector>,
}

impl DirectoryProbe {
    /// Creates a probe that dials through `ldap3`.
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        let config = Arc::new(config);
        let connector: Arc<dyn LdapConnector> = Arc::new(RealLdapConnector::new(config.clone()));
        Self { config, connector }
    }

    pub(crate) fn with_connector(config: ProbeConfig, connector: Arc<dyn LdapConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Returns the probe configuration.
    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn manager(&self, credential: Option<Credential>) -> ConnectionManager {
        ConnectionManager::with_connector(self.config.clone(), self.connector.clone())
            .with_credential(credential)
    }

    /// Dials anonymously and reads the root DSE.
    ///
    /// # Errors
    ///
    /// Returns the classified dial, TLS or search failure.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    pub async fn test_connectivity(&self) -> Result<ConnectivityReport> {
        let endpoint = self.config.endpoint();
        let mut manager = self.manager(None);

        let root = {
            let session = manager.live_session().await?;
            session
                .search("", SearchScope::Base, "(objectClass=*)", ROOT_DSE_ATTRIBUTES)
                .await
        };
        manager.close().await;
        let root = root?.into_iter().next();

        let report = ConnectivityReport {
            endpoint: endpoint.url()?.to_string(),
            transport: endpoint.security,
            certificate_policy: endpoint.certificates,
            supported_ldap_versions: root
                .as_ref()
                .map(|entry| entry.values("supportedLDAPVersion").to_vec())
                .unwrap_or_default(),
            default_naming_context: root
                .as_ref()
                .and_then(|entry| entry.first("defaultNamingContext"))
                .map(str::to_string),
        };
        info!(versions = ?report.supported_ldap_versions, "directory reachable");
        Ok(report)
    }

    /// Dials and binds with the configured credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no credential is configured, [`Error::Auth`] without
    /// dialing if the credential has a bind DN but no password, otherwise the classified
    /// dial or bind failure.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    pub async fn test_bind(&self) -> Result<()> {
        let credential = self
            .config
            .credential()
            .cloned()
            .ok_or_else(|| Error::Config("no bind credential configured".to_string()))?;

        let mut manager = self.manager(Some(credential));
        let result = manager.connect().await;
        manager.close().await;
        result
    }

    /// Finds a user with the configured credential, then binds as that user.
    ///
    /// Returns the DN that authenticated. The lookup must match exactly one entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] for an empty or rejected password (checked before any
    /// traffic for the empty case), a "no such object" error when nothing matches, and
    /// [`Error::Config`] when the filter matches several entries.
    #[instrument(skip(self, password), fields(login = %login, base = %search_base, filter = %filter))]
    pub async fn test_user_auth(
        &self,
        login: &str,
        password: &str,
        search_base: &DistinguishedName,
        filter: UserLookupFilter,
    ) -> Result<DistinguishedName> {
        // An empty password would turn the bind into an unauthenticated one that succeeds.
        if password.is_empty() {
            return Err(Error::Auth {
                category: ErrorCategory::InvalidCredentials,
                message: "empty password".to_string(),
            });
        }

        let mut admin = self.manager(self.config.credential().cloned());
        let found = {
            let session = admin.live_session().await?;
            session
                .search(
                    search_base.as_str(),
                    SearchScope::Subtree,
                    &filter.render(login),
                    USER_DN_ATTRIBUTES,
                )
                .await
        };
        admin.close().await;
        let found = found?;

        let user_dn = match found.as_slice() {
            [] => {
                return Err(Error::from_result_code(
                    32,
                    format!("no user matches {} under {search_base}", filter.render(login)),
                ))
            }
            [entry] => DistinguishedName::parse(&entry.dn)?,
            entries => {
                return Err(Error::Config(format!(
                    "`{login}` matches {} entries under {search_base}; choose a more specific lookup filter",
                    entries.len()
                )))
            }
        };

        let mut user = self.manager(Some(Credential::new(user_dn.as_str(), password)));
        let result = user.connect().await;
        user.close().await;
        result?;

        info!(user = %user_dn, "user authenticated");
        Ok(user_dn)
    }
}
