//! Connection lifecycle: dial, bind, liveness probing and reconnect.

use crate::{
    config::ProbeConfig,
    session::{LdapConnector, LdapSession, RealLdapConnector, SearchScope},
    Result,
};
use dirprobe_core::{Credential, Error, ErrorCategory};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Attribute read from the root DSE to prove a session is alive.
pub(crate) const ROOT_DSE_PROBE_ATTRIBUTES: &[&str] = &["supportedLDAPVersion"];

/// Owns the single logical connection to one directory server.
///
/// The session is created lazily, rebound automatically with the remembered credential
/// after a reconnect, and released on [`ConnectionManager::close`].
pub struct ConnectionManager {
    config: Arc<ProbeConfig>,
    connector: Arc<dyn LdapConnector>,
    session: Option<Box<dyn LdapSession>>,
    credential: Option<Credential>,
}

impl ConnectionManager {
    /// Creates a manager that dials through `ldap3`, using the configured credential.
    #[must_use]
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        let connector: Arc<dyn LdapConnector> = Arc::new(RealLdapConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    pub(crate) fn with_connector(
        config: Arc<ProbeConfig>,
        connector: Arc<dyn LdapConnector>,
    ) -> Self {
        let credential = config.credential().cloned();
        Self {
            config,
            connector,
            session: None,
            credential,
        }
    }

    /// Replaces the remembered credential (`None` means anonymous). Takes effect on the
    /// next dial.
    #[must_use]
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Returns the configuration this manager dials with.
    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Returns true if the transport is TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.config.endpoint().is_tls()
    }

    /// Returns true if a session is currently held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Dials and binds, replacing any existing session.
    ///
    /// # Errors
    ///
    /// Returns the classified dial or bind failure once retries are exhausted.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    pub async fn connect(&mut self) -> Result<()> {
        self.close().await;
        let session = self.open().await?;
        self.session = Some(session);
        Ok(())
    }

    /// Binds the current session with `credential` and remembers it for rebinding.
    ///
    /// Dials first if no session is held. An anonymous credential skips the bind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the server rejects the credential.
    #[instrument(skip(self, credential), fields(bind_dn = %credential.bind_dn()))]
    pub async fn bind(&mut self, credential: Credential) -> Result<()> {
        if self.session.is_none() {
            self.credential = Some(credential);
            return self.connect().await;
        }

        if let Some(session) = self.session.as_deref_mut() {
            bind_session(session, Some(&credential)).await?;
        }
        self.credential = Some(credential);
        Ok(())
    }

    /// Makes sure a usable session exists.
    ///
    /// A held session is probed with a root DSE read; if the probe fails the session is
    /// discarded and a new one is dialed and rebound.
    ///
    /// # Errors
    ///
    /// Returns the classified failure if a fresh session cannot be established.
    pub async fn ensure_live(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_deref_mut() {
            match probe_root_dse(session).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, "liveness probe failed, reconnecting");
                }
            }
        }
        self.connect().await
    }

    pub(crate) async fn live_session(&mut self) -> Result<&mut (dyn LdapSession + 'static)> {
        self.ensure_live().await?;
        self.session
            .as_deref_mut()
            .ok_or_else(|| Error::connection("no session after reconnect"))
    }

    /// Releases the session. Safe to call repeatedly; unbind failures are ignored.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.unbind().await {
                debug!(error = %err, "unbind failed while closing session");
            }
        }
    }

    // One attempt is a dial plus bind; only transient failures start another.
    async fn open(&self) -> Result<Box<dyn LdapSession>> {
        let policy = self.config.retry_policy();
        let credential = self.credential.as_ref().filter(|c| !c.is_anonymous());
        if let Some(credential) = credential.filter(|c| c.lacks_secret()) {
            return Err(empty_password(credential));
        }
        let mut attempt = 1;

        loop {
            let result = match self.connector.connect().await {
                Ok(mut session) => {
                    let bound = bind_session(session.as_mut(), credential).await;
                    bound.map(|()| session)
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(session) => {
                    info!(
                        transport = self.config.endpoint().security.label(),
                        attempt, "directory session established"
                    );
                    return Ok(session);
                }
                Err(err) if err.is_retryable() && policy.allows_another(attempt) => {
                    let delay = policy.delay_after_attempt(attempt);
                    warn!(error = %err, attempt, ?delay, "transient failure, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn bind_session(session: &mut dyn LdapSession, credential: Option<&Credential>) -> Result<()> {
    let Some(credential) = credential.filter(|c| !c.is_anonymous()) else {
        debug!("no credential, staying anonymous");
        return Ok(());
    };

    if credential.lacks_secret() {
        return Err(empty_password(credential));
    }

    session
        .simple_bind(credential.bind_dn(), credential.secret())
        .await
        .map_err(|err| match err {
            Error::Protocol {
                category: ErrorCategory::InsufficientAccess,
                message,
                ..
            } => Error::Auth {
                category: ErrorCategory::InsufficientAccess,
                message,
            },
            other => other,
        })
}

fn empty_password(credential: &Credential) -> Error {
    Error::Auth {
        category: ErrorCategory::InvalidCredentials,
        message: format!("empty password for {}", credential.bind_dn()),
    }
}

pub(crate) async fn probe_root_dse(session: &mut dyn LdapSession) -> Result<()> {
    session
        .search(
            "",
            SearchScope::Base,
            "(objectClass=*)",
            ROOT_DSE_PROBE_ATTRIBUTES,
        )
        .await
        .map(|_| ())
}
