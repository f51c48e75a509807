//! Idempotent creation, lookup and relocation of directory entities.

use crate::{
    ad::{self, AccountControl},
    config::ProbeConfig,
    connection::ConnectionManager,
    dn::DistinguishedName,
    filter::EntityClass,
    group::Group,
    path,
    session::{DirectoryModification, EntryAttribute, LdapConnector, LdapSession, SearchScope},
    user::{AccountState, User},
    Result,
};
use dirprobe_core::{DirectoryEndpoint, Error};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Caller-supplied sink for human-readable progress lines.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

const LOOKUP_ATTRIBUTES: &[&str] = &["distinguishedName"];

/// Result of [`EntityProvisioner::provision_user`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// A new account was added in the given state.
    Created(AccountState),
    /// The account already exists at the requested DN.
    AlreadyExistsSamePlace(DistinguishedName),
    /// The account exists under a different DN; nothing was written.
    AlreadyExistsElsewhere(DistinguishedName),
}

impl ProvisionOutcome {
    /// Converts an "already exists" outcome into [`Error::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] unless the account was created.
    pub fn require_created(self) -> Result<AccountState> {
        match self {
            Self::Created(state) => Ok(state),
            Self::AlreadyExistsSamePlace(dn) => Err(Error::Conflict {
                dn: dn.to_string(),
                same_path: true,
            }),
            Self::AlreadyExistsElsewhere(dn) => Err(Error::Conflict {
                dn: dn.to_string(),
                same_path: false,
            }),
        }
    }
}

/// Result of a name lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// First matching entry.
    Found(DistinguishedName),
    /// No entry matched.
    NotFound,
}

impl SearchOutcome {
    /// Returns the found DN, if any.
    #[must_use]
    pub fn dn(&self) -> Option<&DistinguishedName> {
        match self {
            Self::Found(dn) => Some(dn),
            Self::NotFound => None,
        }
    }
}

/// Typed view of an entry read with [`EntityProvisioner::fetch_entity`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryEntity {
    /// A `user` entry.
    User(User),
    /// A `group` entry.
    Group(Group),
    /// Any other entry (containers, OUs, domain heads).
    Container {
        /// Entry DN.
        dn: DistinguishedName,
        /// Values of `objectClass`.
        object_classes: Vec<String>,
    },
}

impl DirectoryEntity {
    /// DN of the entity.
    #[must_use]
    pub fn dn(&self) -> &DistinguishedName {
        match self {
            Self::User(user) => &user.dn,
            Self::Group(group) => &group.dn,
            Self::Container { dn, .. } => dn,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Progress(Option<ProgressSink>);

impl Progress {
    pub(crate) fn emit(&self, message: &str) {
        if let Some(sink) = &self.0 {
            sink(message);
        }
    }
}

/// Creates, finds and moves users and groups over one managed connection.
///
/// Every operation starts by making sure the session is live; parent hierarchies are
/// materialised on demand, so retrying a whole operation after a failure is safe.
pub struct EntityProvisioner {
    pub(crate) connection: ConnectionManager,
    pub(crate) progress: Progress,
}

impl EntityProvisioner {
    /// Creates a provisioner that talks to the configured server through `ldap3`.
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            connection: ConnectionManager::new(Arc::new(config)),
            progress: Progress::default(),
        }
    }

    pub(crate) fn with_connector(config: ProbeConfig, connector: Arc<dyn LdapConnector>) -> Self {
        Self {
            connection: ConnectionManager::with_connector(Arc::new(config), connector),
            progress: Progress::default(),
        }
    }

    /// Installs a progress sink.
    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Progress(Some(sink));
        self
    }

    /// Returns the underlying connection manager.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Closes the session. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }

    /// Returns true if `dn` exists.
    ///
    /// # Errors
    ///
    /// Propagates any failure other than "no such object".
    pub async fn exists(&mut self, dn: &DistinguishedName) -> Result<bool> {
        let session = self.connection.live_session().await?;
        path::exists(session, dn).await
    }

    /// Creates any missing `CN=`/`OU=` levels of `dn` and returns the ones created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Path`] for components other than `CN=`, `OU=` and `DC=`.
    #[instrument(skip(self), fields(dn = %dn))]
    pub async fn ensure_path(&mut self, dn: &DistinguishedName) -> Result<Vec<DistinguishedName>> {
        let session = self.connection.live_session().await?;
        let created = path::ensure_exists(session, dn).await?;
        for level in &created {
            self.progress.emit(&format!("Created {level}"));
        }
        Ok(created)
    }

    /// Makes sure a user account named `account_name` exists at `target`.
    ///
    /// An existing account with the same `sAMAccountName` anywhere under the search base is
    /// reported instead of being modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Path`] for unsupported parent components and any classified server
    /// failure. An enabled account needs a TLS transport and a non-empty password; both are
    /// checked before dialing and reported as [`Error::Policy`].
    #[instrument(skip(self, password), fields(target = %target, enabled = want_enabled))]
    pub async fn provision_user(
        &mut self,
        target: &DistinguishedName,
        account_name: &str,
        password: &str,
        want_enabled: bool,
    ) -> Result<ProvisionOutcome> {
        let parent = target.require_parent()?;
        if want_enabled && !self.connection.is_tls() {
            return Err(Error::Policy(
                "enabled accounts need a password, which requires a TLS connection; \
                 create the account disabled or switch to LDAPS"
                    .to_string(),
            ));
        }
        let encoded = if want_enabled {
            Some(ad::encode_password(password)?)
        } else {
            None
        };
        let endpoint = self.connection.config().endpoint().clone();
        let search_base = self.connection.config().search_base().clone();

        self.progress.emit(&format!(
            "Connecting to {endpoint} using {}",
            endpoint.security.label()
        ));
        let session = self.connection.live_session().await?;

        for level in path::ensure_exists(session, &parent).await? {
            self.progress.emit(&format!("Created {level}"));
        }

        if let Some(existing) =
            find_first(session, &search_base, EntityClass::User, account_name).await?
        {
            if &existing == target {
                self.progress
                    .emit(&format!("User {account_name} already exists at {existing}"));
                return Ok(ProvisionOutcome::AlreadyExistsSamePlace(existing));
            }
            self.progress.emit(&format!(
                "User {account_name} already exists elsewhere: {existing}"
            ));
            return Ok(ProvisionOutcome::AlreadyExistsElsewhere(existing));
        }

        let state = if want_enabled {
            AccountState::Enabled
        } else {
            AccountState::Disabled
        };
        let attributes = user_attributes(target, account_name, &endpoint, state, encoded);
        match session.add(target.as_str(), &attributes).await {
            Ok(()) => {
                info!(dn = %target, ?state, "created user");
                self.progress.emit(&format!("Created user {target}"));
                Ok(ProvisionOutcome::Created(state))
            }
            Err(err) if err.is_already_exists() => {
                info!(dn = %target, "user appeared concurrently");
                Ok(ProvisionOutcome::AlreadyExistsSamePlace(target.clone()))
            }
            Err(err) => Err(err),
        }
    }

    /// Moves (and optionally renames) an entry in a single ModifyDN.
    ///
    /// The new parent is created first if needed. Group memberships and `primaryGroupID`
    /// are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Path`] if `new_dn` has no parent, and any classified server failure
    /// (for example "no such object" when `old_dn` is absent).
    #[instrument(skip(self), fields(from = %old_dn, to = %new_dn))]
    pub async fn move_entity(
        &mut self,
        old_dn: &DistinguishedName,
        new_dn: &DistinguishedName,
    ) -> Result<DistinguishedName> {
        let parent = new_dn.require_parent()?;
        if old_dn == new_dn {
            return Ok(new_dn.clone());
        }

        let session = self.connection.live_session().await?;
        for level in path::ensure_exists(session, &parent).await? {
            self.progress.emit(&format!("Created {level}"));
        }

        session
            .modify_dn(
                old_dn.as_str(),
                &new_dn.leaf().to_string(),
                true,
                parent.as_str(),
            )
            .await?;
        info!("moved entry");
        self.progress.emit(&format!("Moved {old_dn} to {new_dn}"));
        Ok(new_dn.clone())
    }

    /// Sets a new password and enables the account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] without touching the network when the transport is not TLS,
    /// or when the server rejects the password.
    #[instrument(skip(self, password), fields(dn = %dn))]
    pub async fn update_user_password(
        &mut self,
        dn: &DistinguishedName,
        password: &str,
    ) -> Result<()> {
        if !self.connection.is_tls() {
            return Err(Error::Policy(
                "password changes require a TLS connection; the server rejects unicodePwd over plaintext"
                    .to_string(),
            ));
        }
        let encoded = ad::encode_password(password)?;
        let enabled = AccountControl::Enabled.as_attribute();

        let session = self.connection.live_session().await?;
        session
            .modify(
                dn.as_str(),
                &[
                    DirectoryModification::replace_binary("unicodePwd", encoded),
                    DirectoryModification::replace("userAccountControl", &[enabled.as_str()]),
                ],
            )
            .await?;
        self.progress.emit(&format!("Password updated for {dn}"));
        Ok(())
    }

    /// Looks an entity up by name under `search_base`.
    ///
    /// # Errors
    ///
    /// Propagates classified server failures, including a missing search base.
    #[instrument(skip(self), fields(base = %search_base))]
    pub async fn search_entity(
        &mut self,
        name: &str,
        search_base: &DistinguishedName,
        class: EntityClass,
    ) -> Result<SearchOutcome> {
        let session = self.connection.live_session().await?;
        Ok(find_first(session, search_base, class, name)
            .await?
            .map_or(SearchOutcome::NotFound, SearchOutcome::Found))
    }

    /// Reads one entry and returns a typed view of it.
    ///
    /// # Errors
    ///
    /// Returns a "no such object" error if the entry is absent.
    pub async fn fetch_entity(&mut self, dn: &DistinguishedName) -> Result<DirectoryEntity> {
        let session = self.connection.live_session().await?;
        let entry = session
            .search(
                dn.as_str(),
                SearchScope::Base,
                "(objectClass=*)",
                ENTITY_ATTRIBUTES,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::from_result_code(32, format!("no entry at {dn}")))?;

        if entry.has_object_class("group") {
            Ok(DirectoryEntity::Group(Group::from_entry(&entry)?))
        } else if entry.has_object_class("user") {
            Ok(DirectoryEntity::User(User::from_entry(&entry)?))
        } else {
            Ok(DirectoryEntity::Container {
                dn: DistinguishedName::parse(&entry.dn)?,
                object_classes: entry.values("objectClass").to_vec(),
            })
        }
    }

    /// Reads a user entry.
    ///
    /// # Errors
    ///
    /// Returns an object-class violation if the entry is not a user.
    pub async fn fetch_user(&mut self, dn: &DistinguishedName) -> Result<User> {
        match self.fetch_entity(dn).await? {
            DirectoryEntity::User(user) => Ok(user),
            _ => Err(not_a(dn, "user")),
        }
    }

    /// Reads a group entry.
    ///
    /// # Errors
    ///
    /// Returns an object-class violation if the entry is not a group.
    pub async fn fetch_group(&mut self, dn: &DistinguishedName) -> Result<Group> {
        match self.fetch_entity(dn).await? {
            DirectoryEntity::Group(group) => Ok(group),
            _ => Err(not_a(dn, "group")),
        }
    }
}

const ENTITY_ATTRIBUTES: &[&str] = &[
    "objectClass",
    "objectGUID",
    "objectSid",
    "cn",
    "sAMAccountName",
    "userPrincipalName",
    "displayName",
    "mail",
    "userAccountControl",
    "primaryGroupID",
    "memberOf",
    "description",
    "groupType",
    "managedBy",
    "member",
];

pub(crate) async fn find_first(
    session: &mut dyn LdapSession,
    search_base: &DistinguishedName,
    class: EntityClass,
    name: &str,
) -> Result<Option<DistinguishedName>> {
    let entries = session
        .search(
            search_base.as_str(),
            SearchScope::Subtree,
            &class.filter(name),
            LOOKUP_ATTRIBUTES,
        )
        .await?;
    entries
        .first()
        .map(|entry| DistinguishedName::parse(&entry.dn).map_err(Error::from))
        .transpose()
}

fn user_attributes(
    target: &DistinguishedName,
    account_name: &str,
    endpoint: &DirectoryEndpoint,
    state: AccountState,
    encoded_password: Option<Vec<u8>>,
) -> Vec<EntryAttribute> {
    let mut attributes = vec![
        EntryAttribute::text(
            "objectClass",
            ["top", "person", "organizationalPerson", "user"],
        ),
        EntryAttribute::text("cn", [target.leaf().value()]),
        EntryAttribute::text("sAMAccountName", [account_name]),
        EntryAttribute::text("name", [target.leaf().value()]),
        EntryAttribute::text("displayName", [account_name]),
        EntryAttribute::text("givenName", [account_name]),
        EntryAttribute::text("sn", [account_name]),
        EntryAttribute::text("userAccountControl", [state.control().as_attribute()]),
    ];
    if let Some(domain) = ad::upn_domain(endpoint, target) {
        attributes.push(EntryAttribute::text(
            "userPrincipalName",
            [format!("{account_name}@{domain}")],
        ));
    }
    if let Some(encoded) = encoded_password {
        attributes.push(EntryAttribute::binary("unicodePwd", encoded));
    }
    attributes
}

fn not_a(dn: &DistinguishedName, expected: &str) -> Error {
    Error::from_result_code(65, format!("{dn} is not a {expected}"))
}
