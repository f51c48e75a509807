//! Directory user representation and helpers.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ad::AccountControl, dn::DistinguishedName, session::LdapEntry, Result};
use dirprobe_core::{ObjectGuid, Sid};

/// Enabled/disabled state derived from `userAccountControl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    /// The account can log on.
    #[default]
    Enabled,
    /// `ACCOUNTDISABLE` is set.
    Disabled,
}

impl AccountState {
    /// Derives the state from a raw `userAccountControl` value.
    #[must_use]
    pub const fn from_flags(flags: u32) -> Self {
        if AccountControl::is_disabled(flags) {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }

    /// The `userAccountControl` value the engine writes for this state.
    #[must_use]
    pub const fn control(self) -> AccountControl {
        match self {
            Self::Enabled => AccountControl::Enabled,
            Self::Disabled => AccountControl::Disabled,
        }
    }
}

/// Representation of a directory user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Distinguished name of the user entry.
    pub dn: DistinguishedName,
    /// Immutable object identity.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
    /// Security identifier.
    #[serde(default)]
    pub sid: Option<Sid>,
    /// Pre-Windows 2000 logon name.
    #[serde(default)]
    pub account_name: Option<String>,
    /// `userPrincipalName`.
    #[serde(default)]
    pub user_principal_name: Option<String>,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Primary email address.
    #[serde(default)]
    pub mail: Option<String>,
    /// Account state.
    pub state: AccountState,
    /// RID of the primary group.
    #[serde(default)]
    pub primary_group_id: Option<u32>,
    /// Groups the user belongs to (`memberOf`).
    #[serde(default)]
    pub groups: Vec<DistinguishedName>,
}

impl User {
    /// Creates a builder for a new user instance.
    #[must_use]
    pub fn builder(dn: DistinguishedName) -> UserBuilder {
        UserBuilder {
            dn,
            guid: None,
            sid: None,
            account_name: None,
            user_principal_name: None,
            display_name: None,
            mail: None,
            state: AccountState::default(),
            primary_group_id: None,
            groups: Vec::new(),
        }
    }

    /// Parses a search entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the DN, GUID or SID is malformed.
    pub fn from_entry(entry: &LdapEntry) -> Result<Self> {
        let dn = DistinguishedName::parse(&entry.dn)?;
        let mut builder = Self::builder(dn);

        if let Some(bytes) = entry.binary("objectGUID") {
            builder = builder.guid(ObjectGuid::from_ad_bytes(bytes)?);
        }
        if let Some(bytes) = entry.binary("objectSid") {
            builder = builder.sid(Sid::from_bytes(bytes)?);
        }
        if let Some(name) = entry.first("sAMAccountName") {
            builder = builder.account_name(name);
        }
        if let Some(upn) = entry.first("userPrincipalName") {
            builder = builder.user_principal_name(upn);
        }
        if let Some(display) = entry.first("displayName") {
            builder = builder.display_name(display);
        }
        if let Some(mail) = entry.first("mail") {
            builder = builder.mail(mail);
        }
        if let Some(flags) = entry
            .first("userAccountControl")
            .and_then(|value| value.parse::<u32>().ok())
        {
            builder = builder.state(AccountState::from_flags(flags));
        }
        if let Some(rid) = entry
            .first("primaryGroupID")
            .and_then(|value| value.parse::<u32>().ok())
        {
            builder = builder.primary_group_id(rid);
        }

        let groups = entry
            .values("memberOf")
            .iter()
            .filter_map(|value| match DistinguishedName::parse(value) {
                Ok(group) => Some(group),
                Err(err) => {
                    warn!("Failed to parse memberOf DN `{value}`: {err}");
                    None
                }
            })
            .collect();

        Ok(builder.groups(groups).build())
    }

    /// Returns true if the account is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, AccountState::Enabled)
    }

    /// Returns true if the user belongs to the provided group.
    #[must_use]
    pub fn in_group(&self, group: &DistinguishedName) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Returns the preferred display name.
    #[must_use]
    pub fn preferred_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.account_name.as_deref())
            .unwrap_or_else(|| self.dn.leaf().value())
    }
}

/// Builder for [`User`].
#[derive(Debug, Clone)]
pub struct UserBuilder {
    dn: DistinguishedName,
    guid: Option<ObjectGuid>,
    sid: Option<Sid>,
    account_name: Option<String>,
    user_principal_name: Option<String>,
    display_name: Option<String>,
    mail: Option<String>,
    state: AccountState,
    primary_group_id: Option<u32>,
    groups: Vec<DistinguishedName>,
}

impl UserBuilder {
    /// Sets the object GUID.
    #[must_use]
    pub const fn guid(mut self, guid: ObjectGuid) -> Self {
        self.guid = Some(guid);
        self
    }

    /// Sets the SID.
    #[must_use]
    pub fn sid(mut self, sid: Sid) -> Self {
        self.sid = Some(sid);
        self
    }

    /// Sets the `sAMAccountName`.
    #[must_use]
    pub fn account_name(mut self, name: impl Into<String>) -> Self {
        self.account_name = Some(name.into());
        self
    }

    /// Sets the `userPrincipalName`.
    #[must_use]
    pub fn user_principal_name(mut self, upn: impl Into<String>) -> Self {
        self.user_principal_name = Some(upn.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn mail(mut self, mail: impl Into<String>) -> Self {
        self.mail = Some(mail.into());
        self
    }

    /// Sets the account state.
    #[must_use]
    pub const fn state(mut self, state: AccountState) -> Self {
        self.state = state;
        self
    }

    /// Sets the primary group RID.
    #[must_use]
    pub const fn primary_group_id(mut self, rid: u32) -> Self {
        self.primary_group_id = Some(rid);
        self
    }

    /// Sets the group memberships.
    #[must_use]
    pub fn groups(mut self, groups: Vec<DistinguishedName>) -> Self {
        self.groups = groups;
        self
    }

    /// Finalizes the builder.
    #[must_use]
    pub fn build(self) -> User {
        User {
            dn: self.dn,
            guid: self.guid,
            sid: self.sid,
            account_name: self.account_name,
            user_principal_name: self.user_principal_name,
            display_name: self.display_name,
            mail: self.mail,
            state: self.state,
            primary_group_id: self.primary_group_id,
            groups: self.groups,
        }
    }
}
