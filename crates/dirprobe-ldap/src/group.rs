//! Directory group representation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{dn::DistinguishedName, session::LdapEntry, Result};
use dirprobe_core::{ObjectGuid, Sid};

/// `groupType` bit marking a security (as opposed to distribution) group.
const SECURITY_ENABLED: i32 = i32::MIN;

/// Representation of a directory group entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Distinguished name of the group.
    pub dn: DistinguishedName,
    /// Canonical group name (usually the `cn` attribute).
    pub name: String,
    /// Immutable object identity.
    #[serde(default)]
    pub guid: Option<ObjectGuid>,
    /// Security identifier.
    #[serde(default)]
    pub sid: Option<Sid>,
    /// Raw `groupType`.
    #[serde(default)]
    pub group_type: Option<i32>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Entry named in `managedBy`.
    #[serde(default)]
    pub managed_by: Option<DistinguishedName>,
    /// Distinguished names for group members.
    #[serde(default)]
    pub members: Vec<DistinguishedName>,
}

impl Group {
    /// Creates a new builder with the required fields.
    #[must_use]
    pub fn builder(dn: DistinguishedName, name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            group: Self {
                dn,
                name: name.into(),
                guid: None,
                sid: None,
                group_type: None,
                description: None,
                managed_by: None,
                members: Vec::new(),
            },
        }
    }

    /// Parses a search entry.
    ///
    /// The name falls back to the leaf RDN value when `cn` was not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the DN, GUID or SID is malformed.
    pub fn from_entry(entry: &LdapEntry) -> Result<Self> {
        let dn = DistinguishedName::parse(&entry.dn)?;
        let name = entry
            .first("cn")
            .map_or_else(|| dn.leaf().value().to_string(), str::to_string);
        let mut builder = Self::builder(dn, name);

        if let Some(bytes) = entry.binary("objectGUID") {
            builder = builder.guid(ObjectGuid::from_ad_bytes(bytes)?);
        }
        if let Some(bytes) = entry.binary("objectSid") {
            builder = builder.sid(Sid::from_bytes(bytes)?);
        }
        if let Some(group_type) = entry
            .first("groupType")
            .and_then(|value| value.parse::<i32>().ok())
        {
            builder = builder.group_type(group_type);
        }
        if let Some(description) = entry.first("description") {
            builder = builder.description(description);
        }
        if let Some(manager) = entry
            .first("managedBy")
            .and_then(|value| DistinguishedName::parse(value).ok())
        {
            builder = builder.managed_by(manager);
        }

        let members = entry
            .values("member")
            .iter()
            .filter_map(|dn_str| match DistinguishedName::parse(dn_str) {
                Ok(member_dn) => Some(member_dn),
                Err(err) => {
                    warn!("Failed to parse member DN `{dn_str}`: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();

        Ok(builder.members(members).build())
    }

    /// Returns the number of members in the group.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Checks whether the given distinguished name is a member of this group.
    #[must_use]
    pub fn has_member(&self, member_dn: &DistinguishedName) -> bool {
        self.members.iter().any(|dn| dn == member_dn)
    }

    /// Returns true if `groupType` marks a security group.
    #[must_use]
    pub fn is_security_group(&self) -> bool {
        self.group_type
            .is_some_and(|value| value & SECURITY_ENABLED != 0)
    }

    /// Relative identifier from the group SID.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sid.as_ref().and_then(Sid::rid)
    }
}

/// Builder for [`Group`].
#[derive(Debug)]
pub struct GroupBuilder {
    group: Group,
}

impl GroupBuilder {
    /// Sets the object GUID.
    #[must_use]
    pub const fn guid(mut self, guid: ObjectGuid) -> Self {
        self.group.guid = Some(guid);
        self
    }

    /// Sets the SID.
    #[must_use]
    pub fn sid(mut self, sid: Sid) -> Self {
        self.group.sid = Some(sid);
        self
    }

    /// Sets the raw `groupType`.
    #[must_use]
    pub const fn group_type(mut self, group_type: i32) -> Self {
        self.group.group_type = Some(group_type);
        self
    }

    /// Sets the group description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.group.description = Some(description.into());
        self
    }

    /// Sets the managing entry.
    #[must_use]
    pub fn managed_by(mut self, dn: DistinguishedName) -> Self {
        self.group.managed_by = Some(dn);
        self
    }

    /// Appends multiple members.
    #[must_use]
    pub fn members<I>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = DistinguishedName>,
    {
        self.group.members.extend(members);
        self
    }

    /// Builds the [`Group`].
    #[must_use]
    pub fn build(self) -> Group {
        self.group
    }
}
