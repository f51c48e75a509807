//! Group creation, membership edits and SSO group configuration.

use crate::{
    ad::{GLOBAL_SECURITY_GROUP, SSO_GROUP_DESCRIPTION, SSO_READER_MARKER},
    dn::DistinguishedName,
    filter::EntityClass,
    path,
    provisioner::{EntityProvisioner, SearchOutcome},
    session::{DirectoryModification, EntryAttribute, SearchScope},
    Result,
};
use dirprobe_core::{Error, Sid};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

const MEMBER_OF_ATTRIBUTES: &[&str] = &["memberOf"];
const SID_ATTRIBUTES: &[&str] = &["objectSid"];

/// Result of [`EntityProvisioner::create_group`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
    /// The group was added.
    Created(DistinguishedName),
    /// An entry already sits at the requested DN.
    AlreadyExists(DistinguishedName),
}

/// What [`EntityProvisioner::set_sole_group_membership`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    /// Groups the user was removed from.
    pub removed: Vec<DistinguishedName>,
    /// True if the user was already a member of the target group.
    pub already_member: bool,
}

/// Result of [`EntityProvisioner::configure_group_for_sso`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsoReport {
    /// The configured group.
    pub group: DistinguishedName,
    /// Value written to `managedBy`.
    pub managed_by: DistinguishedName,
    /// Best-effort steps that did not apply.
    pub warnings: Vec<String>,
}

impl SsoReport {
    /// Returns true if every step applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl EntityProvisioner {
    /// Returns the groups listed in the user's `memberOf`.
    ///
    /// # Errors
    ///
    /// Returns a "no such object" error if the user is absent.
    pub async fn user_groups(&mut self, user_dn: &DistinguishedName) -> Result<Vec<DistinguishedName>> {
        let session = self.connection.live_session().await?;
        let entry = session
            .search(
                user_dn.as_str(),
                SearchScope::Base,
                "(objectClass=*)",
                MEMBER_OF_ATTRIBUTES,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::from_result_code(32, format!("no entry at {user_dn}")))?;

        Ok(entry
            .values("memberOf")
            .iter()
            .filter_map(|value| match DistinguishedName::parse(value) {
                Ok(group) => Some(group),
                Err(err) => {
                    warn!("Skipping memberOf value `{value}`: {err}");
                    None
                }
            })
            .collect())
    }

    /// Adds `user_dn` to the group's `member` attribute.
    ///
    /// Returns `false` if the user was already a member.
    ///
    /// # Errors
    ///
    /// Propagates classified server failures.
    #[instrument(skip(self), fields(user = %user_dn, group = %group_dn))]
    pub async fn add_user_to_group(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<bool> {
        let session = self.connection.live_session().await?;
        match session
            .modify(
                group_dn.as_str(),
                &[DirectoryModification::add("member", &[user_dn.as_str()])],
            )
            .await
        {
            Ok(()) => {
                self.progress
                    .emit(&format!("Added {user_dn} to {group_dn}"));
                Ok(true)
            }
            Err(err) if err.is_already_exists() => {
                debug!("user already a member");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Removes `user_dn` from the group's `member` attribute.
    ///
    /// Returns `false` if the user was not a member.
    ///
    /// # Errors
    ///
    /// Propagates classified server failures.
    #[instrument(skip(self), fields(user = %user_dn, group = %group_dn))]
    pub async fn remove_user_from_group(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<bool> {
        let session = self.connection.live_session().await?;
        match session
            .modify(
                group_dn.as_str(),
                &[DirectoryModification::delete("member", &[user_dn.as_str()])],
            )
            .await
        {
            Ok(()) => {
                self.progress
                    .emit(&format!("Removed {user_dn} from {group_dn}"));
                Ok(true)
            }
            Err(err) if err.is_value_not_present() => {
                debug!("user was not a member");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Leaves the user in `group_dn` and no other group it was listed in.
    ///
    /// `primaryGroupID` is not a `member` link and is left alone.
    ///
    /// # Errors
    ///
    /// Propagates the first failing removal or the final add. Removals done before the
    /// failure stay applied; rerunning the operation converges.
    #[instrument(skip(self), fields(user = %user_dn, group = %group_dn))]
    pub async fn set_sole_group_membership(
        &mut self,
        user_dn: &DistinguishedName,
        group_dn: &DistinguishedName,
    ) -> Result<MembershipChange> {
        let current = self.user_groups(user_dn).await?;
        let mut change = MembershipChange::default();

        for group in current {
            if &group == group_dn {
                change.already_member = true;
                continue;
            }
            if self.remove_user_from_group(user_dn, &group).await? {
                change.removed.push(group);
            }
        }

        if !change.already_member {
            change.already_member = !self.add_user_to_group(user_dn, group_dn).await?;
        }
        info!(removed = change.removed.len(), "membership narrowed to one group");
        Ok(change)
    }

    /// Creates a global security group, materialising its parent first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Path`] for unsupported parent components and any classified
    /// server failure other than "already exists".
    #[instrument(skip(self), fields(group = %group_dn))]
    pub async fn create_group(
        &mut self,
        group_dn: &DistinguishedName,
        group_name: &str,
    ) -> Result<GroupOutcome> {
        let parent = group_dn.require_parent()?;
        let session = self.connection.live_session().await?;
        for level in path::ensure_exists(session, &parent).await? {
            self.progress.emit(&format!("Created {level}"));
        }

        let group_type = GLOBAL_SECURITY_GROUP.to_string();
        let attributes = [
            EntryAttribute::text("objectClass", ["top", "group"]),
            EntryAttribute::text("cn", [group_dn.leaf().value()]),
            EntryAttribute::text("sAMAccountName", [group_name]),
            EntryAttribute::text("groupType", [group_type.as_str()]),
        ];
        match session.add(group_dn.as_str(), &attributes).await {
            Ok(()) => {
                info!("created group");
                self.progress.emit(&format!("Created group {group_dn}"));
                Ok(GroupOutcome::Created(group_dn.clone()))
            }
            Err(err) if err.is_already_exists() => {
                self.progress
                    .emit(&format!("Group {group_dn} already exists"));
                Ok(GroupOutcome::AlreadyExists(group_dn.clone()))
            }
            Err(err) => Err(err),
        }
    }

    /// Replaces the given string attributes on a group. An empty list writes nothing.
    ///
    /// # Errors
    ///
    /// Propagates classified server failures.
    #[instrument(skip(self, attributes), fields(group = %group_dn))]
    pub async fn modify_group(
        &mut self,
        group_dn: &DistinguishedName,
        attributes: &[(&str, &str)],
    ) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let modifications = attributes
            .iter()
            .map(|&(name, value)| DirectoryModification::replace(name, &[value]))
            .collect::<Vec<_>>();

        let session = self.connection.live_session().await?;
        session.modify(group_dn.as_str(), &modifications).await?;
        self.progress.emit(&format!("Updated {group_dn}"));
        Ok(())
    }

    /// Turns a group into the reader group used for LDAP single sign-on.
    ///
    /// Sets the group type and description, points `managedBy` at `search_base`, and
    /// adds an `adminDescription` marker naming the group to `search_base`. Existing
    /// `adminDescription` values are kept. The marker is best effort: failures land in
    /// [`SsoReport::warnings`].
    ///
    /// # Errors
    ///
    /// Propagates classified failures from the group modifications.
    #[instrument(skip(self), fields(group = %group_dn, base = %search_base))]
    pub async fn configure_group_for_sso(
        &mut self,
        group_dn: &DistinguishedName,
        search_base: &DistinguishedName,
    ) -> Result<SsoReport> {
        let group_type = GLOBAL_SECURITY_GROUP.to_string();
        let session = self.connection.live_session().await?;

        session
            .modify(
                group_dn.as_str(),
                &[
                    DirectoryModification::replace("groupType", &[group_type.as_str()]),
                    DirectoryModification::replace("description", &[SSO_GROUP_DESCRIPTION]),
                ],
            )
            .await?;
        session
            .modify(
                group_dn.as_str(),
                &[DirectoryModification::replace(
                    "managedBy",
                    &[search_base.as_str()],
                )],
            )
            .await?;
        self.progress
            .emit(&format!("Configured {group_dn} for SSO"));

        let mut warnings = Vec::new();
        let marker = format!("{SSO_READER_MARKER}{group_dn}");
        match session
            .modify(
                search_base.as_str(),
                &[DirectoryModification::add(
                    "adminDescription",
                    &[marker.as_str()],
                )],
            )
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => debug!("SSO marker already present"),
            Err(err) => {
                warn!(base = %search_base, error = %err, "could not tag SSO search base");
                warnings.push(format!("adminDescription on {search_base} not set: {err}"));
            }
        }

        for warning in &warnings {
            self.progress.emit(&format!("Warning: {warning}"));
        }
        Ok(SsoReport {
            group: group_dn.clone(),
            managed_by: search_base.clone(),
            warnings,
        })
    }

    /// Reads the group's `objectSid`.
    ///
    /// # Errors
    ///
    /// Returns "no such object" if the group is absent and "no such attribute" if it has
    /// no SID.
    pub async fn group_sid(&mut self, group_dn: &DistinguishedName) -> Result<Sid> {
        let session = self.connection.live_session().await?;
        let entry = session
            .search(
                group_dn.as_str(),
                SearchScope::Base,
                "(objectClass=*)",
                SID_ATTRIBUTES,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::from_result_code(32, format!("no entry at {group_dn}")))?;

        let bytes = entry
            .binary("objectSid")
            .ok_or_else(|| Error::from_result_code(16, format!("{group_dn} has no objectSid")))?;
        Sid::from_bytes(bytes)
    }

    /// Looks a group up by `cn` under `search_base`.
    ///
    /// # Errors
    ///
    /// Propagates classified server failures.
    pub async fn search_group(
        &mut self,
        name: &str,
        search_base: &DistinguishedName,
    ) -> Result<SearchOutcome> {
        self.search_entity(name, search_base, EntityClass::Group)
            .await
    }
}
