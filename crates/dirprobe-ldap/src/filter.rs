//! Search filter construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use dirprobe_core::Error;

/// Escapes a value for use inside an RFC 4515 filter assertion.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Equality filter scoped to one object class.
#[must_use]
pub fn entity_filter(object_class: &str, attribute: &str, value: &str) -> String {
    format!(
        "(&(objectClass={object_class})({attribute}={}))",
        escape_filter_value(value)
    )
}

/// Kind of entity a name lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    /// `user`, named by `sAMAccountName`.
    User,
    /// `group`, named by `cn`.
    Group,
    /// `organizationalUnit`, named by `ou`.
    OrganizationalUnit,
    /// `container`, named by `cn`.
    Container,
}

impl EntityClass {
    /// Object class value.
    #[must_use]
    pub const fn object_class(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::OrganizationalUnit => "organizationalUnit",
            Self::Container => "container",
        }
    }

    /// Attribute the entity is looked up by.
    #[must_use]
    pub const fn naming_attribute(self) -> &'static str {
        match self {
            Self::User => "sAMAccountName",
            Self::OrganizationalUnit => "ou",
            Self::Group | Self::Container => "cn",
        }
    }

    /// Lookup filter for `name`.
    #[must_use]
    pub fn filter(self, name: &str) -> String {
        entity_filter(self.object_class(), self.naming_attribute(), name)
    }
}

/// Canned user lookup filters offered by the authentication test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserLookupFilter {
    /// `(&(objectClass=user)(sAMAccountName=%s))`
    #[default]
    SamAccountName,
    /// `(&(objectClass=user)(userPrincipalName=%s))`
    UserPrincipalName,
    /// `(&(objectClass=user)(mail=%s))`
    Mail,
    /// `(&(objectClass=user)(distinguishedName=%s))`
    DistinguishedName,
    /// `(&(objectClass=user)(cn=%s))`
    CommonName,
}

impl UserLookupFilter {
    /// All filters, in presentation order.
    pub const ALL: [Self; 5] = [
        Self::SamAccountName,
        Self::UserPrincipalName,
        Self::Mail,
        Self::DistinguishedName,
        Self::CommonName,
    ];

    /// Attribute matched by this filter.
    #[must_use]
    pub const fn attribute(self) -> &'static str {
        match self {
            Self::SamAccountName => "sAMAccountName",
            Self::UserPrincipalName => "userPrincipalName",
            Self::Mail => "mail",
            Self::DistinguishedName => "distinguishedName",
            Self::CommonName => "cn",
        }
    }

    /// Renders the filter for `login`.
    #[must_use]
    pub fn render(self, login: &str) -> String {
        entity_filter("user", self.attribute(), login)
    }
}

impl fmt::Display for UserLookupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(&(objectClass=user)({}=%s))", self.attribute())
    }
}

impl FromStr for UserLookupFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|filter| {
                filter.attribute().eq_ignore_ascii_case(trimmed)
                    || filter.to_string().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| Error::Config(format!("unknown user lookup filter `{s}`")))
    }
}
