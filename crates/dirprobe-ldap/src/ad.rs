//! Active Directory attribute encodings.

use crate::{dn::DistinguishedName, Result};
use dirprobe_core::{DirectoryEndpoint, Error};

/// `groupType` of a global security group (`GLOBAL_GROUP | SECURITY_ENABLED`).
pub const GLOBAL_SECURITY_GROUP: i32 = -2_147_483_646;

/// `description` written by the SSO group configuration.
pub const SSO_GROUP_DESCRIPTION: &str = "LDAP Authentication Group";

/// Prefix of the `adminDescription` marker left on an SSO group's container.
pub const SSO_READER_MARKER: &str = "SSO_Reader:";

/// `userAccountControl` bit marking a disabled account.
const ACCOUNTDISABLE: u32 = 0x0002;

/// `userAccountControl` states written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountControl {
    /// `NORMAL_ACCOUNT` (512).
    Enabled,
    /// `NORMAL_ACCOUNT | ACCOUNTDISABLE` (514).
    Disabled,
}

impl AccountControl {
    /// Numeric flag value.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::Enabled => 512,
            Self::Disabled => 514,
        }
    }

    /// Attribute text form.
    #[must_use]
    pub fn as_attribute(self) -> String {
        self.value().to_string()
    }

    /// Returns true if the raw flag word has the disable bit set.
    #[must_use]
    pub const fn is_disabled(flags: u32) -> bool {
        flags & ACCOUNTDISABLE != 0
    }
}

/// Encodes a password for the `unicodePwd` attribute.
///
/// AD expects the password wrapped in double quotes and encoded as UTF-16LE without a BOM.
///
/// # Errors
///
/// Returns [`Error::Policy`] for an empty password.
pub fn encode_password(password: &str) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(Error::Policy("password cannot be empty".to_string()));
    }
    Ok(format!("\"{password}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect())
}

/// Decodes a `unicodePwd` value produced by [`encode_password`].
///
/// # Errors
///
/// Returns [`Error::Config`] if the bytes are not quoted UTF-16LE.
pub fn decode_password(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Config("unicodePwd has an odd byte length".to_string()));
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    let quoted = String::from_utf16(&units)
        .map_err(|err| Error::Config(format!("unicodePwd is not UTF-16LE: {err}")))?;
    quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| Error::Config("unicodePwd is not quoted".to_string()))
}

/// Domain part of a generated `userPrincipalName`.
///
/// A dotted endpoint host is taken as the domain; otherwise the `DC=` components of the
/// entry's DN are joined.
#[must_use]
pub fn upn_domain(endpoint: &DirectoryEndpoint, dn: &DistinguishedName) -> Option<String> {
    let host = endpoint.host.trim();
    if host.contains('.') {
        return Some(host.to_ascii_lowercase());
    }
    dn.domain_name()
}
