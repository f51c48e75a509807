//! Active Directory object identity values.
//!
//! `objectGUID` and `objectSid` are the attributes that survive a rename or move; downstream
//! group membership and ACL state hangs off them. Both arrive as raw bytes on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Immutable identity of a directory object (`objectGUID`).
///
/// AD stores the GUID in the mixed-endian Microsoft layout, so the first three fields are
/// little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectGuid(Uuid);

impl ObjectGuid {
    /// Creates a GUID wrapper from a [`Uuid`].
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Decodes the 16-byte `objectGUID` attribute value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not exactly 16 bytes long.
    pub fn from_ad_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 16] = bytes.try_into().map_err(|_| {
            malformed(format!("objectGUID must be 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(Uuid::from_bytes_le(raw)))
    }

    /// Encodes back into the on-the-wire byte layout.
    #[must_use]
    pub fn to_ad_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    /// Returns the inner [`Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for ObjectGuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim_matches(|c| c == '{' || c == '}'))
            .map(Self)
            .map_err(|err| Error::Config(format!("invalid GUID `{s}`: {err}")))
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Security identifier (`objectSid`).
///
/// Binary layout: revision (1 byte), sub-authority count (1), identifier authority
/// (6, big-endian), then `count` little-endian `u32` sub-authorities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Decodes a binary `objectSid` value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is shorter than its header or its declared
    /// sub-authority count.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(malformed(format!(
                "SID too short ({} bytes, minimum 8)",
                bytes.len()
            )));
        }

        let revision = bytes[0];
        let count = usize::from(bytes[1]);
        let needed = 8 + count * 4;
        if bytes.len() < needed {
            return Err(malformed(format!(
                "SID declares {count} sub-authorities but has {} bytes",
                bytes.len()
            )));
        }

        let mut authority_bytes = [0u8; 8];
        authority_bytes[2..].copy_from_slice(&bytes[2..8]);
        let authority = u64::from_be_bytes(authority_bytes);

        let sub_authorities = bytes[8..needed]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Encodes the SID into its binary form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.sub_authorities.len() * 4);
        bytes.push(self.revision);
        // Sub-authority count is a single byte on the wire.
        bytes.push(u8::try_from(self.sub_authorities.len()).unwrap_or(u8::MAX));
        bytes.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        bytes
    }

    /// Relative identifier: the last sub-authority.
    ///
    /// For a group this is the value AD expects in a member's `primaryGroupID`.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    /// Sub-authorities in order.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }
}

impl FromStr for Sid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        if !parts.next().is_some_and(|p| p.eq_ignore_ascii_case("S")) {
            return Err(malformed(format!("`{s}` does not start with S-")));
        }
        let mut numbers = parts.map(|p| {
            p.parse::<u64>()
                .map_err(|_| malformed(format!("`{s}` has a non-numeric part `{p}`")))
        });
        let revision = numbers
            .next()
            .ok_or_else(|| malformed(format!("`{s}` has no revision")))??;
        let authority = numbers
            .next()
            .ok_or_else(|| malformed(format!("`{s}` has no authority")))??;
        let sub_authorities = numbers
            .map(|n| n.and_then(|v| u32::try_from(v).map_err(|_| malformed(s.to_string()))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            revision: u8::try_from(revision).map_err(|_| malformed(s.to_string()))?,
            authority,
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

fn malformed(message: String) -> Error {
    Error::Protocol {
        category: crate::ErrorCategory::Unknown,
        code: 0,
        message,
    }
}
