//! Bind credentials.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Bind DN and secret used for a simple bind.
///
/// The secret is held in a [`SecretString`]; it is never serialized and never printed by
/// `Debug`.
#[derive(Serialize, Deserialize)]
pub struct Credential {
    /// Bind distinguished name (or UPN, which AD also accepts).
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    secret: SecretString,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl Credential {
    /// Creates a new credential.
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Get the LDAP bind DN.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Get the LDAP bind password.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Returns true if the bind DN is empty, in which case the bind is skipped.
    ///
    /// A DN with an empty password is not anonymous, see [`Credential::lacks_secret`].
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.bind_dn.trim().is_empty()
    }

    /// Returns true if a bind DN is set without a password.
    ///
    /// Servers accept such a bind as unauthenticated, so callers refuse it up front.
    #[must_use]
    pub fn lacks_secret(&self) -> bool {
        !self.is_anonymous() && self.secret.expose_secret().is_empty()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.bind_dn.clone(), self.secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bind_dn", &self.bind_dn)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.bind_dn == other.bind_dn
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}
